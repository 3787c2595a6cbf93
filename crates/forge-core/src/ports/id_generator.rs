//! IdGenerator port: task and agent ids.

use std::sync::Arc;

use ulid::Ulid;

use crate::domain::{AgentId, TaskId};
use crate::ports::Clock;

pub trait IdGenerator: Send + Sync {
    fn task_id(&self) -> TaskId;

    fn agent_id(&self) -> AgentId;
}

/// ULID-based generator. The timestamp part comes from the clock, so a
/// `FixedClock` makes the time component deterministic.
pub struct UlidGenerator {
    clock: Arc<dyn Clock>,
}

impl UlidGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    fn next(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl IdGenerator for UlidGenerator {
    fn task_id(&self) -> TaskId {
        TaskId::from(self.next())
    }

    fn agent_id(&self) -> AgentId {
        AgentId::from(self.next())
    }
}
