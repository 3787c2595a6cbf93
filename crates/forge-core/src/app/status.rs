//! Read-side views returned by the orchestrator.

use serde::{Deserialize, Serialize};

use crate::domain::{AgentId, AttemptRecord, TaskId, TaskState};

/// Point-in-time view of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub id: TaskId,
    pub name: String,
    pub state: TaskState,
    pub priority: i32,

    /// Finished attempts.
    pub attempts: u32,

    /// Agent the task is queued on or running on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentId>,

    /// Dependencies that have not completed yet.
    pub waiting_on: usize,

    pub history: Vec<AttemptRecord>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub queued: usize,
    pub running: usize,
    pub retry_scheduled: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl QueueCounts {
    /// Tasks that have not reached a terminal state.
    pub fn live(&self) -> usize {
        self.pending + self.queued + self.running + self.retry_scheduled
    }
}

/// What `deregister_agent` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    pub agent: AgentId,

    /// Queued tasks handed back to the scheduler.
    pub reassigned: usize,

    /// Running attempts failed as `AGENT_LOST` because the drain ran out of time.
    pub interrupted: usize,

    pub timed_out: bool,
}

/// Result of a successful `cancel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// The task was not running and is now `Cancelled`.
    Cancelled,

    /// The task is running; its handler was signalled and the task becomes
    /// `Cancelled` when the handler returns.
    Requested,
}
