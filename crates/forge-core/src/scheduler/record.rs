//! Task record: spec + execution state.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::agent::QueueKey;
use crate::domain::{AgentId, AttemptRecord, RetryPolicy, TaskId, TaskSpec, TaskState};
use crate::typed::TaskHandler;

/// Live (non-terminal) task.
///
/// Design:
/// - This is the single source of truth for task state.
/// - Queue structures (ready set, retry heap, agent queues) hold TaskId only.
pub(crate) struct TaskRecord {
    pub id: TaskId,
    /// `spec.id` is always `Some(id)`.
    pub spec: TaskSpec,
    pub name: Arc<str>,
    pub priority: i32,
    pub retry: RetryPolicy,
    pub handler: Arc<dyn TaskHandler>,
    pub seq: u64,

    pub state: TaskState,

    /// Finished attempts.
    pub attempts: u32,
    pub history: Vec<AttemptRecord>,

    /// Dependencies not completed yet.
    pub unmet: usize,

    /// Agent whose queue holds the task, or that runs it.
    pub agent: Option<AgentId>,
    pub running: Option<RunningInfo>,
    pub cancel_requested: bool,

    /// A finished attempt still occupies a slot (handler has not returned).
    pub lingering: bool,
    /// Retry timer fired while `lingering`; re-queue on slot release.
    pub retry_due: bool,
    pub retry_at: Option<Instant>,

    /// Set while the task waits in the ready set.
    pub queued_since: Option<Instant>,
    pub starved_reported: bool,
}

pub(crate) struct RunningInfo {
    pub attempt: u32,
    pub cancel: CancellationToken,
    pub started_at: DateTime<Utc>,
}

impl TaskRecord {
    /// Position in the ready set and in agent queues.
    pub(crate) fn queue_key(&self) -> QueueKey {
        QueueKey::new(self.priority, self.seq)
    }
}

/// Terminal task kept for status queries and later dependency checks.
#[derive(Debug, Clone)]
pub(crate) struct FinishedTask {
    pub name: Arc<str>,
    pub state: TaskState,
    pub priority: i32,
    pub attempts: u32,
    pub history: Vec<AttemptRecord>,
    pub output: Option<serde_json::Value>,
}

/// Retry timer entry.
///
/// Reverse ordering so BinaryHeap acts as a min-heap (earliest first).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RetryTimer {
    pub at: Instant,
    pub task: TaskId,
}

impl PartialOrd for RetryTimer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RetryTimer {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.task.cmp(&self.task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, BinaryHeap};
    use std::time::Duration;

    #[test]
    fn ready_key_orders_priority_then_seq() {
        let key = QueueKey::new;
        let mut ready = BTreeMap::new();
        ready.insert(key(0, 1), "low-first");
        ready.insert(key(5, 3), "high-late");
        ready.insert(key(5, 2), "high-early");
        ready.insert(key(-1, 0), "negative");

        let order: Vec<_> = ready.values().copied().collect();
        assert_eq!(order, vec!["high-early", "high-late", "low-first", "negative"]);
    }

    #[test]
    fn retry_heap_pops_earliest_first() {
        let now = Instant::now();
        let mut heap = BinaryHeap::new();
        heap.push(RetryTimer {
            at: now + Duration::from_secs(5),
            task: TaskId::from_u128(1),
        });
        heap.push(RetryTimer {
            at: now + Duration::from_secs(1),
            task: TaskId::from_u128(2),
        });

        assert_eq!(heap.pop().unwrap().task, TaskId::from_u128(2));
        assert_eq!(heap.pop().unwrap().task, TaskId::from_u128(1));
    }
}
