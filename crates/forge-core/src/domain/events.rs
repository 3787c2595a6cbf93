//! Domain events published on the event bus.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ids::{AgentId, TaskId};
use super::outcome::AttemptRecord;
use super::state::AgentState;

/// Bus topic. Every event belongs to exactly one topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    /// Task lifecycle: submission, admission, attempts, terminal transitions.
    Tasks,
    /// Agent lifecycle and capacity changes.
    Agents,
    /// Scheduler-level conditions: starvation, checkpoints.
    Scheduler,
}

impl Topic {
    pub const ALL: [Topic; 3] = [Topic::Tasks, Topic::Agents, Topic::Scheduler];
}

/// Something that happened inside the orchestrator.
///
/// Terminal task transitions map to exactly one of `TaskCompleted`,
/// `TaskFailed`, `TaskCancelled` or `DependencyFailed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    TaskSubmitted {
        task: TaskId,
        name: String,
    },
    TaskAdmitted {
        task: TaskId,
        agent: AgentId,
    },
    TaskStarted {
        task: TaskId,
        agent: AgentId,
        attempt: u32,
    },
    TaskRetryScheduled {
        task: TaskId,
        attempt: u32,
        #[serde(with = "crate::config::secs")]
        delay: Duration,
        reason: String,
    },
    TaskCompleted {
        task: TaskId,
        attempts: u32,
        output: serde_json::Value,
    },
    TaskFailed {
        task: TaskId,
        attempts: u32,
        history: Vec<AttemptRecord>,
    },
    TaskCancelled {
        task: TaskId,
    },
    /// A dependent cancelled because `failed_dependency` (transitively) failed or was cancelled.
    DependencyFailed {
        task: TaskId,
        failed_dependency: TaskId,
    },
    TaskStarved {
        task: TaskId,
        #[serde(with = "crate::config::secs")]
        waited: Duration,
    },
    AgentRegistered {
        agent: AgentId,
        name: String,
    },
    AgentStateChanged {
        agent: AgentId,
        from: AgentState,
        to: AgentState,
    },
    AgentCapacityFreed {
        agent: AgentId,
        free_slots: usize,
    },
    AgentRemoved {
        agent: AgentId,
    },
    CheckpointSaved {
        tasks: usize,
    },
}

impl Event {
    pub fn topic(&self) -> Topic {
        match self {
            Event::TaskSubmitted { .. }
            | Event::TaskAdmitted { .. }
            | Event::TaskStarted { .. }
            | Event::TaskRetryScheduled { .. }
            | Event::TaskCompleted { .. }
            | Event::TaskFailed { .. }
            | Event::TaskCancelled { .. }
            | Event::DependencyFailed { .. } => Topic::Tasks,
            Event::AgentRegistered { .. }
            | Event::AgentStateChanged { .. }
            | Event::AgentCapacityFreed { .. }
            | Event::AgentRemoved { .. } => Topic::Agents,
            Event::TaskStarved { .. } | Event::CheckpointSaved { .. } => Topic::Scheduler,
        }
    }

    /// The task this event is about, if any.
    pub fn task(&self) -> Option<TaskId> {
        match self {
            Event::TaskSubmitted { task, .. }
            | Event::TaskAdmitted { task, .. }
            | Event::TaskStarted { task, .. }
            | Event::TaskRetryScheduled { task, .. }
            | Event::TaskCompleted { task, .. }
            | Event::TaskFailed { task, .. }
            | Event::TaskCancelled { task }
            | Event::DependencyFailed { task, .. }
            | Event::TaskStarved { task, .. } => Some(*task),
            _ => None,
        }
    }

    /// Does this event report a terminal task transition?
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Event::TaskCompleted { .. }
                | Event::TaskFailed { .. }
                | Event::TaskCancelled { .. }
                | Event::DependencyFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_know_their_topic() {
        let task = TaskId::from_u128(1);
        let agent = AgentId::from_u128(2);

        assert_eq!(Event::TaskCancelled { task }.topic(), Topic::Tasks);
        assert_eq!(Event::AgentRemoved { agent }.topic(), Topic::Agents);
        assert_eq!(
            Event::TaskStarved {
                task,
                waited: Duration::from_secs(3)
            }
            .topic(),
            Topic::Scheduler
        );
    }

    #[test]
    fn event_json_is_tagged() {
        let event = Event::DependencyFailed {
            task: TaskId::from_u128(3),
            failed_dependency: TaskId::from_u128(1),
        };
        let v = serde_json::to_value(&event).unwrap();
        assert_eq!(v["event"], "dependency_failed");
        assert!(event.is_terminal());
    }
}
