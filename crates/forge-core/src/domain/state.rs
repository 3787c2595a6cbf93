//! Task and agent state machines.

use serde::{Deserialize, Serialize};

/// Task state.
///
/// State transitions:
/// - Pending -> Queued (all dependencies completed)
/// - Queued -> Running -> Completed
/// - Queued -> Running -> RetryScheduled -> Queued (loop until max_attempts)
/// - Queued -> Running -> Failed (max_attempts reached, or permanent error)
/// - any non-terminal -> Cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting for dependencies.
    Pending,

    /// Admissible; waiting at the scheduler or in an agent queue.
    Queued,

    /// An attempt is executing on an agent.
    Running,

    /// Last attempt failed, waiting for the backoff delay.
    RetryScheduled,

    Completed,

    /// Failed permanently.
    Failed,

    Cancelled,
}

impl TaskState {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }
}

/// Agent lifecycle state.
///
/// ```text
/// Initializing -> Ready <-> Busy -> Draining -> Stopped
///        \          |        |        /
///         +-------> Failed <---------+
///                     |
///                 Recovering -> Ready
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    /// Worker loop spawned, no heartbeat seen yet.
    Initializing,

    /// Has at least one free slot.
    Ready,

    /// Every slot is taken.
    Busy,

    /// Deregistration in progress: no new admissions, no new starts.
    Draining,

    Stopped,

    /// Heartbeat lost or worker gone.
    Failed,

    /// Worker loop respawned after a failure, waiting for its first heartbeat.
    Recovering,
}

impl AgentState {
    pub fn is_terminal(self) -> bool {
        self == AgentState::Stopped
    }

    /// May the scheduler admit new tasks into this agent?
    pub fn is_accepting(self) -> bool {
        matches!(self, AgentState::Ready | AgentState::Busy)
    }

    /// Does the agent's worker loop send heartbeats in this state?
    pub fn expects_heartbeat(self) -> bool {
        matches!(
            self,
            AgentState::Initializing
                | AgentState::Ready
                | AgentState::Busy
                | AgentState::Draining
                | AgentState::Recovering
        )
    }

    pub fn can_transition_to(self, next: AgentState) -> bool {
        use AgentState::*;
        match (self, next) {
            (Stopped, _) => false,
            (_, Failed) => true,
            (Initializing, Ready) => true,
            (Ready, Busy) | (Busy, Ready) => true,
            (Initializing | Ready | Busy, Draining) => true,
            (Draining, Stopped) => true,
            (Failed, Recovering) | (Failed, Stopped) => true,
            (Recovering, Ready) | (Recovering, Draining) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(TaskState::Completed, true)]
    #[case(TaskState::Failed, true)]
    #[case(TaskState::Cancelled, true)]
    #[case(TaskState::Pending, false)]
    #[case(TaskState::Queued, false)]
    #[case(TaskState::Running, false)]
    #[case(TaskState::RetryScheduled, false)]
    fn terminal_task_states(#[case] state: TaskState, #[case] terminal: bool) {
        assert_eq!(state.is_terminal(), terminal);
    }

    #[rstest]
    #[case(AgentState::Initializing, AgentState::Ready)]
    #[case(AgentState::Ready, AgentState::Busy)]
    #[case(AgentState::Busy, AgentState::Ready)]
    #[case(AgentState::Busy, AgentState::Draining)]
    #[case(AgentState::Draining, AgentState::Stopped)]
    #[case(AgentState::Ready, AgentState::Failed)]
    #[case(AgentState::Failed, AgentState::Recovering)]
    #[case(AgentState::Recovering, AgentState::Ready)]
    fn allowed_agent_transitions(#[case] from: AgentState, #[case] to: AgentState) {
        assert!(from.can_transition_to(to));
    }

    #[rstest]
    #[case(AgentState::Stopped, AgentState::Ready)]
    #[case(AgentState::Stopped, AgentState::Failed)]
    #[case(AgentState::Draining, AgentState::Ready)]
    #[case(AgentState::Initializing, AgentState::Busy)]
    #[case(AgentState::Failed, AgentState::Ready)]
    fn rejected_agent_transitions(#[case] from: AgentState, #[case] to: AgentState) {
        assert!(!from.can_transition_to(to));
    }

    #[test]
    fn only_ready_and_busy_accept_work() {
        assert!(AgentState::Ready.is_accepting());
        assert!(AgentState::Busy.is_accepting());
        assert!(!AgentState::Draining.is_accepting());
        assert!(!AgentState::Recovering.is_accepting());
    }
}
