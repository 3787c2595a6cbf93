//! Attempt results and execution history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::AgentId;

/// What a successful handler returns.
///
/// The core never interprets `output`; it is handed to dependents' observers
/// through the `TaskCompleted` event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub output: serde_json::Value,
}

impl Outcome {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_output(output: serde_json::Value) -> Self {
        Self { output }
    }
}

/// Why an attempt did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// The handler returned an error.
    Execution,

    /// The handler returned an error that must not be retried.
    Permanent,

    /// The attempt exceeded its execution timeout.
    TimedOut,

    /// The handler panicked.
    Panicked,

    /// The owning agent stopped heartbeating, crashed, or was drained past its deadline.
    AgentLost,

    /// The attempt ended after cancellation was requested.
    Cancelled,
}

impl FailureKind {
    /// Does this kind of failure consume a retry (as opposed to ending the task)?
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            FailureKind::Execution
                | FailureKind::TimedOut
                | FailureKind::Panicked
                | FailureKind::AgentLost
        )
    }
}

/// Result of one attempt, as recorded in history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AttemptResult {
    Succeeded,
    Failed { kind: FailureKind, message: String },
}

impl AttemptResult {
    pub fn failed(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Failed {
            kind,
            message: message.into(),
        }
    }
}

/// A single finished execution attempt of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-indexed.
    pub attempt: u32,
    pub agent: AgentId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(flatten)]
    pub result: AttemptResult,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_kind_serializes_screaming() {
        let s = serde_json::to_string(&FailureKind::AgentLost).unwrap();
        assert_eq!(s, "\"AGENT_LOST\"");
    }

    #[test]
    fn attempt_record_is_flat_json() {
        let now = Utc::now();
        let record = AttemptRecord {
            attempt: 2,
            agent: AgentId::from_u128(9),
            started_at: now,
            finished_at: now,
            result: AttemptResult::failed(FailureKind::TimedOut, "deadline"),
        };
        let v = serde_json::to_value(&record).unwrap();
        assert_eq!(v["result"], "failed");
        assert_eq!(v["kind"], "TIMED_OUT");
        assert_eq!(v["message"], "deadline");
    }

    #[test]
    fn only_infrastructure_and_execution_failures_retry() {
        assert!(FailureKind::Execution.is_retryable());
        assert!(FailureKind::AgentLost.is_retryable());
        assert!(!FailureKind::Permanent.is_retryable());
        assert!(!FailureKind::Cancelled.is_retryable());
    }
}
