//! Error taxonomy.
//!
//! - `SubmissionError`: rejected synchronously, nothing enters the system.
//! - `HandlerError`: returned by task handlers, recovered by the retry policy.
//! - `RegistryError` / `AgentError` / `TaskError`: operation-level failures.
//! - `OrchestratorError`: umbrella returned by the `Orchestrator` handle.

use thiserror::Error;

use crate::domain::{AgentId, AgentState, FailureKind, TaskId, TaskState, TaskType};
use crate::ports::{FetchError, PersistenceError};

/// Invalid configuration value. Raised at construction, never later.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("failed to parse config: {0}")]
    Parse(String),
}

impl ConfigError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

/// Why a dependency set was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DependencyIssue {
    #[error("dependency cycle: {}", display_path(.0))]
    Cycle(Vec<TaskId>),

    #[error("unknown dependency {0}")]
    Unknown(TaskId),

    #[error("dependency {dependency} already ended as {state:?}")]
    Terminated {
        dependency: TaskId,
        state: TaskState,
    },
}

fn display_path(path: &[TaskId]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SubmissionError {
    #[error("invalid dependency for {task}: {issue}")]
    InvalidDependency { task: TaskId, issue: DependencyIssue },

    #[error("task id {0} is already registered")]
    DuplicateId(TaskId),

    #[error("no handler registered for task_type={0}")]
    HandlerNotFound(TaskType),

    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),

    #[error("empty submission")]
    Empty,
}

/// Error returned by a task handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Ordinary failure, retried per policy.
    #[error("{0}")]
    Failed(String),

    /// Failure that retrying cannot fix.
    #[error("permanent failure: {0}")]
    Permanent(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The handler observed its cancellation signal and stopped.
    #[error("cancelled")]
    Cancelled,

    #[error("payload decode: {0}")]
    Decode(#[from] serde_json::Error),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    /// How the attempt that returned this error is recorded.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            HandlerError::Failed(_) | HandlerError::Fetch(_) => FailureKind::Execution,
            HandlerError::Permanent(_) | HandlerError::Decode(_) => FailureKind::Permanent,
            HandlerError::Cancelled => FailureKind::Cancelled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgentError {
    #[error("agent {agent} queue is full (limit {limit})")]
    CapacityExceeded { agent: AgentId, limit: usize },

    #[error("agent {agent} is {state:?} and does not accept tasks")]
    NotAccepting { agent: AgentId, state: AgentState },

    #[error("agent {agent} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        agent: AgentId,
        from: AgentState,
        to: AgentState,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("agent id {0} is already registered")]
    DuplicateId(AgentId),

    #[error("unknown agent {0}")]
    UnknownAgent(AgentId),

    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),

    #[error(transparent)]
    Agent(#[from] AgentError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("unknown task {0}")]
    UnknownTask(TaskId),

    #[error("task {task} already ended as {state:?}")]
    AlreadyTerminal { task: TaskId, state: TaskState },
}

/// Umbrella error for the orchestrator API.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Submission(#[from] SubmissionError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("checkpoint references task types with no handler: {0:?}")]
    MissingTaskTypes(Vec<String>),

    #[error("checkpoint could not be restored: {0}")]
    Restore(SubmissionError),

    /// The coordinator has stopped (shutdown or panic).
    #[error("orchestrator is not running")]
    Closed,
}
