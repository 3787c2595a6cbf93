//! Domain model: ids, task descriptions, states, outcomes, events, retry policy.

pub mod events;
pub mod ids;
pub mod outcome;
pub mod retry;
pub mod state;
pub mod task;

pub use events::{Event, Topic};
pub use ids::{AgentId, TaskId};
pub use outcome::{AttemptRecord, AttemptResult, FailureKind, Outcome};
pub use retry::RetryPolicy;
pub use state::{AgentState, TaskState};
pub use task::{TaskEnvelope, TaskSpec, TaskType};
