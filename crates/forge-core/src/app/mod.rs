//! App layer: wires the scheduler, registry and bus together.
//!
//! # Components
//! - **OrchestratorBuilder**: validates config, restores a checkpoint, spawns the coordinator
//! - **Orchestrator**: cloneable handle, the public API surface
//! - **Coordinator**: the actor that owns all mutable scheduling state
//! - **status**: read-side views (`TaskStatus`, `QueueCounts`, `DrainReport`)

pub mod builder;
pub(crate) mod coordinator;
pub mod orchestrator;
pub mod status;

pub use self::builder::OrchestratorBuilder;
pub use self::orchestrator::Orchestrator;
pub use self::status::{CancelOutcome, DrainReport, QueueCounts, TaskStatus};
