//! forge-core
//!
//! In-process task orchestration: tasks with dependencies, priorities and
//! retries, run by agents with bounded concurrency.
//!
//! # Modules
//! - **domain**: ids, task specs, states, outcomes, events, retry policy
//! - **config**: `OrchestratorConfig` / `AgentConfig`, TOML-loadable
//! - **ports**: collaborators the core calls (DataSource, CheckpointStore, Clock, ...)
//! - **impls**: port implementations shipped with the core
//! - **typed**: `Job` + `Handler` typed API, `HandlerRegistry`
//! - **bus**: topic pub/sub with bounded per-subscriber queues
//! - **registry**: agent lifecycle, health and capacity
//! - **app**: builder, orchestrator handle, coordinator actor
//!
//! ```ignore
//! let orchestrator = OrchestratorBuilder::new()
//!     .register::<PriceCheck, _>(PriceCheckHandler)?
//!     .build()
//!     .await?;
//! orchestrator.register_agent(AgentConfig::new("worker-1", 4)).await?;
//! let id = orchestrator.submit(TaskSpec::for_job("check", &job)?).await?;
//! ```

pub mod app;
pub mod bus;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod ports;
pub mod registry;
pub mod typed;

pub(crate) mod agent;
pub(crate) mod scheduler;

pub use self::app::{
    CancelOutcome, DrainReport, Orchestrator, OrchestratorBuilder, QueueCounts, TaskStatus,
};
pub use self::bus::{EventBus, Subscription};
pub use self::config::{AbandonPolicy, AgentConfig, OrchestratorConfig};
pub use self::domain::{
    AgentId, AgentState, AttemptRecord, AttemptResult, Event, FailureKind, Outcome, RetryPolicy,
    TaskEnvelope, TaskId, TaskSpec, TaskState, TaskType, Topic,
};
pub use self::error::{
    AgentError, ConfigError, DependencyIssue, HandlerError, OrchestratorError, RegistryError,
    SubmissionError, TaskError,
};
pub use self::registry::{AgentFilter, AgentHealth, AgentListing, AgentSummary};
pub use self::typed::{Handler, HandlerRegistry, Job, TaskContext, TaskHandler, handler_fn};
