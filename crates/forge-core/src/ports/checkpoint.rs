//! CheckpointStore port: persistence of scheduler state.
//!
//! The orchestrator saves a checkpoint every `checkpoint_interval_seconds`
//! and on graceful shutdown, and loads one at startup. `Ok(None)` from
//! `load_checkpoint` means cold start.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{TaskId, TaskSpec, TaskState};

pub const CHECKPOINT_VERSION: u32 = 1;

/// Serializable scheduler state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerCheckpoint {
    pub version: u32,
    pub taken_at: DateTime<Utc>,

    /// Non-terminal tasks in submission order.
    pub tasks: Vec<TaskCheckpoint>,

    /// Completed task ids that later submissions may still depend on.
    pub completed: Vec<TaskId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCheckpoint {
    /// `spec.id` is always set.
    pub spec: TaskSpec,
    pub state: TaskState,

    /// Finished attempts. An attempt that was still running is not counted.
    pub attempts: u32,

    /// Submission sequence; preserves FIFO order across restarts.
    pub seq: u64,
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("checkpoint version {found} is not supported (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("checkpoint encode/decode: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("checkpoint backend: {0}")]
    Backend(String),
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save_checkpoint(&self, checkpoint: &SchedulerCheckpoint)
    -> Result<(), PersistenceError>;

    async fn load_checkpoint(&self) -> Result<Option<SchedulerCheckpoint>, PersistenceError>;
}
