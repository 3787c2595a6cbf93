//! Per-attempt execution context handed to handlers.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::domain::{AgentId, TaskEnvelope, TaskId, TaskType};
use crate::ports::{DataSource, FetchError};

/// Everything a handler may look at while running one attempt.
///
/// Cancellation is cooperative: the core signals `cancelled()` and waits for
/// the handler to return.
#[derive(Clone)]
pub struct TaskContext {
    task_id: TaskId,
    name: Arc<str>,
    attempt: u32,
    agent: AgentId,
    envelope: TaskEnvelope,
    cancel: CancellationToken,
    data_source: Option<Arc<dyn DataSource>>,
}

impl TaskContext {
    pub fn new(
        task_id: TaskId,
        name: Arc<str>,
        attempt: u32,
        agent: AgentId,
        envelope: TaskEnvelope,
        cancel: CancellationToken,
        data_source: Option<Arc<dyn DataSource>>,
    ) -> Self {
        Self {
            task_id,
            name,
            attempt,
            agent,
            envelope,
            cancel,
            data_source,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 1-indexed attempt number.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn agent(&self) -> AgentId {
        self.agent
    }

    pub fn task_type(&self) -> &TaskType {
        self.envelope.task_type()
    }

    pub fn payload(&self) -> &serde_json::Value {
        self.envelope.payload()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once cancellation (or a timeout under `WaitForReturn`) is signalled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Fetch through the orchestrator's data source.
    pub async fn fetch(
        &self,
        source: &str,
        params: &serde_json::Value,
    ) -> Result<serde_json::Value, FetchError> {
        let Some(data_source) = &self.data_source else {
            return Err(FetchError::NotConfigured);
        };
        data_source.fetch(source, params).await
    }
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("task_id", &self.task_id)
            .field("name", &self.name)
            .field("attempt", &self.attempt)
            .field("agent", &self.agent)
            .field("task_type", self.envelope.task_type())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
