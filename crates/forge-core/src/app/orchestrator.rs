//! Orchestrator: the cloneable handle every caller talks to.
//!
//! Each method sends one `Command` to the coordinator and awaits its reply.
//! Once the coordinator has stopped every call returns
//! `OrchestratorError::Closed`.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::coordinator::Command;
use super::status::{CancelOutcome, DrainReport, QueueCounts, TaskStatus};
use crate::bus::{EventBus, Subscription};
use crate::config::AgentConfig;
use crate::domain::{AgentId, Event, TaskId, TaskSpec, Topic};
use crate::error::{OrchestratorError, SubmissionError};
use crate::ports::{CheckpointStore, NotificationSink, SchedulerCheckpoint};
use crate::registry::{AgentFilter, AgentHealth, AgentListing};

#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<OrchestratorInner>,
}

pub(crate) struct OrchestratorInner {
    pub commands: mpsc::Sender<Command>,
    pub bus: EventBus,
    pub store: Option<Arc<dyn CheckpointStore>>,
    /// Notification sinks stay subscribed while any handle is alive.
    pub sinks: Mutex<Vec<Subscription>>,
    pub coordinator: Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    pub(crate) fn from_inner(inner: OrchestratorInner) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, OrchestratorError> {
        let (reply, rx) = oneshot::channel();
        self.inner
            .commands
            .send(command(reply))
            .await
            .map_err(|_| OrchestratorError::Closed)?;
        rx.await.map_err(|_| OrchestratorError::Closed)
    }

    // ── tasks ───────────────────────────────────────────────────────────

    pub async fn submit(&self, spec: TaskSpec) -> Result<TaskId, OrchestratorError> {
        let ids = self.submit_batch(vec![spec]).await?;
        ids.into_iter()
            .next()
            .ok_or(OrchestratorError::Submission(SubmissionError::Empty))
    }

    /// Submit several tasks atomically: either all are accepted or none is.
    /// Tasks in one batch may depend on each other.
    pub async fn submit_batch(&self, specs: Vec<TaskSpec>) -> Result<Vec<TaskId>, OrchestratorError> {
        let ids = self
            .request(|reply| Command::Submit { specs, reply })
            .await??;
        Ok(ids)
    }

    pub async fn cancel(&self, task: TaskId) -> Result<CancelOutcome, OrchestratorError> {
        Ok(self.request(|reply| Command::Cancel { task, reply }).await??)
    }

    pub async fn task_status(&self, task: TaskId) -> Result<Option<TaskStatus>, OrchestratorError> {
        self.request(|reply| Command::TaskStatus { task, reply }).await
    }

    pub async fn counts(&self) -> Result<QueueCounts, OrchestratorError> {
        self.request(|reply| Command::Counts { reply }).await
    }

    // ── agents ──────────────────────────────────────────────────────────

    pub async fn register_agent(&self, config: AgentConfig) -> Result<AgentId, OrchestratorError> {
        Ok(self
            .request(|reply| Command::RegisterAgent { config, reply })
            .await??)
    }

    /// Drain and remove an agent. Resolves once its running attempts have
    /// finished or the drain timeout has elapsed.
    pub async fn deregister_agent(&self, agent: AgentId) -> Result<DrainReport, OrchestratorError> {
        Ok(self
            .request(|reply| Command::DeregisterAgent { agent, reply })
            .await??)
    }

    pub async fn list_agents(&self, filter: AgentFilter) -> Result<AgentListing, OrchestratorError> {
        self.request(|reply| Command::ListAgents { filter, reply })
            .await
    }

    pub async fn agent_health(&self, agent: AgentId) -> Result<AgentHealth, OrchestratorError> {
        Ok(self
            .request(|reply| Command::AgentHealth { agent, reply })
            .await??)
    }

    /// Kill an agent's worker loop as if it had crashed. The heartbeat check
    /// then handles it like any other failure.
    pub async fn abort_agent(&self, agent: AgentId) -> Result<(), OrchestratorError> {
        Ok(self
            .request(|reply| Command::AbortAgent { agent, reply })
            .await??)
    }

    // ── events ──────────────────────────────────────────────────────────

    pub fn subscribe<F>(&self, topic: Topic, callback: F) -> Subscription
    where
        F: FnMut(Event) + Send + 'static,
    {
        self.inner.bus.subscribe(topic, callback)
    }

    pub fn subscribe_channel(&self, topic: Topic) -> (Subscription, mpsc::UnboundedReceiver<Event>) {
        self.inner.bus.subscribe_channel(topic)
    }

    /// Forward `topic` to `sink` for as long as the orchestrator lives.
    pub fn attach_sink(&self, topic: Topic, sink: Arc<dyn NotificationSink>) {
        let subscription = self
            .inner
            .bus
            .subscribe(topic, move |event| sink.notify(&event));
        self.inner.sinks.lock().push(subscription);
    }

    // ── persistence and lifecycle ───────────────────────────────────────

    /// Take a checkpoint now and save it if a store is configured.
    pub async fn checkpoint_now(&self) -> Result<SchedulerCheckpoint, OrchestratorError> {
        let checkpoint = self.request(|reply| Command::Snapshot { reply }).await?;
        self.save(&checkpoint).await?;
        Ok(checkpoint)
    }

    /// Stop the coordinator, cancel running attempts and save a final
    /// checkpoint. Other handles observe `Closed` afterwards.
    pub async fn shutdown(self) -> Result<SchedulerCheckpoint, OrchestratorError> {
        let checkpoint = self.request(|reply| Command::Shutdown { reply }).await?;
        let join = self.inner.coordinator.lock().take();
        if let Some(join) = join
            && let Err(e) = join.await
        {
            error!(error = %e, "coordinator task ended abnormally");
        }
        self.save(&checkpoint).await?;
        info!(live_tasks = checkpoint.tasks.len(), "orchestrator shut down");
        Ok(checkpoint)
    }

    async fn save(&self, checkpoint: &SchedulerCheckpoint) -> Result<(), OrchestratorError> {
        let Some(store) = &self.inner.store else {
            return Ok(());
        };
        if let Err(e) = store.save_checkpoint(checkpoint).await {
            error!(error = %e, "checkpoint save failed");
            return Err(e.into());
        }
        self.inner.bus.publish(Event::CheckpointSaved {
            tasks: checkpoint.tasks.len(),
        });
        Ok(())
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("closed", &self.inner.commands.is_closed())
            .finish()
    }
}
