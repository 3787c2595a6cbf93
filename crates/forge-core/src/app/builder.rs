//! OrchestratorBuilder: wiring and start-up validation.
//!
//! Everything that can be wrong with a setup is reported by `build()`:
//! invalid config, expected task types without a handler, and a checkpoint
//! that cannot be restored. Nothing is spawned before those checks pass.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::info;

use super::coordinator::{Coordinator, Timing};
use super::orchestrator::{Orchestrator, OrchestratorInner};
use crate::agent::worker::WorkerEnv;
use crate::bus::EventBus;
use crate::config::OrchestratorConfig;
use crate::domain::{TaskType, Topic};
use crate::error::OrchestratorError;
use crate::ports::{
    CheckpointStore, Clock, DataSource, IdGenerator, NotificationSink, SystemClock, UlidGenerator,
};
use crate::registry::Registry;
use crate::scheduler::{Scheduler, SchedulerSettings};
use crate::typed::{Handler, HandlerRegistry, HandlerRegistryError, Job, TaskHandler};

/// ```ignore
/// let orchestrator = OrchestratorBuilder::new()
///     .config(config)
///     .register::<PriceCheck, _>(PriceCheckHandler)?
///     .expect_tasks(&[PriceCheck::TYPE])
///     .data_source(Arc::new(prices))
///     .checkpoint_store(store)
///     .build()
///     .await?;
/// ```
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    handlers: HandlerRegistry,
    expected_tasks: Option<Vec<String>>,
    data_source: Option<Arc<dyn DataSource>>,
    store: Option<Arc<dyn CheckpointStore>>,
    sinks: Vec<Arc<dyn NotificationSink>>,
    clock: Arc<dyn Clock>,
    ids: Option<Arc<dyn IdGenerator>>,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            config: OrchestratorConfig::default(),
            handlers: HandlerRegistry::new(),
            expected_tasks: None,
            data_source: None,
            store: None,
            sinks: Vec::new(),
            clock: Arc::new(SystemClock),
            ids: None,
        }
    }

    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn register<J: Job, H: Handler<J> + 'static>(
        mut self,
        handler: H,
    ) -> Result<Self, HandlerRegistryError> {
        self.handlers.register::<J, H>(handler)?;
        Ok(self)
    }

    pub fn register_dyn(
        mut self,
        task_type: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<Self, HandlerRegistryError> {
        self.handlers
            .register_dyn(TaskType::new(task_type), handler)?;
        Ok(self)
    }

    /// Replace the handler set wholesale.
    pub fn handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    /// Task types that must have a handler, checked by `build()`.
    pub fn expect_tasks(mut self, task_types: &[&str]) -> Self {
        self.expected_tasks = Some(task_types.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn data_source(mut self, data_source: Arc<dyn DataSource>) -> Self {
        self.data_source = Some(data_source);
        self
    }

    pub fn checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Deliver every event on every topic to `sink`.
    pub fn notification_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Validate, restore the last checkpoint if there is one, and start the
    /// coordinator. Must be called from within a Tokio runtime.
    pub async fn build(self) -> Result<Orchestrator, OrchestratorError> {
        let config = self.config;
        config.validate()?;

        if let Some(expected) = &self.expected_tasks {
            let registered = self.handlers.registered_types();
            let mut missing: Vec<String> = expected
                .iter()
                .filter(|t| !registered.iter().any(|r| r.as_str() == t.as_str()))
                .cloned()
                .collect();
            if !missing.is_empty() {
                missing.sort();
                missing.dedup();
                return Err(OrchestratorError::MissingTaskTypes(missing));
            }
        }

        let timing = Timing {
            health_check_interval: config.health_check_interval()?,
            heartbeat_timeout: config.heartbeat_timeout()?,
            drain_timeout: config.drain_timeout()?,
            checkpoint_interval: config.checkpoint_interval()?,
            recover_failed_agents: config.recover_failed_agents,
        };
        let settings = SchedulerSettings {
            default_priority: config.default_priority,
            retry_policy: config.retry_policy.clone(),
            starvation_threshold: config.starvation_threshold()?,
            tombstone_limit: config.tombstone_limit,
        };

        let clock = self.clock;
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(clock.clone())));
        let bus = EventBus::new(config.subscriber_queue_capacity);

        let mut scheduler = Scheduler::new(
            settings,
            self.handlers,
            ids.clone(),
            clock.clone(),
            bus.clone(),
        );
        if let Some(store) = &self.store {
            match store.load_checkpoint().await? {
                Some(checkpoint) => {
                    let restored = scheduler.restore(checkpoint)?;
                    info!(tasks = restored, "resumed from checkpoint");
                }
                None => info!("no checkpoint found, cold start"),
            }
        }

        let (report_tx, report_rx) = mpsc::channel(config.mailbox_capacity);
        let env = WorkerEnv {
            heartbeat_interval: config.heartbeat_interval()?,
            abandon_policy: config.abandon_policy,
            data_source: self.data_source,
            clock: clock.clone(),
            reports: report_tx,
        };
        let registry = Registry::new(env, ids, clock, bus.clone());

        let mut sinks = Vec::with_capacity(self.sinks.len() * Topic::ALL.len());
        for sink in &self.sinks {
            for topic in Topic::ALL {
                let sink = sink.clone();
                sinks.push(bus.subscribe(topic, move |event| sink.notify(&event)));
            }
        }

        let (command_tx, command_rx) = mpsc::channel(config.mailbox_capacity);
        let coordinator = Coordinator::new(
            scheduler,
            registry,
            bus.clone(),
            self.store.clone(),
            timing,
            command_rx,
            report_rx,
        );
        let join = tokio::spawn(coordinator.run());

        Ok(Orchestrator::from_inner(OrchestratorInner {
            commands: command_tx,
            bus,
            store: self.store,
            sinks: Mutex::new(sinks),
            coordinator: Mutex::new(Some(join)),
        }))
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Outcome, TaskEnvelope, TaskSpec, TaskState};
    use crate::error::{ConfigError, HandlerError, SubmissionError};
    use crate::impls::InMemoryCheckpointStore;
    use crate::ports::{CHECKPOINT_VERSION, PersistenceError, SchedulerCheckpoint, TaskCheckpoint};
    use crate::typed::handler::fixtures::{Echo, EchoHandler};
    use crate::typed::handler_fn;
    use chrono::Utc;

    fn noop() -> Arc<dyn TaskHandler> {
        Arc::new(handler_fn(|_| async { Ok::<_, HandlerError>(Outcome::empty()) }))
    }

    #[tokio::test]
    async fn build_succeeds_with_expected_tasks_registered() {
        let orchestrator = OrchestratorBuilder::new()
            .register::<Echo, _>(EchoHandler)
            .unwrap()
            .expect_tasks(&[Echo::TYPE])
            .build()
            .await;
        assert!(orchestrator.is_ok());
    }

    #[tokio::test]
    async fn build_reports_missing_task_types() {
        let result = OrchestratorBuilder::new()
            .register::<Echo, _>(EchoHandler)
            .unwrap()
            .expect_tasks(&[Echo::TYPE, "report.v1", "price_check.v1"])
            .build()
            .await;
        assert!(matches!(
            result,
            Err(OrchestratorError::MissingTaskTypes(missing))
                if missing == vec!["price_check.v1".to_string(), "report.v1".to_string()]
        ));
    }

    #[tokio::test]
    async fn invalid_config_fails_fast() {
        let config = OrchestratorConfig {
            heartbeat_interval_seconds: 5.0,
            heartbeat_timeout_seconds: 1.0,
            ..OrchestratorConfig::default()
        };
        let result = OrchestratorBuilder::new().config(config).build().await;
        assert!(matches!(
            result,
            Err(OrchestratorError::Config(ConfigError::Invalid {
                field: "heartbeat_timeout_seconds",
                ..
            }))
        ));
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let result = OrchestratorBuilder::new()
            .register_dyn("noop", noop())
            .unwrap()
            .register_dyn("noop", noop());
        assert!(matches!(
            result,
            Err(HandlerRegistryError::AlreadyRegistered(_))
        ));
    }

    fn checkpoint_with(task_type: &str) -> SchedulerCheckpoint {
        let spec = TaskSpec::new(
            "restored",
            TaskEnvelope::new(TaskType::new(task_type), serde_json::Value::Null),
        )
        .with_id(crate::domain::TaskId::from_u128(1));
        SchedulerCheckpoint {
            version: CHECKPOINT_VERSION,
            taken_at: Utc::now(),
            tasks: vec![TaskCheckpoint {
                spec,
                state: TaskState::Queued,
                attempts: 1,
                seq: 4,
            }],
            completed: vec![],
        }
    }

    #[tokio::test]
    async fn checkpoint_is_restored_on_build() {
        let store = Arc::new(InMemoryCheckpointStore::with_checkpoint(&checkpoint_with("noop")).unwrap());
        let orchestrator = OrchestratorBuilder::new()
            .register_dyn("noop", noop())
            .unwrap()
            .checkpoint_store(store)
            .build()
            .await
            .unwrap();

        let status = orchestrator
            .task_status(crate::domain::TaskId::from_u128(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status.state, TaskState::Queued);
        assert_eq!(status.attempts, 1);
    }

    #[tokio::test]
    async fn checkpoint_with_unknown_type_fails_build() {
        let store = Arc::new(InMemoryCheckpointStore::with_checkpoint(&checkpoint_with("gone.v1")).unwrap());
        let result = OrchestratorBuilder::new()
            .register_dyn("noop", noop())
            .unwrap()
            .checkpoint_store(store)
            .build()
            .await;
        assert!(matches!(
            result,
            Err(OrchestratorError::MissingTaskTypes(missing)) if missing == vec!["gone.v1".to_string()]
        ));
    }

    #[tokio::test]
    async fn unsupported_checkpoint_version_fails_build() {
        let mut checkpoint = checkpoint_with("noop");
        checkpoint.version = CHECKPOINT_VERSION + 1;
        let store = Arc::new(InMemoryCheckpointStore::with_checkpoint(&checkpoint).unwrap());
        let result = OrchestratorBuilder::new()
            .register_dyn("noop", noop())
            .unwrap()
            .checkpoint_store(store)
            .build()
            .await;
        assert!(matches!(
            result,
            Err(OrchestratorError::Persistence(PersistenceError::UnsupportedVersion { .. }))
        ));
    }

    #[tokio::test]
    async fn restored_ids_cannot_be_resubmitted() {
        let store = Arc::new(InMemoryCheckpointStore::with_checkpoint(&checkpoint_with("noop")).unwrap());
        let orchestrator = OrchestratorBuilder::new()
            .register_dyn("noop", noop())
            .unwrap()
            .checkpoint_store(store)
            .build()
            .await
            .unwrap();

        let spec = TaskSpec::new(
            "again",
            TaskEnvelope::new(TaskType::new("noop"), serde_json::Value::Null),
        )
        .with_id(crate::domain::TaskId::from_u128(1));
        assert!(matches!(
            orchestrator.submit(spec).await,
            Err(OrchestratorError::Submission(SubmissionError::DuplicateId(_)))
        ));
    }
}
