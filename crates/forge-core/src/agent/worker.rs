//! Agent worker loop.
//!
//! One loop per agent incarnation (`epoch`). It:
//! - sends a heartbeat every `heartbeat_interval` (the first one immediately),
//! - runs every `Assignment` it receives as its own task in a `JoinSet`,
//! - reports each attempt with `AttemptFinished` followed by `SlotReleased`.
//!
//! The loop never decides what to run; the coordinator only sends a `Start`
//! when the agent has a free slot. Aborting the loop drops the `JoinSet`,
//! which aborts every execution still in flight.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::AbandonPolicy;
use crate::domain::{AgentId, FailureKind, Outcome, TaskEnvelope, TaskId};
use crate::error::HandlerError;
use crate::ports::{Clock, DataSource};
use crate::typed::{TaskContext, TaskHandler};

/// Everything needed to run one attempt.
pub(crate) struct Assignment {
    pub task: TaskId,
    pub attempt: u32,
    pub name: Arc<str>,
    pub envelope: TaskEnvelope,
    pub handler: Arc<dyn TaskHandler>,
    pub timeout: Option<Duration>,
    pub cancel: CancellationToken,
}

pub(crate) enum WorkerCommand {
    Start(Assignment),
}

/// How one attempt ended, as seen by the worker.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum AttemptOutcome {
    Succeeded(Outcome),
    Failed { kind: FailureKind, message: String },
}

impl AttemptOutcome {
    fn failed(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Failed {
            kind,
            message: message.into(),
        }
    }
}

/// Messages from worker loops to the coordinator.
///
/// For a given attempt `AttemptFinished` always precedes `SlotReleased`;
/// both travel on the same channel.
#[derive(Debug)]
pub(crate) enum WorkerReport {
    Heartbeat {
        agent: AgentId,
        epoch: u64,
    },
    AttemptFinished {
        agent: AgentId,
        epoch: u64,
        task: TaskId,
        attempt: u32,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        outcome: AttemptOutcome,
    },
    SlotReleased {
        agent: AgentId,
        epoch: u64,
        task: TaskId,
    },
}

/// Shared by every worker loop of one orchestrator.
#[derive(Clone)]
pub(crate) struct WorkerEnv {
    pub heartbeat_interval: Duration,
    pub abandon_policy: AbandonPolicy,
    pub data_source: Option<Arc<dyn DataSource>>,
    pub clock: Arc<dyn Clock>,
    pub reports: mpsc::Sender<WorkerReport>,
}

/// Coordinator-side handle to a running worker loop.
pub(crate) struct WorkerHandle {
    commands: mpsc::UnboundedSender<WorkerCommand>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    pub(crate) fn spawn(agent: AgentId, epoch: u64, env: WorkerEnv) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let join = tokio::spawn(worker_loop(agent, epoch, rx, env));
        Self { commands, join }
    }

    /// Hand an attempt to the loop. `false` if the loop is gone.
    pub(crate) fn start(&self, assignment: Assignment) -> bool {
        self.commands
            .send(WorkerCommand::Start(assignment))
            .is_ok()
    }

    /// Stop the loop and every execution it owns.
    pub(crate) fn abort(&self) {
        self.join.abort();
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.join.abort();
    }
}

async fn worker_loop(
    agent: AgentId,
    epoch: u64,
    mut commands: mpsc::UnboundedReceiver<WorkerCommand>,
    env: WorkerEnv,
) {
    let mut executions = JoinSet::new();
    let mut heartbeat = tokio::time::interval(env.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!(agent = %agent, epoch, "worker loop started");

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                if env.reports.send(WorkerReport::Heartbeat { agent, epoch }).await.is_err() {
                    break;
                }
            }
            command = commands.recv() => match command {
                Some(WorkerCommand::Start(assignment)) => {
                    executions.spawn(run_attempt(agent, epoch, assignment, env.clone()));
                }
                None => break,
            },
            Some(joined) = executions.join_next(), if !executions.is_empty() => {
                if let Err(e) = joined
                    && e.is_panic()
                {
                    warn!(agent = %agent, error = %e, "attempt task panicked outside handler");
                }
            }
        }
    }

    debug!(agent = %agent, epoch, "worker loop stopped");
}

async fn run_attempt(agent: AgentId, epoch: u64, assignment: Assignment, env: WorkerEnv) {
    let Assignment {
        task,
        attempt,
        name,
        envelope,
        handler,
        timeout,
        cancel,
    } = assignment;

    let started_at = env.clock.now();
    let ctx = TaskContext::new(
        task,
        name,
        attempt,
        agent,
        envelope,
        cancel.clone(),
        env.data_source.clone(),
    );
    let execution = AssertUnwindSafe(handler.execute(ctx)).catch_unwind();

    let finish = |outcome: AttemptOutcome| WorkerReport::AttemptFinished {
        agent,
        epoch,
        task,
        attempt,
        started_at,
        finished_at: env.clock.now(),
        outcome,
    };

    let outcome = match (timeout, env.abandon_policy) {
        (None, _) => classify(execution.await),
        (Some(limit), AbandonPolicy::Abort) => {
            match tokio::time::timeout(limit, execution).await {
                Ok(result) => classify(result),
                Err(_) => {
                    cancel.cancel();
                    timed_out(limit)
                }
            }
        }
        (Some(limit), AbandonPolicy::WaitForReturn) => {
            tokio::pin!(execution);
            tokio::select! {
                result = &mut execution => classify(result),
                _ = tokio::time::sleep(limit) => {
                    cancel.cancel();
                    let _ = env.reports.send(finish(timed_out(limit))).await;
                    // The slot stays taken until the handler gives up.
                    let _ = execution.await;
                    let _ = env
                        .reports
                        .send(WorkerReport::SlotReleased { agent, epoch, task })
                        .await;
                    return;
                }
            }
        }
    };

    let _ = env.reports.send(finish(outcome)).await;
    let _ = env
        .reports
        .send(WorkerReport::SlotReleased { agent, epoch, task })
        .await;
}

fn classify(
    result: Result<Result<Outcome, HandlerError>, Box<dyn Any + Send>>,
) -> AttemptOutcome {
    match result {
        Ok(Ok(outcome)) => AttemptOutcome::Succeeded(outcome),
        Ok(Err(e)) => AttemptOutcome::failed(e.failure_kind(), e.to_string()),
        Err(panic) => AttemptOutcome::failed(FailureKind::Panicked, panic_message(&*panic)),
    }
}

fn timed_out(limit: Duration) -> AttemptOutcome {
    AttemptOutcome::failed(
        FailureKind::TimedOut,
        format!("exceeded timeout of {:.3}s", limit.as_secs_f64()),
    )
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskType;
    use crate::ports::SystemClock;
    use crate::typed::handler_fn;

    fn env(policy: AbandonPolicy) -> (WorkerEnv, mpsc::Receiver<WorkerReport>) {
        let (reports, rx) = mpsc::channel(64);
        let env = WorkerEnv {
            heartbeat_interval: Duration::from_millis(20),
            abandon_policy: policy,
            data_source: None,
            clock: Arc::new(SystemClock),
            reports,
        };
        (env, rx)
    }

    fn assignment(handler: Arc<dyn TaskHandler>, timeout: Option<Duration>) -> Assignment {
        Assignment {
            task: TaskId::from_u128(7),
            attempt: 1,
            name: Arc::from("t"),
            envelope: TaskEnvelope::new(TaskType::new("t"), serde_json::Value::Null),
            handler,
            timeout,
            cancel: CancellationToken::new(),
        }
    }

    /// Next report that is not a heartbeat.
    async fn next_report(rx: &mut mpsc::Receiver<WorkerReport>) -> WorkerReport {
        loop {
            let report = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("report in time")
                .expect("channel open");
            if !matches!(report, WorkerReport::Heartbeat { .. }) {
                return report;
            }
        }
    }

    async fn finished_outcome(rx: &mut mpsc::Receiver<WorkerReport>) -> AttemptOutcome {
        match next_report(rx).await {
            WorkerReport::AttemptFinished { outcome, .. } => outcome,
            other => panic!("expected AttemptFinished, got {other:?}"),
        }
    }

    async fn expect_slot_released(rx: &mut mpsc::Receiver<WorkerReport>) {
        assert!(matches!(
            next_report(rx).await,
            WorkerReport::SlotReleased { .. }
        ));
    }

    #[tokio::test]
    async fn first_heartbeat_is_immediate() {
        let (env, mut rx) = env(AbandonPolicy::Abort);
        let agent = AgentId::from_u128(1);
        let _worker = WorkerHandle::spawn(agent, 3, env);

        let report = tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            report,
            WorkerReport::Heartbeat { agent: a, epoch: 3 } if a == agent
        ));
    }

    #[tokio::test]
    async fn success_reports_finish_then_release() {
        let (env, mut rx) = env(AbandonPolicy::Abort);
        let worker = WorkerHandle::spawn(AgentId::from_u128(1), 0, env);
        let handler = Arc::new(handler_fn(|_| async {
            Ok::<_, HandlerError>(Outcome::with_output(serde_json::json!("done")))
        }));

        assert!(worker.start(assignment(handler, None)));

        assert_eq!(
            finished_outcome(&mut rx).await,
            AttemptOutcome::Succeeded(Outcome::with_output(serde_json::json!("done")))
        );
        expect_slot_released(&mut rx).await;
    }

    #[tokio::test]
    async fn panics_become_attempt_failures() {
        let (env, mut rx) = env(AbandonPolicy::Abort);
        let worker = WorkerHandle::spawn(AgentId::from_u128(1), 0, env);
        let handler = Arc::new(handler_fn(|_| async {
            if true {
                panic!("kaboom");
            }
            Ok::<_, HandlerError>(Outcome::empty())
        }));

        worker.start(assignment(handler, None));

        match finished_outcome(&mut rx).await {
            AttemptOutcome::Failed { kind, message } => {
                assert_eq!(kind, FailureKind::Panicked);
                assert!(message.contains("kaboom"));
            }
            other => panic!("unexpected {other:?}"),
        }
        expect_slot_released(&mut rx).await;
    }

    #[tokio::test]
    async fn abort_policy_frees_slot_at_deadline() {
        let (env, mut rx) = env(AbandonPolicy::Abort);
        let worker = WorkerHandle::spawn(AgentId::from_u128(1), 0, env);
        let handler = Arc::new(handler_fn(|_| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<_, HandlerError>(Outcome::empty())
        }));

        worker.start(assignment(handler, Some(Duration::from_millis(50))));

        assert!(matches!(
            finished_outcome(&mut rx).await,
            AttemptOutcome::Failed {
                kind: FailureKind::TimedOut,
                ..
            }
        ));
        expect_slot_released(&mut rx).await;
    }

    #[tokio::test]
    async fn wait_for_return_holds_slot_until_handler_returns() {
        let (env, mut rx) = env(AbandonPolicy::WaitForReturn);
        let worker = WorkerHandle::spawn(AgentId::from_u128(1), 0, env);
        let (returned_tx, mut returned_rx) = mpsc::unbounded_channel();
        let handler = Arc::new(handler_fn(move |ctx: TaskContext| {
            let returned_tx = returned_tx.clone();
            async move {
                ctx.cancelled().await;
                tokio::time::sleep(Duration::from_millis(50)).await;
                let _ = returned_tx.send(());
                Err(HandlerError::Cancelled)
            }
        }));

        worker.start(assignment(handler, Some(Duration::from_millis(30))));

        assert!(matches!(
            finished_outcome(&mut rx).await,
            AttemptOutcome::Failed {
                kind: FailureKind::TimedOut,
                ..
            }
        ));
        // Handler has not returned yet when the timeout is reported.
        assert!(returned_rx.try_recv().is_err());
        expect_slot_released(&mut rx).await;
        assert!(returned_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn aborting_the_loop_stops_heartbeats() {
        let (env, mut rx) = env(AbandonPolicy::Abort);
        let worker = WorkerHandle::spawn(AgentId::from_u128(1), 0, env);
        rx.recv().await.unwrap();

        worker.abort();
        tokio::time::sleep(Duration::from_millis(30)).await;
        while rx.try_recv().is_ok() {}

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());
    }
}
