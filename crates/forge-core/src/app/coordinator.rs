//! Coordinator actor.
//!
//! One tokio task owns the `Scheduler` and the `Registry`. Everything that
//! mutates them arrives as a message:
//! - `Command`s from `Orchestrator` handles, answered through `oneshot`
//! - `WorkerReport`s from agent worker loops
//! - timer ticks (health check, checkpoint, retry deadline, drain deadline)
//!
//! After every message the admission pass runs, so no state change waits
//! for a poll.

use std::collections::BTreeMap;
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::status::{CancelOutcome, DrainReport, QueueCounts, TaskStatus};
use crate::agent::worker::WorkerReport;
use crate::bus::EventBus;
use crate::config::AgentConfig;
use crate::domain::{AgentId, AgentState, Event, TaskId, TaskSpec};
use crate::error::{RegistryError, SubmissionError, TaskError};
use crate::ports::{CheckpointStore, SchedulerCheckpoint};
use crate::registry::{AgentFilter, AgentHealth, AgentListing, Registry};
use crate::scheduler::{CancelAction, Scheduler};

type Reply<T> = oneshot::Sender<T>;

pub(crate) enum Command {
    Submit {
        specs: Vec<TaskSpec>,
        reply: Reply<Result<Vec<TaskId>, SubmissionError>>,
    },
    Cancel {
        task: TaskId,
        reply: Reply<Result<CancelOutcome, TaskError>>,
    },
    RegisterAgent {
        config: AgentConfig,
        reply: Reply<Result<AgentId, RegistryError>>,
    },
    DeregisterAgent {
        agent: AgentId,
        reply: Reply<Result<DrainReport, RegistryError>>,
    },
    ListAgents {
        filter: AgentFilter,
        reply: Reply<AgentListing>,
    },
    AgentHealth {
        agent: AgentId,
        reply: Reply<Result<AgentHealth, RegistryError>>,
    },
    TaskStatus {
        task: TaskId,
        reply: Reply<Option<TaskStatus>>,
    },
    Counts {
        reply: Reply<QueueCounts>,
    },
    /// Kill an agent's worker loop without telling the registry.
    AbortAgent {
        agent: AgentId,
        reply: Reply<Result<(), RegistryError>>,
    },
    Snapshot {
        reply: Reply<SchedulerCheckpoint>,
    },
    /// Stop the actor. The reply carries the final checkpoint.
    Shutdown {
        reply: Reply<SchedulerCheckpoint>,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct Timing {
    pub health_check_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub drain_timeout: Duration,
    pub checkpoint_interval: Option<Duration>,
    pub recover_failed_agents: bool,
}

/// A deregistration waiting for running attempts to finish.
struct Drain {
    deadline: Instant,
    reassigned: usize,
    replies: Vec<Reply<Result<DrainReport, RegistryError>>>,
}

pub(crate) struct Coordinator {
    scheduler: Scheduler,
    registry: Registry,
    bus: EventBus,
    store: Option<Arc<dyn CheckpointStore>>,
    timing: Timing,
    commands: mpsc::Receiver<Command>,
    reports: mpsc::Receiver<WorkerReport>,
    drains: BTreeMap<AgentId, Drain>,
}

impl Coordinator {
    pub(crate) fn new(
        scheduler: Scheduler,
        registry: Registry,
        bus: EventBus,
        store: Option<Arc<dyn CheckpointStore>>,
        timing: Timing,
        commands: mpsc::Receiver<Command>,
        reports: mpsc::Receiver<WorkerReport>,
    ) -> Self {
        Self {
            scheduler,
            registry,
            bus,
            store,
            timing,
            commands,
            reports,
            drains: BTreeMap::new(),
        }
    }

    pub(crate) async fn run(mut self) {
        let mut health = every(self.timing.health_check_interval);
        let mut checkpoints = self.timing.checkpoint_interval.map(every);
        info!("coordinator started");

        loop {
            let retry_at = self.scheduler.next_retry_at();
            let drain_at = self.drains.values().map(|d| d.deadline).min();

            tokio::select! {
                Some(report) = self.reports.recv() => self.on_report(report),
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        let checkpoint = self.stop();
                        let _ = reply.send(checkpoint);
                        break;
                    }
                    Some(command) => self.on_command(command),
                    None => {
                        // Every handle is gone.
                        self.stop();
                        break;
                    }
                },
                _ = health.tick() => self.on_health_tick(),
                _ = tick(checkpoints.as_mut()) => self.periodic_checkpoint(),
                _ = sleep_until(retry_at) => {
                    let fired = self.scheduler.fire_due_retries(Instant::now());
                    debug!(fired, "retry timers fired");
                }
                _ = sleep_until(drain_at) => self.expire_drains(Instant::now()),
            }

            self.dispatch();
            self.finish_drains();
        }

        info!("coordinator stopped");
    }

    fn on_report(&mut self, report: WorkerReport) {
        match report {
            WorkerReport::Heartbeat { agent, epoch } => {
                self.registry.heartbeat(agent, epoch);
            }
            WorkerReport::AttemptFinished {
                agent,
                epoch,
                task,
                attempt,
                started_at,
                finished_at,
                outcome,
            } => {
                if self.registry.attempt_reported(agent, epoch, task, attempt) {
                    self.scheduler
                        .attempt_finished(task, agent, attempt, started_at, finished_at, outcome);
                } else {
                    debug!(agent = %agent, task = %task, epoch, "ignoring stale attempt report");
                }
            }
            WorkerReport::SlotReleased { agent, epoch, task } => {
                if self.registry.release_slot(agent, epoch, task) {
                    self.scheduler.slot_released(task);
                }
            }
        }
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Submit { specs, reply } => {
                let _ = reply.send(self.scheduler.submit(specs));
            }
            Command::Cancel { task, reply } => {
                let _ = reply.send(self.cancel(task));
            }
            Command::RegisterAgent { config, reply } => {
                let _ = reply.send(self.registry.register(config));
            }
            Command::DeregisterAgent { agent, reply } => self.deregister(agent, reply),
            Command::ListAgents { filter, reply } => {
                let _ = reply.send(self.registry.listing(filter));
            }
            Command::AgentHealth { agent, reply } => {
                let _ = reply.send(self.registry.health(agent));
            }
            Command::TaskStatus { task, reply } => {
                let _ = reply.send(self.scheduler.status(task));
            }
            Command::Counts { reply } => {
                let _ = reply.send(self.scheduler.counts());
            }
            Command::AbortAgent { agent, reply } => {
                let _ = reply.send(self.registry.abort_worker(agent));
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.scheduler.checkpoint());
            }
            Command::Shutdown { reply } => {
                // Handled in `run`; answer anyway so the caller never hangs.
                let _ = reply.send(self.scheduler.checkpoint());
            }
        }
    }

    fn cancel(&mut self, task: TaskId) -> Result<CancelOutcome, TaskError> {
        match self.scheduler.cancel(task)? {
            CancelAction::Cancelled { dequeue_from } => {
                if let Some(agent) = dequeue_from {
                    self.registry.remove_queued(agent, task);
                }
                Ok(CancelOutcome::Cancelled)
            }
            CancelAction::Signalled => Ok(CancelOutcome::Requested),
        }
    }

    // ────────────────────────────────────────────────────────────────────
    // Admission
    // ────────────────────────────────────────────────────────────────────

    /// Route ready tasks into agent queues, then start what agents have room for.
    ///
    /// Freed capacity is not signalled over the bus; `run` calls this after
    /// every command, report and timer tick instead.
    fn dispatch(&mut self) {
        if self.scheduler.has_ready() {
            for candidate in self.scheduler.ready_candidates() {
                // A pin to an agent that no longer exists is ignored.
                let target = match candidate.pinned {
                    Some(agent) if self.registry.contains(agent) => agent,
                    _ => match self.registry.pick_agent() {
                        Some(agent) => agent,
                        None => continue,
                    },
                };
                match self.registry.admit(target, candidate.task, candidate.key) {
                    Ok(()) => self.scheduler.mark_admitted(candidate.task, target),
                    Err(e) => {
                        debug!(task = %candidate.task, agent = %target, error = %e, "admission deferred");
                    }
                }
            }
        }

        for agent in self.registry.agent_ids() {
            while let Some(task) = self.registry.next_to_start(agent) {
                match self.scheduler.begin_attempt(task, agent) {
                    Some(assignment) => self.registry.start(agent, assignment),
                    // The scheduler already tracks the task elsewhere (or it is
                    // terminal), so the queue entry is stale and is dropped.
                    None => warn!(
                        task = %task,
                        agent = %agent,
                        state = ?self.scheduler.status(task).map(|s| s.state),
                        "queued task not startable on this agent, entry dropped"
                    ),
                }
            }
        }
    }

    // ────────────────────────────────────────────────────────────────────
    // Health
    // ────────────────────────────────────────────────────────────────────

    fn on_health_tick(&mut self) {
        let now = Instant::now();
        for agent in self.registry.stale_agents(now, self.timing.heartbeat_timeout) {
            self.fail_agent(agent, "heartbeat timeout");
        }
        self.scheduler.check_starvation(now);
    }

    fn fail_agent(&mut self, agent: AgentId, reason: &str) {
        let Some(failed) = self.registry.mark_failed(agent, reason) else {
            return;
        };
        self.scheduler.requeue(&failed.queued);
        let interrupted = failed.slots.lost.len();
        for (task, attempt) in failed.slots.lost {
            self.scheduler.attempt_lost(task, agent, attempt, reason);
        }
        for task in failed.slots.lingering {
            self.scheduler.slot_released(task);
        }

        if let Some(drain) = self.drains.remove(&agent) {
            let report = DrainReport {
                agent,
                reassigned: drain.reassigned + failed.queued.len(),
                interrupted,
                timed_out: false,
            };
            self.complete_drain(agent, report, drain.replies);
        } else if self.timing.recover_failed_agents {
            self.registry.recover(agent);
        }
    }

    // ────────────────────────────────────────────────────────────────────
    // Deregistration
    // ────────────────────────────────────────────────────────────────────

    fn deregister(&mut self, agent: AgentId, reply: Reply<Result<DrainReport, RegistryError>>) {
        if let Some(drain) = self.drains.get_mut(&agent) {
            drain.replies.push(reply);
            return;
        }
        let Some(state) = self.registry.state(agent) else {
            let _ = reply.send(Err(RegistryError::UnknownAgent(agent)));
            return;
        };
        let queued = match self.registry.begin_drain(agent) {
            Ok(queued) => queued,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };
        self.scheduler.requeue(&queued);

        if state == AgentState::Failed || self.registry.is_idle(agent) {
            let report = DrainReport {
                agent,
                reassigned: queued.len(),
                interrupted: 0,
                timed_out: false,
            };
            self.complete_drain(agent, report, vec![reply]);
            return;
        }
        self.drains.insert(
            agent,
            Drain {
                deadline: Instant::now() + self.timing.drain_timeout,
                reassigned: queued.len(),
                replies: vec![reply],
            },
        );
    }

    fn finish_drains(&mut self) {
        let idle: Vec<AgentId> = self
            .drains
            .keys()
            .copied()
            .filter(|agent| self.registry.is_idle(*agent))
            .collect();
        for agent in idle {
            if let Some(drain) = self.drains.remove(&agent) {
                let report = DrainReport {
                    agent,
                    reassigned: drain.reassigned,
                    interrupted: 0,
                    timed_out: false,
                };
                self.complete_drain(agent, report, drain.replies);
            }
        }
    }

    fn expire_drains(&mut self, now: Instant) {
        let expired: Vec<AgentId> = self
            .drains
            .iter()
            .filter(|(_, drain)| drain.deadline <= now)
            .map(|(agent, _)| *agent)
            .collect();
        for agent in expired {
            let Some(drain) = self.drains.remove(&agent) else {
                continue;
            };
            let slots = self.registry.interrupt(agent);
            let interrupted = slots.lost.len();
            for (task, attempt) in slots.lost {
                self.scheduler
                    .attempt_lost(task, agent, attempt, "drain timeout elapsed");
            }
            for task in slots.lingering {
                self.scheduler.slot_released(task);
            }
            warn!(agent = %agent, interrupted, "drain timed out");
            let report = DrainReport {
                agent,
                reassigned: drain.reassigned,
                interrupted,
                timed_out: true,
            };
            self.complete_drain(agent, report, drain.replies);
        }
    }

    fn complete_drain(
        &mut self,
        agent: AgentId,
        report: DrainReport,
        replies: Vec<Reply<Result<DrainReport, RegistryError>>>,
    ) {
        self.registry.remove(agent);
        info!(
            agent = %agent,
            reassigned = report.reassigned,
            interrupted = report.interrupted,
            timed_out = report.timed_out,
            "agent deregistered"
        );
        for reply in replies {
            let _ = reply.send(Ok(report));
        }
    }

    // ────────────────────────────────────────────────────────────────────
    // Persistence and shutdown
    // ────────────────────────────────────────────────────────────────────

    /// Save in the background so a slow store never stalls the actor.
    fn periodic_checkpoint(&self) {
        let Some(store) = self.store.clone() else {
            return;
        };
        let checkpoint = self.scheduler.checkpoint();
        let bus = self.bus.clone();
        tokio::spawn(async move {
            let tasks = checkpoint.tasks.len();
            match store.save_checkpoint(&checkpoint).await {
                Ok(()) => {
                    debug!(tasks, "periodic checkpoint saved");
                    bus.publish(Event::CheckpointSaved { tasks });
                }
                Err(e) => error!(error = %e, "periodic checkpoint failed"),
            }
        });
    }

    fn stop(&mut self) -> SchedulerCheckpoint {
        let checkpoint = self.scheduler.checkpoint();
        self.scheduler.cancel_all_running();
        self.registry.stop_all();
        for (agent, drain) in std::mem::take(&mut self.drains) {
            let report = DrainReport {
                agent,
                reassigned: drain.reassigned,
                interrupted: 0,
                timed_out: false,
            };
            for reply in drain.replies {
                let _ = reply.send(Ok(report));
            }
        }
        info!(live_tasks = checkpoint.tasks.len(), "coordinator stopping");
        checkpoint
    }
}

/// Interval whose first tick is one `period` away.
fn every(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => pending().await,
    }
}
