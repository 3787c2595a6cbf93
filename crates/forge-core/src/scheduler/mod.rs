//! Scheduler: owns every task that is not terminal yet.
//!
//! Responsibilities:
//! - validate submissions (ids, handlers, dependencies, cycles) atomically
//! - keep the ready set ordered by priority, then submission order
//! - route attempt results into completion, retry or terminal failure
//! - cascade failures to dependents
//! - keep a bounded set of tombstones for finished tasks
//!
//! Routing to agents is not done here; the coordinator pairs
//! `ready_candidates` with the registry and calls back `mark_admitted`.

mod graph;
mod record;

use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use self::graph::DependencyGraph;
use self::record::{FinishedTask, RetryTimer, RunningInfo, TaskRecord};
use crate::agent::QueueKey;
use crate::agent::worker::{Assignment, AttemptOutcome};
use crate::app::status::{QueueCounts, TaskStatus};
use crate::bus::EventBus;
use crate::domain::{
    AgentId, AttemptRecord, AttemptResult, Event, FailureKind, RetryPolicy, TaskId, TaskSpec,
    TaskState,
};
use crate::error::{
    ConfigError, DependencyIssue, OrchestratorError, SubmissionError, TaskError,
};
use crate::ports::{
    CHECKPOINT_VERSION, Clock, IdGenerator, PersistenceError, SchedulerCheckpoint,
    TaskCheckpoint,
};
use crate::typed::HandlerRegistry;

/// Defaults applied to submitted tasks.
#[derive(Debug, Clone)]
pub(crate) struct SchedulerSettings {
    pub default_priority: i32,
    pub retry_policy: RetryPolicy,
    pub starvation_threshold: Duration,
    pub tombstone_limit: usize,
}

/// What `cancel` did to a task that was not running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CancelAction {
    /// Terminal now. `dequeue_from` names the agent whose queue still lists it.
    Cancelled { dequeue_from: Option<AgentId> },
    /// Running: the handler was signalled.
    Signalled,
}

/// A ready task waiting for an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Candidate {
    pub task: TaskId,
    pub pinned: Option<AgentId>,
    pub key: QueueKey,
}

enum Terminal {
    Completed(serde_json::Value),
    Failed,
    Cancelled,
}

/// A task entering the scheduler, either submitted or restored.
struct Incoming {
    spec: TaskSpec,
    seq: Option<u64>,
    attempts: u32,
}

pub(crate) struct Scheduler {
    settings: SchedulerSettings,
    handlers: HandlerRegistry,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    bus: EventBus,

    tasks: HashMap<TaskId, TaskRecord>,
    finished: HashMap<TaskId, FinishedTask>,
    /// Tombstones oldest first; the front is released past `tombstone_limit`.
    finished_order: VecDeque<TaskId>,
    /// Terminal totals, including released tombstones.
    retired: QueueCounts,
    graph: DependencyGraph,
    ready: BTreeMap<QueueKey, TaskId>,
    retries: BinaryHeap<RetryTimer>,
    next_seq: u64,
}

impl Scheduler {
    pub(crate) fn new(
        settings: SchedulerSettings,
        handlers: HandlerRegistry,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
        bus: EventBus,
    ) -> Self {
        Self {
            settings,
            handlers,
            ids,
            clock,
            bus,
            tasks: HashMap::new(),
            finished: HashMap::new(),
            finished_order: VecDeque::new(),
            retired: QueueCounts::default(),
            graph: DependencyGraph::new(),
            ready: BTreeMap::new(),
            retries: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    // ────────────────────────────────────────────────────────────────────
    // Submission
    // ────────────────────────────────────────────────────────────────────

    /// Accept all of `specs` or none of them.
    pub(crate) fn submit(&mut self, specs: Vec<TaskSpec>) -> Result<Vec<TaskId>, SubmissionError> {
        let incoming = specs
            .into_iter()
            .map(|spec| Incoming {
                spec,
                seq: None,
                attempts: 0,
            })
            .collect();
        self.accept(incoming)
    }

    fn accept(&mut self, incoming: Vec<Incoming>) -> Result<Vec<TaskId>, SubmissionError> {
        if incoming.is_empty() {
            return Err(SubmissionError::Empty);
        }

        // 1. ids, config, handlers
        let mut batch: HashSet<TaskId> = HashSet::with_capacity(incoming.len());
        let mut prepared = Vec::with_capacity(incoming.len());
        for mut item in incoming {
            let id = match item.spec.id {
                Some(id) => id,
                None => self.ids.task_id(),
            };
            item.spec.id = Some(id);
            if self.tasks.contains_key(&id) || self.finished.contains_key(&id) || !batch.insert(id)
            {
                return Err(SubmissionError::DuplicateId(id));
            }
            if let Some(timeout) = item.spec.timeout
                && timeout.is_zero()
            {
                return Err(ConfigError::invalid("timeout", "must be greater than 0").into());
            }
            let task_type = item.spec.envelope.task_type();
            let handler = self
                .handlers
                .get(task_type)
                .ok_or_else(|| SubmissionError::HandlerNotFound(task_type.clone()))?;
            prepared.push((id, item, handler));
        }

        // 2. every dependency is live, in this batch, or completed
        for (id, item, _) in &prepared {
            for dep in &item.spec.dependencies {
                if batch.contains(dep) || self.tasks.contains_key(dep) {
                    continue;
                }
                let issue = match self.finished.get(dep) {
                    Some(done) if done.state == TaskState::Completed => continue,
                    Some(done) => DependencyIssue::Terminated {
                        dependency: *dep,
                        state: done.state,
                    },
                    None => DependencyIssue::Unknown(*dep),
                };
                return Err(SubmissionError::InvalidDependency { task: *id, issue });
            }
        }

        // 3. no cycles through the new edges
        let overlay: Vec<(TaskId, &BTreeSet<TaskId>)> = prepared
            .iter()
            .map(|(id, item, _)| (*id, &item.spec.dependencies))
            .collect();
        if let Some(cycle) = self.graph.find_cycle(&overlay) {
            return Err(SubmissionError::InvalidDependency {
                task: cycle[0],
                issue: DependencyIssue::Cycle(cycle),
            });
        }

        // 4. commit
        for (id, _, _) in &prepared {
            self.graph.add_node(*id);
        }
        let now = Instant::now();
        let mut ids = Vec::with_capacity(prepared.len());
        for (id, item, handler) in prepared {
            let mut unmet = 0;
            for dep in &item.spec.dependencies {
                if self.graph.contains(*dep) {
                    self.graph.add_edge(id, *dep);
                    unmet += 1;
                }
            }
            let seq = match item.seq {
                Some(seq) => {
                    self.next_seq = self.next_seq.max(seq + 1);
                    seq
                }
                None => {
                    let seq = self.next_seq;
                    self.next_seq += 1;
                    seq
                }
            };
            let spec = item.spec;
            let record = TaskRecord {
                id,
                name: Arc::from(spec.name.as_str()),
                priority: spec.priority.unwrap_or(self.settings.default_priority),
                retry: spec
                    .retry_policy
                    .clone()
                    .unwrap_or_else(|| self.settings.retry_policy.clone()),
                handler,
                seq,
                state: TaskState::Pending,
                attempts: item.attempts,
                history: Vec::new(),
                unmet,
                agent: None,
                running: None,
                cancel_requested: false,
                lingering: false,
                retry_due: false,
                retry_at: None,
                queued_since: None,
                starved_reported: false,
                spec,
            };
            self.bus.publish(Event::TaskSubmitted {
                task: id,
                name: record.spec.name.clone(),
            });
            debug!(task = %id, name = %record.name, unmet, "task submitted");
            self.tasks.insert(id, record);
            ids.push(id);
        }
        for id in &ids {
            if self.tasks.get(id).is_some_and(|r| r.unmet == 0) {
                self.make_ready(*id, now);
            }
        }
        Ok(ids)
    }

    fn make_ready(&mut self, id: TaskId, now: Instant) {
        let Some(record) = self.tasks.get_mut(&id) else {
            return;
        };
        record.state = TaskState::Queued;
        record.agent = None;
        record.queued_since = Some(now);
        record.starved_reported = false;
        self.ready.insert(record.queue_key(), id);
    }

    // ────────────────────────────────────────────────────────────────────
    // Admission and attempts
    // ────────────────────────────────────────────────────────────────────

    /// Ready tasks in admission order.
    pub(crate) fn ready_candidates(&self) -> Vec<Candidate> {
        self.ready
            .iter()
            .filter_map(|(key, id)| {
                self.tasks.get(id).map(|r| Candidate {
                    task: *id,
                    pinned: r.spec.assign_to,
                    key: *key,
                })
            })
            .collect()
    }

    pub(crate) fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    /// The task left the ready set for `agent`'s queue.
    pub(crate) fn mark_admitted(&mut self, id: TaskId, agent: AgentId) {
        let Some(record) = self.tasks.get_mut(&id) else {
            return;
        };
        self.ready.remove(&record.queue_key());
        record.agent = Some(agent);
        record.queued_since = None;
        debug!(task = %id, agent = %agent, priority = record.priority, "task admitted");
        self.bus.publish(Event::TaskAdmitted { task: id, agent });
    }

    /// Open the next attempt of a task that `agent` is about to start.
    pub(crate) fn begin_attempt(&mut self, id: TaskId, agent: AgentId) -> Option<Assignment> {
        let record = self.tasks.get_mut(&id)?;
        if record.state != TaskState::Queued || record.agent != Some(agent) {
            return None;
        }
        let attempt = record.attempts + 1;
        let cancel = CancellationToken::new();
        record.state = TaskState::Running;
        record.running = Some(RunningInfo {
            attempt,
            cancel: cancel.clone(),
            started_at: self.clock.now(),
        });
        debug!(task = %id, agent = %agent, attempt, "attempt started");
        self.bus.publish(Event::TaskStarted {
            task: id,
            agent,
            attempt,
        });
        Some(Assignment {
            task: id,
            attempt,
            name: record.name.clone(),
            envelope: record.spec.envelope.clone(),
            handler: record.handler.clone(),
            timeout: record.spec.timeout,
            cancel,
        })
    }

    /// The worker reported the end of an attempt. Stale reports are ignored.
    pub(crate) fn attempt_finished(
        &mut self,
        id: TaskId,
        agent: AgentId,
        attempt: u32,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        outcome: AttemptOutcome,
    ) {
        if !self.is_current_attempt(id, agent, attempt) {
            debug!(task = %id, agent = %agent, attempt, "ignoring stale attempt report");
            return;
        }
        self.close_attempt(id, agent, attempt, started_at, finished_at, outcome, true);
    }

    /// The attempt's agent was lost before it reported.
    pub(crate) fn attempt_lost(&mut self, id: TaskId, agent: AgentId, attempt: u32, reason: &str) {
        if !self.is_current_attempt(id, agent, attempt) {
            return;
        }
        let started_at = self
            .tasks
            .get(&id)
            .and_then(|r| r.running.as_ref())
            .map_or_else(|| self.clock.now(), |r| r.started_at);
        let outcome = AttemptOutcome::Failed {
            kind: FailureKind::AgentLost,
            message: reason.to_string(),
        };
        self.close_attempt(id, agent, attempt, started_at, self.clock.now(), outcome, false);
    }

    fn is_current_attempt(&self, id: TaskId, agent: AgentId, attempt: u32) -> bool {
        self.tasks.get(&id).is_some_and(|r| {
            r.state == TaskState::Running
                && r.agent == Some(agent)
                && r.running.as_ref().is_some_and(|run| run.attempt == attempt)
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn close_attempt(
        &mut self,
        id: TaskId,
        agent: AgentId,
        attempt: u32,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        outcome: AttemptOutcome,
        lingering: bool,
    ) {
        let Some(record) = self.tasks.get_mut(&id) else {
            return;
        };
        let result = match &outcome {
            AttemptOutcome::Succeeded(_) => AttemptResult::Succeeded,
            AttemptOutcome::Failed { kind, message } => AttemptResult::failed(*kind, message.clone()),
        };
        record.history.push(AttemptRecord {
            attempt,
            agent,
            started_at,
            finished_at,
            result,
        });
        record.attempts = attempt;
        record.running = None;
        record.agent = None;
        record.lingering = lingering;

        if record.cancel_requested {
            self.finalize(id, Terminal::Cancelled);
            return;
        }

        match outcome {
            AttemptOutcome::Succeeded(out) => self.finalize(id, Terminal::Completed(out.output)),
            AttemptOutcome::Failed { kind, message } => {
                if kind.is_retryable() && !record.retry.is_exhausted(record.attempts) {
                    let delay = record.retry.delay_for(record.attempts);
                    let at = Instant::now() + delay;
                    record.state = TaskState::RetryScheduled;
                    record.retry_at = Some(at);
                    record.retry_due = false;
                    self.retries.push(RetryTimer { at, task: id });
                    info!(
                        task = %id,
                        attempt,
                        kind = ?kind,
                        delay_secs = delay.as_secs_f64(),
                        error = %message,
                        "attempt failed, retry scheduled"
                    );
                    self.bus.publish(Event::TaskRetryScheduled {
                        task: id,
                        attempt: attempt + 1,
                        delay,
                        reason: message,
                    });
                } else {
                    warn!(task = %id, attempts = attempt, kind = ?kind, error = %message, "task failed");
                    self.finalize(id, Terminal::Failed);
                }
            }
        }
    }

    /// The slot of the last attempt was freed on its agent.
    pub(crate) fn slot_released(&mut self, id: TaskId) {
        let Some(record) = self.tasks.get_mut(&id) else {
            return;
        };
        record.lingering = false;
        if record.retry_due {
            record.retry_due = false;
            self.make_ready(id, Instant::now());
        }
    }

    /// Tasks handed back from an agent queue (drain, failure). Pins are cleared.
    pub(crate) fn requeue(&mut self, ids: &[TaskId]) {
        let now = Instant::now();
        for &id in ids {
            let Some(record) = self.tasks.get_mut(&id) else {
                continue;
            };
            if record.state != TaskState::Queued {
                continue;
            }
            record.spec.assign_to = None;
            debug!(task = %id, "task reassigned to scheduler");
            self.make_ready(id, now);
        }
    }

    // ────────────────────────────────────────────────────────────────────
    // Retry timers
    // ────────────────────────────────────────────────────────────────────

    /// Earliest pending retry deadline. Stale heap entries are dropped.
    pub(crate) fn next_retry_at(&mut self) -> Option<Instant> {
        while let Some(timer) = self.retries.peek() {
            if self.timer_is_live(timer) {
                return Some(timer.at);
            }
            self.retries.pop();
        }
        None
    }

    /// Move every retry due at `now` back to the ready set.
    pub(crate) fn fire_due_retries(&mut self, now: Instant) -> usize {
        let mut fired = 0;
        while let Some(timer) = self.retries.peek() {
            if timer.at > now {
                break;
            }
            let Some(timer) = self.retries.pop() else {
                break;
            };
            if !self.timer_is_live(&timer) {
                continue;
            }
            let Some(record) = self.tasks.get_mut(&timer.task) else {
                continue;
            };
            record.retry_at = None;
            if record.lingering {
                record.retry_due = true;
            } else {
                self.make_ready(timer.task, now);
            }
            fired += 1;
        }
        fired
    }

    fn timer_is_live(&self, timer: &RetryTimer) -> bool {
        self.tasks.get(&timer.task).is_some_and(|r| {
            r.state == TaskState::RetryScheduled && r.retry_at == Some(timer.at)
        })
    }

    // ────────────────────────────────────────────────────────────────────
    // Cancellation and terminal transitions
    // ────────────────────────────────────────────────────────────────────

    pub(crate) fn cancel(&mut self, id: TaskId) -> Result<CancelAction, TaskError> {
        if let Some(done) = self.finished.get(&id) {
            return Err(TaskError::AlreadyTerminal {
                task: id,
                state: done.state,
            });
        }
        let record = self.tasks.get_mut(&id).ok_or(TaskError::UnknownTask(id))?;
        if record.state == TaskState::Running {
            record.cancel_requested = true;
            if let Some(running) = &record.running {
                running.cancel.cancel();
            }
            info!(task = %id, "cancellation requested for running task");
            return Ok(CancelAction::Signalled);
        }
        let dequeue_from = record.agent;
        self.finalize(id, Terminal::Cancelled);
        Ok(CancelAction::Cancelled { dequeue_from })
    }

    fn finalize(&mut self, id: TaskId, terminal: Terminal) {
        let Some(record) = self.tasks.remove(&id) else {
            return;
        };
        self.ready.remove(&record.queue_key());

        let (state, output) = match terminal {
            Terminal::Completed(output) => (TaskState::Completed, Some(output)),
            Terminal::Failed => (TaskState::Failed, None),
            Terminal::Cancelled => (TaskState::Cancelled, None),
        };

        match state {
            TaskState::Completed => {
                info!(task = %id, attempts = record.attempts, "task completed");
                self.bus.publish(Event::TaskCompleted {
                    task: id,
                    attempts: record.attempts,
                    output: output.clone().unwrap_or_default(),
                });
                let now = Instant::now();
                for dependent in self.graph.dependents(id) {
                    let Some(waiting) = self.tasks.get_mut(&dependent) else {
                        continue;
                    };
                    waiting.unmet = waiting.unmet.saturating_sub(1);
                    if waiting.unmet == 0 && waiting.state == TaskState::Pending {
                        self.make_ready(dependent, now);
                    }
                }
                self.graph.remove(id);
            }
            TaskState::Failed => {
                self.bus.publish(Event::TaskFailed {
                    task: id,
                    attempts: record.attempts,
                    history: record.history.clone(),
                });
                self.cascade(id);
            }
            _ => {
                info!(task = %id, "task cancelled");
                self.bus.publish(Event::TaskCancelled { task: id });
                self.cascade(id);
            }
        }

        self.retire(
            id,
            FinishedTask {
                name: record.name,
                state,
                priority: record.priority,
                attempts: record.attempts,
                history: record.history,
                output,
            },
        );
    }

    /// Cancel every live task that transitively waits for `root`.
    fn cascade(&mut self, root: TaskId) {
        let victims = self.graph.transitive_dependents(root);
        self.graph.remove(root);
        for victim in victims {
            self.graph.remove(victim);
            let Some(record) = self.tasks.remove(&victim) else {
                continue;
            };
            self.ready.remove(&record.queue_key());
            warn!(task = %victim, dependency = %root, "task cancelled by failed dependency");
            self.bus.publish(Event::DependencyFailed {
                task: victim,
                failed_dependency: root,
            });
            self.retire(
                victim,
                FinishedTask {
                    name: record.name,
                    state: TaskState::Cancelled,
                    priority: record.priority,
                    attempts: record.attempts,
                    history: record.history,
                    output: None,
                },
            );
        }
    }

    /// Keep a tombstone, releasing the oldest ones past the limit.
    ///
    /// Live tasks never wait on a tombstone: completion already satisfied
    /// their edge, and failure cancelled them. Released ids are unknown to
    /// later submissions and status queries.
    fn retire(&mut self, id: TaskId, done: FinishedTask) {
        match done.state {
            TaskState::Completed => self.retired.completed += 1,
            TaskState::Failed => self.retired.failed += 1,
            _ => self.retired.cancelled += 1,
        }
        if self.finished.insert(id, done).is_none() {
            self.finished_order.push_back(id);
        }
        while self.finished_order.len() > self.settings.tombstone_limit {
            let Some(oldest) = self.finished_order.pop_front() else {
                break;
            };
            self.finished.remove(&oldest);
            debug!(task = %oldest, "tombstone released");
        }
    }

    // ────────────────────────────────────────────────────────────────────
    // Starvation
    // ────────────────────────────────────────────────────────────────────

    /// Report tasks that have waited in the ready set past the threshold.
    pub(crate) fn check_starvation(&mut self, now: Instant) -> usize {
        let threshold = self.settings.starvation_threshold;
        let mut starved = 0;
        for id in self.ready.values() {
            let Some(record) = self.tasks.get_mut(id) else {
                continue;
            };
            let Some(since) = record.queued_since else {
                continue;
            };
            let waited = now.saturating_duration_since(since);
            if record.starved_reported || waited < threshold {
                continue;
            }
            record.starved_reported = true;
            starved += 1;
            warn!(task = %id, waited_secs = waited.as_secs_f64(), "task starved");
            self.bus.publish(Event::TaskStarved { task: *id, waited });
        }
        starved
    }

    // ────────────────────────────────────────────────────────────────────
    // Queries
    // ────────────────────────────────────────────────────────────────────

    pub(crate) fn status(&self, id: TaskId) -> Option<TaskStatus> {
        if let Some(record) = self.tasks.get(&id) {
            return Some(TaskStatus {
                id,
                name: record.name.to_string(),
                state: record.state,
                priority: record.priority,
                attempts: record.attempts,
                agent: record.agent,
                waiting_on: record.unmet,
                history: record.history.clone(),
                output: None,
            });
        }
        self.finished.get(&id).map(|done| TaskStatus {
            id,
            name: done.name.to_string(),
            state: done.state,
            priority: done.priority,
            attempts: done.attempts,
            agent: None,
            waiting_on: 0,
            history: done.history.clone(),
            output: done.output.clone(),
        })
    }

    pub(crate) fn counts(&self) -> QueueCounts {
        let mut counts = QueueCounts::default();
        for record in self.tasks.values() {
            match record.state {
                TaskState::Pending => counts.pending += 1,
                TaskState::Queued => counts.queued += 1,
                TaskState::Running => counts.running += 1,
                TaskState::RetryScheduled => counts.retry_scheduled += 1,
                _ => {}
            }
        }
        counts.completed = self.retired.completed;
        counts.failed = self.retired.failed;
        counts.cancelled = self.retired.cancelled;
        counts
    }

    /// Cancel tokens of every running attempt (shutdown).
    pub(crate) fn cancel_all_running(&self) {
        for record in self.tasks.values() {
            if let Some(running) = &record.running {
                running.cancel.cancel();
            }
        }
    }

    // ────────────────────────────────────────────────────────────────────
    // Checkpoint / restore
    // ────────────────────────────────────────────────────────────────────

    /// Non-terminal tasks in submission order. Running attempts are not
    /// counted; those tasks come back `Queued`.
    pub(crate) fn checkpoint(&self) -> SchedulerCheckpoint {
        let mut tasks: Vec<TaskCheckpoint> = self
            .tasks
            .values()
            .map(|record| TaskCheckpoint {
                spec: record.spec.clone(),
                state: match record.state {
                    TaskState::Running => TaskState::Queued,
                    other => other,
                },
                attempts: record.attempts,
                seq: record.seq,
            })
            .collect();
        tasks.sort_by_key(|t| t.seq);

        // Retained tombstones only, oldest first, so a restore releases in
        // the same order.
        let completed: Vec<TaskId> = self
            .finished_order
            .iter()
            .filter(|id| {
                self.finished
                    .get(id)
                    .is_some_and(|done| done.state == TaskState::Completed)
            })
            .copied()
            .collect();

        SchedulerCheckpoint {
            version: CHECKPOINT_VERSION,
            taken_at: self.clock.now(),
            tasks,
            completed,
        }
    }

    /// Load a checkpoint into an empty scheduler. Returns the number of live
    /// tasks restored.
    pub(crate) fn restore(&mut self, checkpoint: SchedulerCheckpoint) -> Result<usize, OrchestratorError> {
        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(PersistenceError::UnsupportedVersion {
                found: checkpoint.version,
                expected: CHECKPOINT_VERSION,
            }
            .into());
        }

        let missing: Vec<String> = checkpoint
            .tasks
            .iter()
            .map(|t| t.spec.envelope.task_type())
            .filter(|task_type| !self.handlers.contains(task_type))
            .map(|task_type| task_type.to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if !missing.is_empty() {
            return Err(OrchestratorError::MissingTaskTypes(missing));
        }

        for id in &checkpoint.completed {
            self.retire(
                *id,
                FinishedTask {
                    name: Arc::from(""),
                    state: TaskState::Completed,
                    priority: self.settings.default_priority,
                    attempts: 0,
                    history: Vec::new(),
                    output: None,
                },
            );
        }

        let incoming: Vec<Incoming> = checkpoint
            .tasks
            .into_iter()
            .map(|t| Incoming {
                spec: t.spec,
                seq: Some(t.seq),
                attempts: t.attempts,
            })
            .collect();
        if incoming.is_empty() {
            return Ok(0);
        }
        let restored = self.accept(incoming).map_err(OrchestratorError::Restore)?;
        info!(tasks = restored.len(), completed = checkpoint.completed.len(), "checkpoint restored");
        Ok(restored.len())
    }
}
