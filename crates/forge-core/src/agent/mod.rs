//! Agent state owned by the registry.
//!
//! `AgentRecord` is plain data: queue, occupied slots, lifecycle state and the
//! handle of the current worker loop. It never awaits; the coordinator drives
//! it and publishes whatever transitions it returns.

pub(crate) mod worker;

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use self::worker::{Assignment, WorkerHandle};
use crate::config::AgentConfig;
use crate::domain::{AgentId, AgentState, TaskId};
use crate::error::AgentError;

/// Start order: priority descending, then submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct QueueKey {
    priority: Reverse<i32>,
    seq: u64,
}

impl QueueKey {
    pub(crate) fn new(priority: i32, seq: u64) -> Self {
        Self {
            priority: Reverse(priority),
            seq,
        }
    }
}

/// A slot taken by one attempt.
#[derive(Debug, Clone)]
pub(crate) struct RunningAttempt {
    pub attempt: u32,
    pub cancel: CancellationToken,
    /// `AttemptFinished` already arrived; only the slot is still held.
    pub reported: bool,
}

/// Slots taken back from an agent that failed or ran out of drain time.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ReclaimedSlots {
    /// Attempts that never reported: they are lost.
    pub lost: Vec<(TaskId, u32)>,
    /// Attempts that reported but whose handler had not returned.
    pub lingering: Vec<TaskId>,
}

pub(crate) struct AgentRecord {
    id: AgentId,
    config: AgentConfig,
    state: AgentState,
    queue: BTreeMap<QueueKey, TaskId>,
    running: HashMap<TaskId, RunningAttempt>,
    last_heartbeat: DateTime<Utc>,
    last_seen: Instant,
    epoch: u64,
    worker: Option<WorkerHandle>,
}

impl AgentRecord {
    pub(crate) fn new(id: AgentId, config: AgentConfig, now: DateTime<Utc>) -> Self {
        Self {
            id,
            config,
            state: AgentState::Initializing,
            queue: BTreeMap::new(),
            running: HashMap::new(),
            last_heartbeat: now,
            last_seen: Instant::now(),
            epoch: 0,
            worker: None,
        }
    }

    pub(crate) fn id(&self) -> AgentId {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.config.name
    }

    pub(crate) fn state(&self) -> AgentState {
        self.state
    }

    pub(crate) fn max(&self) -> usize {
        self.config.max_concurrent_tasks
    }

    pub(crate) fn queue_limit(&self) -> Option<usize> {
        self.config.queue_limit
    }

    /// Occupied slots, including attempts that already reported but whose
    /// handler has not returned yet.
    pub(crate) fn active(&self) -> usize {
        self.running.len()
    }

    pub(crate) fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn last_heartbeat(&self) -> DateTime<Utc> {
        self.last_heartbeat
    }

    pub(crate) fn last_seen(&self) -> Instant {
        self.last_seen
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Slots not spoken for by running or queued work.
    pub(crate) fn free_capacity(&self) -> usize {
        self.max()
            .saturating_sub(self.active() + self.queue.len())
    }

    /// Queue `task` at its place in start order.
    pub(crate) fn admit(&mut self, task: TaskId, key: QueueKey) -> Result<(), AgentError> {
        if !self.state.is_accepting() {
            return Err(AgentError::NotAccepting {
                agent: self.id,
                state: self.state,
            });
        }
        if let Some(limit) = self.queue_limit()
            && self.queue.len() >= limit
        {
            return Err(AgentError::CapacityExceeded {
                agent: self.id,
                limit,
            });
        }
        self.queue.insert(key, task);
        Ok(())
    }

    /// Pop the next queued task if a slot is free and starts are allowed.
    pub(crate) fn next_to_start(&mut self) -> Option<TaskId> {
        if !self.state.is_accepting() || self.active() >= self.max() {
            return None;
        }
        self.queue.pop_first().map(|(_, task)| task)
    }

    /// Record the attempt and hand it to the worker loop.
    ///
    /// The slot is taken even if the loop is gone; the heartbeat check
    /// reclaims it.
    pub(crate) fn start(&mut self, assignment: Assignment) -> bool {
        self.running.insert(
            assignment.task,
            RunningAttempt {
                attempt: assignment.attempt,
                cancel: assignment.cancel.clone(),
                reported: false,
            },
        );
        match &self.worker {
            Some(worker) => worker.start(assignment),
            None => false,
        }
    }

    /// `AttemptFinished` arrived for `task`. `false` if that attempt was not running here.
    pub(crate) fn mark_reported(&mut self, task: TaskId, attempt: u32) -> bool {
        match self.running.get_mut(&task) {
            Some(running) if running.attempt == attempt && !running.reported => {
                running.reported = true;
                true
            }
            _ => false,
        }
    }

    /// Free the slot held by `task`. `false` if it held none.
    pub(crate) fn release(&mut self, task: TaskId) -> bool {
        self.running.remove(&task).is_some()
    }

    pub(crate) fn remove_queued(&mut self, task: TaskId) -> bool {
        let before = self.queue.len();
        self.queue.retain(|_, queued| *queued != task);
        self.queue.len() != before
    }

    pub(crate) fn drain_queue(&mut self) -> Vec<TaskId> {
        std::mem::take(&mut self.queue).into_values().collect()
    }

    /// Reclaim every slot and cancel what ran in it.
    pub(crate) fn take_running(&mut self) -> ReclaimedSlots {
        let mut reclaimed = ReclaimedSlots::default();
        for (task, running) in self.running.drain() {
            running.cancel.cancel();
            if running.reported {
                reclaimed.lingering.push(task);
            } else {
                reclaimed.lost.push((task, running.attempt));
            }
        }
        reclaimed.lost.sort_by_key(|(task, _)| *task);
        reclaimed.lingering.sort();
        reclaimed
    }

    /// Move to `next`. `Ok(None)` when already there.
    pub(crate) fn transition(
        &mut self,
        next: AgentState,
    ) -> Result<Option<(AgentState, AgentState)>, AgentError> {
        if self.state == next {
            return Ok(None);
        }
        if !self.state.can_transition_to(next) {
            return Err(AgentError::InvalidTransition {
                agent: self.id,
                from: self.state,
                to: next,
            });
        }
        let from = self.state;
        self.state = next;
        Ok(Some((from, next)))
    }

    /// Ready <-> Busy according to slot usage.
    pub(crate) fn refresh_load(&mut self) -> Option<(AgentState, AgentState)> {
        let next = match self.state {
            AgentState::Ready if self.active() >= self.max() => AgentState::Busy,
            AgentState::Busy if self.active() < self.max() => AgentState::Ready,
            _ => return None,
        };
        self.transition(next).ok().flatten()
    }

    /// Accept a heartbeat from the current incarnation. `false` for stale epochs.
    pub(crate) fn heartbeat(&mut self, epoch: u64, now: DateTime<Utc>) -> bool {
        if epoch != self.epoch || !self.state.expects_heartbeat() {
            return false;
        }
        self.last_heartbeat = now;
        self.last_seen = Instant::now();
        true
    }

    /// Install a fresh worker loop, bumping the epoch. The old loop, if any, is aborted.
    pub(crate) fn attach_worker(&mut self, spawn: impl FnOnce(u64) -> WorkerHandle) {
        if let Some(old) = self.worker.take() {
            old.abort();
        }
        self.epoch += 1;
        self.last_seen = Instant::now();
        self.worker = Some(spawn(self.epoch));
    }

    /// Kill the worker loop without touching bookkeeping.
    pub(crate) fn abort_worker(&mut self) {
        if let Some(worker) = &self.worker {
            worker.abort();
        }
    }

    pub(crate) fn detach_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::domain::{TaskEnvelope, TaskType};
    use crate::typed::handler_fn;
    use crate::domain::Outcome;
    use crate::error::HandlerError;

    fn ready_agent(max: usize) -> AgentRecord {
        let mut agent = AgentRecord::new(AgentId::from_u128(1), AgentConfig::new("a", max), Utc::now());
        agent.transition(AgentState::Ready).unwrap();
        agent
    }

    fn assignment(task: TaskId) -> Assignment {
        Assignment {
            task,
            attempt: 1,
            name: Arc::from("t"),
            envelope: TaskEnvelope::new(TaskType::new("t"), serde_json::Value::Null),
            handler: Arc::new(handler_fn(|_| async { Ok::<_, HandlerError>(Outcome::empty()) })),
            timeout: None,
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn initializing_agents_do_not_accept() {
        let mut agent = AgentRecord::new(AgentId::from_u128(1), AgentConfig::new("a", 1), Utc::now());
        let err = agent.admit(TaskId::from_u128(1), QueueKey::new(0, 1)).unwrap_err();
        assert!(matches!(err, AgentError::NotAccepting { state: AgentState::Initializing, .. }));
    }

    #[test]
    fn queue_limit_is_enforced() {
        let mut agent = AgentRecord::new(
            AgentId::from_u128(1),
            AgentConfig::new("a", 1).with_queue_limit(1),
            Utc::now(),
        );
        agent.transition(AgentState::Ready).unwrap();

        agent.admit(TaskId::from_u128(1), QueueKey::new(0, 1)).unwrap();
        let err = agent.admit(TaskId::from_u128(2), QueueKey::new(0, 2)).unwrap_err();
        assert_eq!(
            err,
            AgentError::CapacityExceeded {
                agent: AgentId::from_u128(1),
                limit: 1
            }
        );
    }

    #[test]
    fn free_capacity_counts_running_and_queued() {
        let mut agent = ready_agent(3);
        agent.admit(TaskId::from_u128(1), QueueKey::new(0, 1)).unwrap();
        agent.admit(TaskId::from_u128(2), QueueKey::new(0, 2)).unwrap();
        assert_eq!(agent.free_capacity(), 1);

        let task = agent.next_to_start().unwrap();
        agent.start(assignment(task));
        assert_eq!(agent.active(), 1);
        assert_eq!(agent.free_capacity(), 1);
    }

    #[test]
    fn starts_follow_queue_order_and_slot_count() {
        let mut agent = ready_agent(1);
        agent.admit(TaskId::from_u128(1), QueueKey::new(0, 1)).unwrap();
        agent.admit(TaskId::from_u128(2), QueueKey::new(0, 2)).unwrap();

        assert_eq!(agent.next_to_start(), Some(TaskId::from_u128(1)));
        agent.start(assignment(TaskId::from_u128(1)));
        assert_eq!(agent.refresh_load(), Some((AgentState::Ready, AgentState::Busy)));
        assert_eq!(agent.next_to_start(), None);
    }

    #[test]
    fn later_higher_priority_task_starts_first() {
        let mut agent = ready_agent(1);
        agent.admit(TaskId::from_u128(1), QueueKey::new(0, 1)).unwrap();
        agent.admit(TaskId::from_u128(2), QueueKey::new(0, 2)).unwrap();
        agent.admit(TaskId::from_u128(3), QueueKey::new(5, 3)).unwrap();

        assert_eq!(agent.next_to_start(), Some(TaskId::from_u128(3)));
        assert!(agent.remove_queued(TaskId::from_u128(1)));
        assert!(!agent.remove_queued(TaskId::from_u128(1)));
        assert_eq!(agent.drain_queue(), vec![TaskId::from_u128(2)]);
    }

    #[test]
    fn busy_agents_still_accept_into_queue() {
        let mut agent = ready_agent(1);
        agent.admit(TaskId::from_u128(1), QueueKey::new(0, 1)).unwrap();
        let task = agent.next_to_start().unwrap();
        agent.start(assignment(task));
        agent.refresh_load();

        assert_eq!(agent.state(), AgentState::Busy);
        agent.admit(TaskId::from_u128(2), QueueKey::new(0, 2)).unwrap();
        assert_eq!(agent.queue_depth(), 1);
    }

    #[test]
    fn release_frees_the_slot_exactly_once() {
        let mut agent = ready_agent(1);
        agent.admit(TaskId::from_u128(1), QueueKey::new(0, 1)).unwrap();
        let task = agent.next_to_start().unwrap();
        agent.start(assignment(task));

        assert!(agent.mark_reported(task, 1));
        assert!(!agent.mark_reported(task, 1));
        assert_eq!(agent.active(), 1);
        assert!(agent.release(task));
        assert!(!agent.release(task));
        assert_eq!(agent.active(), 0);
    }

    #[test]
    fn draining_agents_start_nothing() {
        let mut agent = ready_agent(2);
        agent.admit(TaskId::from_u128(1), QueueKey::new(0, 1)).unwrap();
        agent.transition(AgentState::Draining).unwrap();

        assert_eq!(agent.next_to_start(), None);
        assert_eq!(agent.drain_queue(), vec![TaskId::from_u128(1)]);
    }

    #[test]
    fn take_running_splits_lost_and_lingering_attempts() {
        let mut agent = ready_agent(2);
        let a = TaskId::from_u128(1);
        let b = TaskId::from_u128(2);
        let a_assignment = assignment(a);
        let a_token = a_assignment.cancel.clone();
        agent.start(a_assignment);
        agent.start(assignment(b));
        agent.mark_reported(b, 1);

        let reclaimed = agent.take_running();
        assert_eq!(reclaimed.lost, vec![(a, 1)]);
        assert_eq!(reclaimed.lingering, vec![b]);
        assert!(a_token.is_cancelled());
        assert_eq!(agent.active(), 0);
    }

    #[test]
    fn stale_epoch_heartbeats_are_ignored() {
        let mut agent = ready_agent(1);
        assert!(!agent.heartbeat(5, Utc::now()));
        assert!(agent.heartbeat(0, Utc::now()));
    }

    #[test]
    fn illegal_transition_is_an_error() {
        let mut agent = ready_agent(1);
        agent.transition(AgentState::Draining).unwrap();
        agent.transition(AgentState::Stopped).unwrap();
        assert!(matches!(
            agent.transition(AgentState::Ready),
            Err(AgentError::InvalidTransition { .. })
        ));
    }
}
