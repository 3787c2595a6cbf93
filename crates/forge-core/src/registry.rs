//! Agent registry: membership, lifecycle, capacity and health.
//!
//! The registry owns every `AgentRecord` and the worker loop behind it. All
//! lifecycle transitions go through here so each one is published as an
//! `AgentStateChanged` event exactly once.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::agent::worker::{Assignment, WorkerEnv, WorkerHandle};
use crate::agent::{AgentRecord, QueueKey, ReclaimedSlots};
use crate::config::AgentConfig;
use crate::bus::EventBus;
use crate::domain::{AgentId, AgentState, Event, TaskId};
use crate::error::RegistryError;
use crate::ports::{Clock, IdGenerator};

/// Health snapshot of one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentHealth {
    pub state: AgentState,
    pub active_count: usize,
    pub queue_depth: usize,
    pub last_heartbeat: DateTime<Utc>,
}

/// One row of an agent listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSummary {
    pub id: AgentId,
    pub name: String,
    pub state: AgentState,
    pub max_concurrent_tasks: usize,
    pub active_count: usize,
    pub queue_depth: usize,
    pub last_heartbeat: DateTime<Utc>,
}

/// Which agents a listing yields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AgentFilter {
    state: Option<AgentState>,
    accepting_only: bool,
}

impl AgentFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn in_state(mut self, state: AgentState) -> Self {
        self.state = Some(state);
        self
    }

    /// Only agents that currently take new admissions (`Ready` or `Busy`).
    pub fn accepting(mut self) -> Self {
        self.accepting_only = true;
        self
    }

    pub fn matches(&self, agent: &AgentSummary) -> bool {
        if let Some(state) = self.state
            && agent.state != state
        {
            return false;
        }
        !self.accepting_only || agent.state.is_accepting()
    }
}

/// Snapshot of the registry taken at query time, ordered by agent id.
///
/// Iteration is lazy and restartable: every call to `iter()` walks the
/// snapshot again, applying the filter as it goes. Later registry changes
/// are not visible.
#[derive(Debug, Clone)]
pub struct AgentListing {
    agents: Arc<[AgentSummary]>,
    filter: AgentFilter,
}

impl AgentListing {
    pub fn iter(&self) -> impl Iterator<Item = &AgentSummary> + '_ {
        self.agents.iter().filter(|a| self.filter.matches(a))
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    pub fn filter(&self) -> AgentFilter {
        self.filter
    }
}

impl<'a> IntoIterator for &'a AgentListing {
    type Item = &'a AgentSummary;
    type IntoIter = Box<dyn Iterator<Item = &'a AgentSummary> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

/// What a failed agent leaves behind.
#[derive(Debug, Default)]
pub(crate) struct FailedAgent {
    /// Admitted but never started.
    pub queued: Vec<TaskId>,
    pub slots: ReclaimedSlots,
}

pub(crate) struct Registry {
    agents: BTreeMap<AgentId, AgentRecord>,
    env: WorkerEnv,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    bus: EventBus,
}

impl Registry {
    pub(crate) fn new(
        env: WorkerEnv,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
        bus: EventBus,
    ) -> Self {
        Self {
            agents: BTreeMap::new(),
            env,
            ids,
            clock,
            bus,
        }
    }

    pub(crate) fn contains(&self, agent: AgentId) -> bool {
        self.agents.contains_key(&agent)
    }

    pub(crate) fn agent_ids(&self) -> Vec<AgentId> {
        self.agents.keys().copied().collect()
    }

    pub(crate) fn state(&self, agent: AgentId) -> Option<AgentState> {
        self.agents.get(&agent).map(AgentRecord::state)
    }

    /// Add an agent and spawn its worker loop. It starts `Initializing` and
    /// becomes `Ready` on its first heartbeat.
    pub(crate) fn register(&mut self, config: AgentConfig) -> Result<AgentId, RegistryError> {
        config.validate()?;
        let id = config.id.unwrap_or_else(|| self.ids.agent_id());
        if self.agents.contains_key(&id) {
            return Err(RegistryError::DuplicateId(id));
        }
        let name = config.name.clone();
        let max = config.max_concurrent_tasks;
        let mut record = AgentRecord::new(id, config, self.clock.now());
        let env = self.env.clone();
        record.attach_worker(|epoch| WorkerHandle::spawn(id, epoch, env));
        self.agents.insert(id, record);

        info!(agent = %id, name = %name, max_concurrent_tasks = max, "agent registered");
        self.bus.publish(Event::AgentRegistered { agent: id, name });
        Ok(id)
    }

    /// Accept a heartbeat. A first heartbeat moves the agent to `Ready`.
    pub(crate) fn heartbeat(&mut self, agent: AgentId, epoch: u64) -> bool {
        let now = self.clock.now();
        let Some(record) = self.agents.get_mut(&agent) else {
            return false;
        };
        if !record.heartbeat(epoch, now) {
            return false;
        }
        if matches!(
            record.state(),
            AgentState::Initializing | AgentState::Recovering
        ) {
            self.transition(agent, AgentState::Ready);
            self.refresh_load(agent);
        }
        true
    }

    /// Accepting agent with the most free capacity; ties go to the lowest id.
    pub(crate) fn pick_agent(&self) -> Option<AgentId> {
        self.agents
            .values()
            .filter(|a| a.state().is_accepting() && a.free_capacity() > 0)
            .fold(None::<(AgentId, usize)>, |best, a| match best {
                Some((_, free)) if free >= a.free_capacity() => best,
                _ => Some((a.id(), a.free_capacity())),
            })
            .map(|(id, _)| id)
    }

    pub(crate) fn admit(
        &mut self,
        agent: AgentId,
        task: TaskId,
        key: QueueKey,
    ) -> Result<(), RegistryError> {
        let record = self
            .agents
            .get_mut(&agent)
            .ok_or(RegistryError::UnknownAgent(agent))?;
        record.admit(task, key)?;
        Ok(())
    }

    pub(crate) fn next_to_start(&mut self, agent: AgentId) -> Option<TaskId> {
        self.agents.get_mut(&agent)?.next_to_start()
    }

    /// Take a slot for `assignment` and hand it to the worker loop.
    pub(crate) fn start(&mut self, agent: AgentId, assignment: Assignment) {
        let Some(record) = self.agents.get_mut(&agent) else {
            return;
        };
        let task = assignment.task;
        if !record.start(assignment) {
            // The heartbeat check reclaims the slot once the agent is declared failed.
            warn!(agent = %agent, task = %task, "worker loop gone, attempt not delivered");
        }
        self.refresh_load(agent);
    }

    pub(crate) fn remove_queued(&mut self, agent: AgentId, task: TaskId) -> bool {
        self.agents
            .get_mut(&agent)
            .is_some_and(|record| record.remove_queued(task))
    }

    /// An `AttemptFinished` report arrived. `false` for stale or duplicate reports.
    pub(crate) fn attempt_reported(
        &mut self,
        agent: AgentId,
        epoch: u64,
        task: TaskId,
        attempt: u32,
    ) -> bool {
        self.agents
            .get_mut(&agent)
            .is_some_and(|record| record.epoch() == epoch && record.mark_reported(task, attempt))
    }

    /// Free the slot `task` held. `false` for stale reports.
    pub(crate) fn release_slot(&mut self, agent: AgentId, epoch: u64, task: TaskId) -> bool {
        let Some(record) = self.agents.get_mut(&agent) else {
            return false;
        };
        if record.epoch() != epoch || !record.release(task) {
            return false;
        }
        let free_slots = record.max().saturating_sub(record.active());
        self.refresh_load(agent);
        self.bus.publish(Event::AgentCapacityFreed { agent, free_slots });
        true
    }

    /// Agents whose heartbeat is overdue at `now`.
    pub(crate) fn stale_agents(&self, now: Instant, timeout: Duration) -> Vec<AgentId> {
        self.agents
            .values()
            .filter(|a| a.state().expects_heartbeat())
            .filter(|a| now.saturating_duration_since(a.last_seen()) > timeout)
            .map(AgentRecord::id)
            .collect()
    }

    /// Declare `agent` failed: kill its worker and reclaim its queue and slots.
    pub(crate) fn mark_failed(&mut self, agent: AgentId, reason: &str) -> Option<FailedAgent> {
        if !self.transition(agent, AgentState::Failed) {
            return None;
        }
        let record = self.agents.get_mut(&agent)?;
        record.detach_worker();
        let failed = FailedAgent {
            queued: record.drain_queue(),
            slots: record.take_running(),
        };
        warn!(
            agent = %agent,
            reason,
            queued = failed.queued.len(),
            lost = failed.slots.lost.len(),
            "agent failed"
        );
        Some(failed)
    }

    /// Respawn the worker loop of a failed agent.
    pub(crate) fn recover(&mut self, agent: AgentId) -> bool {
        if !self.transition(agent, AgentState::Recovering) {
            return false;
        }
        let Some(record) = self.agents.get_mut(&agent) else {
            return false;
        };
        let env = self.env.clone();
        record.attach_worker(|epoch| WorkerHandle::spawn(agent, epoch, env));
        info!(agent = %agent, epoch = record.epoch(), "agent recovering");
        true
    }

    /// Kill the worker loop and nothing else. The agent keeps its state until
    /// the heartbeat check notices the silence.
    pub(crate) fn abort_worker(&mut self, agent: AgentId) -> Result<(), RegistryError> {
        let record = self
            .agents
            .get_mut(&agent)
            .ok_or(RegistryError::UnknownAgent(agent))?;
        record.abort_worker();
        warn!(agent = %agent, "agent worker aborted");
        Ok(())
    }

    /// Stop admissions and starts on `agent`. Returns its queued tasks.
    ///
    /// A failed agent has nothing left to drain and stays `Failed` until
    /// removed.
    pub(crate) fn begin_drain(&mut self, agent: AgentId) -> Result<Vec<TaskId>, RegistryError> {
        let state = self.state(agent).ok_or(RegistryError::UnknownAgent(agent))?;
        if !matches!(state, AgentState::Failed | AgentState::Draining) {
            let record = self
                .agents
                .get_mut(&agent)
                .ok_or(RegistryError::UnknownAgent(agent))?;
            let changed = record.transition(AgentState::Draining)?;
            if let Some((from, to)) = changed {
                self.publish_transition(agent, from, to);
            }
        }
        let record = self
            .agents
            .get_mut(&agent)
            .ok_or(RegistryError::UnknownAgent(agent))?;
        info!(agent = %agent, running = record.active(), "agent draining");
        Ok(record.drain_queue())
    }

    pub(crate) fn is_idle(&self, agent: AgentId) -> bool {
        self.agents.get(&agent).is_none_or(|a| a.active() == 0)
    }

    /// Reclaim the slots of a drain that ran out of time.
    pub(crate) fn interrupt(&mut self, agent: AgentId) -> ReclaimedSlots {
        match self.agents.get_mut(&agent) {
            Some(record) => {
                record.detach_worker();
                record.take_running()
            }
            None => ReclaimedSlots::default(),
        }
    }

    /// Stop and forget `agent`.
    pub(crate) fn remove(&mut self, agent: AgentId) -> bool {
        if !self.contains(agent) {
            return false;
        }
        self.transition(agent, AgentState::Stopped);
        if let Some(mut record) = self.agents.remove(&agent) {
            record.detach_worker();
        }
        info!(agent = %agent, "agent removed");
        self.bus.publish(Event::AgentRemoved { agent });
        true
    }

    /// Abort every worker loop (shutdown).
    pub(crate) fn stop_all(&mut self) {
        for record in self.agents.values_mut() {
            record.detach_worker();
        }
    }

    pub(crate) fn health(&self, agent: AgentId) -> Result<AgentHealth, RegistryError> {
        let record = self
            .agents
            .get(&agent)
            .ok_or(RegistryError::UnknownAgent(agent))?;
        Ok(AgentHealth {
            state: record.state(),
            active_count: record.active(),
            queue_depth: record.queue_depth(),
            last_heartbeat: record.last_heartbeat(),
        })
    }

    pub(crate) fn listing(&self, filter: AgentFilter) -> AgentListing {
        let agents: Vec<AgentSummary> = self
            .agents
            .values()
            .map(|a| AgentSummary {
                id: a.id(),
                name: a.name().to_string(),
                state: a.state(),
                max_concurrent_tasks: a.max(),
                active_count: a.active(),
                queue_depth: a.queue_depth(),
                last_heartbeat: a.last_heartbeat(),
            })
            .collect();
        AgentListing {
            agents: agents.into(),
            filter,
        }
    }

    fn refresh_load(&mut self, agent: AgentId) {
        let changed = self
            .agents
            .get_mut(&agent)
            .and_then(AgentRecord::refresh_load);
        if let Some((from, to)) = changed {
            self.publish_transition(agent, from, to);
        }
    }

    /// Apply a transition and publish it. `false` if it was not allowed.
    fn transition(&mut self, agent: AgentId, next: AgentState) -> bool {
        let Some(record) = self.agents.get_mut(&agent) else {
            return false;
        };
        match record.transition(next) {
            Ok(Some((from, to))) => {
                self.publish_transition(agent, from, to);
                true
            }
            Ok(None) => true,
            Err(e) => {
                debug!(agent = %agent, error = %e, "transition refused");
                false
            }
        }
    }

    fn publish_transition(&self, agent: AgentId, from: AgentState, to: AgentState) {
        debug!(agent = %agent, from = ?from, to = ?to, "agent state changed");
        self.bus.publish(Event::AgentStateChanged { agent, from, to });
    }
}
