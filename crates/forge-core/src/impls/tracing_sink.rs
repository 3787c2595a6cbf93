//! TracingSink: a NotificationSink that writes events to the log.

use tracing::{info, warn};

use crate::domain::Event;
use crate::ports::NotificationSink;

/// Logs task terminal events and agent failures at `warn`, everything else at `info`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl TracingSink {
    pub fn new() -> Self {
        Self
    }
}

impl NotificationSink for TracingSink {
    fn notify(&self, event: &Event) {
        match event {
            Event::TaskFailed { task, attempts, history } => {
                let last = history.last().map(|r| &r.result);
                warn!(task = %task, attempts, last = ?last, "task failed");
            }
            Event::DependencyFailed {
                task,
                failed_dependency,
            } => {
                warn!(task = %task, dependency = %failed_dependency, "task cancelled by failed dependency");
            }
            Event::AgentStateChanged { agent, from, to } if *to == crate::domain::AgentState::Failed => {
                warn!(agent = %agent, from = ?from, "agent failed");
            }
            Event::TaskStarved { task, waited } => {
                warn!(task = %task, waited_secs = waited.as_secs_f64(), "task starved");
            }
            other => {
                info!(topic = ?other.topic(), event = ?other, "event");
            }
        }
    }
}
