//! NotificationSink port.
//!
//! Sinks are attached to the event bus as ordinary subscribers, so a slow
//! sink only ever fills (and overflows) its own queue.

use crate::domain::Event;

pub trait NotificationSink: Send + Sync {
    fn notify(&self, event: &Event);
}
