//! Ports: the collaborators the core talks to but does not implement.
//!
//! - `DataSource`: fetch capability handed to task handlers.
//! - `NotificationSink`: best-effort event consumer.
//! - `CheckpointStore`: persistence of scheduler state for recovery.
//! - `Clock` / `IdGenerator`: time and identity, swappable in tests.

pub mod checkpoint;
pub mod clock;
pub mod data_source;
pub mod id_generator;
pub mod notification;

pub use self::checkpoint::{
    CHECKPOINT_VERSION, CheckpointStore, PersistenceError, SchedulerCheckpoint, TaskCheckpoint,
};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::data_source::{DataSource, FetchError};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::notification::NotificationSink;
