//! Port implementations shipped with the core.
//!
//! - **InMemoryCheckpointStore**: keeps the last checkpoint in memory (tests, demos)
//! - **TracingSink**: logs every event through `tracing`

pub mod memory_checkpoint;
pub mod tracing_sink;

pub use self::memory_checkpoint::InMemoryCheckpointStore;
pub use self::tracing_sink::TracingSink;
