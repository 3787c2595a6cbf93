//! InMemoryCheckpointStore: last checkpoint kept as encoded JSON.
//!
//! Save encodes and load decodes, so restores go through the same serde path
//! as a durable backend.

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::ports::{CHECKPOINT_VERSION, CheckpointStore, PersistenceError, SchedulerCheckpoint};

#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    slot: Mutex<Option<Vec<u8>>>,
    saves: Mutex<u64>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with an existing checkpoint, as if a previous run had saved it.
    pub fn with_checkpoint(checkpoint: &SchedulerCheckpoint) -> Result<Self, PersistenceError> {
        let store = Self::new();
        *store.slot.lock() = Some(serde_json::to_vec(checkpoint)?);
        Ok(store)
    }

    /// Number of successful `save_checkpoint` calls.
    pub fn save_count(&self) -> u64 {
        *self.saves.lock()
    }

    /// Decode the stored checkpoint without going through the port.
    pub fn peek(&self) -> Result<Option<SchedulerCheckpoint>, PersistenceError> {
        let slot = self.slot.lock();
        slot.as_deref().map(decode).transpose()
    }
}

fn decode(bytes: &[u8]) -> Result<SchedulerCheckpoint, PersistenceError> {
    let checkpoint: SchedulerCheckpoint = serde_json::from_slice(bytes)?;
    if checkpoint.version != CHECKPOINT_VERSION {
        return Err(PersistenceError::UnsupportedVersion {
            found: checkpoint.version,
            expected: CHECKPOINT_VERSION,
        });
    }
    Ok(checkpoint)
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save_checkpoint(
        &self,
        checkpoint: &SchedulerCheckpoint,
    ) -> Result<(), PersistenceError> {
        let bytes = serde_json::to_vec(checkpoint)?;
        *self.slot.lock() = Some(bytes);
        *self.saves.lock() += 1;
        Ok(())
    }

    async fn load_checkpoint(&self) -> Result<Option<SchedulerCheckpoint>, PersistenceError> {
        self.peek()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn empty_checkpoint(version: u32) -> SchedulerCheckpoint {
        SchedulerCheckpoint {
            version,
            taken_at: Utc::now(),
            tasks: Vec::new(),
            completed: Vec::new(),
        }
    }

    #[tokio::test]
    async fn empty_store_is_cold_start() {
        let store = InMemoryCheckpointStore::new();
        assert!(store.load_checkpoint().await.unwrap().is_none());
        assert_eq!(store.save_count(), 0);
    }

    #[tokio::test]
    async fn save_replaces_previous_checkpoint() {
        let store = InMemoryCheckpointStore::new();
        let mut first = empty_checkpoint(CHECKPOINT_VERSION);
        first.completed.push(crate::domain::TaskId::from_u128(1));
        store.save_checkpoint(&first).await.unwrap();
        store
            .save_checkpoint(&empty_checkpoint(CHECKPOINT_VERSION))
            .await
            .unwrap();

        let loaded = store.load_checkpoint().await.unwrap().unwrap();
        assert!(loaded.completed.is_empty());
        assert_eq!(store.save_count(), 2);
    }

    #[tokio::test]
    async fn unknown_version_is_rejected_on_load() {
        let store = InMemoryCheckpointStore::with_checkpoint(&empty_checkpoint(99)).unwrap();
        let err = store.load_checkpoint().await.unwrap_err();
        assert!(matches!(
            err,
            PersistenceError::UnsupportedVersion { found: 99, .. }
        ));
    }
}
