//! Single writer of resume state

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, warn};

use crate::models::{Checkpoint, MessageId, SyncCursor};
use crate::storage::CheckpointStore;

/// Owns the in-memory [`Checkpoint`] and writes it through to a store
///
/// Save failures are logged and otherwise ignored: the in-memory state stays
/// authoritative for the rest of the process, and the worst case after a
/// crash is re-emitting messages (at-least-once).
pub struct CheckpointCoordinator {
    store: Arc<dyn CheckpointStore>,
    checkpoint: Checkpoint,
}

impl CheckpointCoordinator {
    /// Load the saved checkpoint, starting fresh if there is none or it
    /// can't be read
    pub fn load(store: Arc<dyn CheckpointStore>) -> Self {
        let checkpoint = match store.load() {
            Ok(Some(checkpoint)) => {
                debug!(
                    "Loaded checkpoint: cursor {:?}, {} processed ids",
                    checkpoint.cursor.as_ref().map(SyncCursor::as_str),
                    checkpoint.processed_ids.len()
                );
                checkpoint
            }
            Ok(None) => Checkpoint::default(),
            Err(e) => {
                warn!("Ignoring unreadable checkpoint: {e:#}");
                Checkpoint::default()
            }
        };

        Self { store, checkpoint }
    }

    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    pub fn cursor(&self) -> Option<&SyncCursor> {
        self.checkpoint.cursor.as_ref()
    }

    pub fn is_processed(&self, id: &MessageId) -> bool {
        self.checkpoint.is_processed(id)
    }

    /// Record an emitted message and persist
    pub fn commit(&mut self, id: &MessageId, timestamp: Option<DateTime<Utc>>) {
        self.checkpoint.mark_processed(id, timestamp);
        self.persist();
    }

    /// Move the cursor forward; returns true if it changed
    pub fn set_cursor(&mut self, cursor: SyncCursor) -> bool {
        self.checkpoint.advance_cursor(cursor)
    }

    /// Save the current state; returns false if the store failed
    pub fn persist(&self) -> bool {
        match self.store.save(&self.checkpoint) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to save checkpoint: {e:#}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryCheckpointStore;
    use anyhow::{Result, bail};
    use chrono::TimeZone;

    struct BrokenStore;

    impl CheckpointStore for BrokenStore {
        fn load(&self) -> Result<Option<Checkpoint>> {
            bail!("disk on fire")
        }

        fn save(&self, _checkpoint: &Checkpoint) -> Result<()> {
            bail!("disk on fire")
        }

        fn reset(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_commit_persists_window_and_timestamp() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let mut coordinator = CheckpointCoordinator::load(store.clone());

        let ts = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        coordinator.commit(&MessageId::new("m1"), Some(ts));

        assert!(coordinator.is_processed(&MessageId::new("m1")));
        assert_eq!(store.save_count(), 1);
        let saved = store.load().unwrap().unwrap();
        assert!(saved.is_processed(&MessageId::new("m1")));
        assert_eq!(saved.last_timestamp, Some(ts));
    }

    #[test]
    fn test_set_cursor_is_monotonic() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let mut coordinator = CheckpointCoordinator::load(store);

        assert!(coordinator.set_cursor(SyncCursor::new("10")));
        assert!(!coordinator.set_cursor(SyncCursor::new("9")));
        assert!(!coordinator.set_cursor(SyncCursor::new("10")));
        assert!(coordinator.set_cursor(SyncCursor::new("11")));
        assert_eq!(coordinator.cursor(), Some(&SyncCursor::new("11")));
    }

    #[test]
    fn test_resumes_saved_state() {
        let mut saved = Checkpoint::default();
        saved.advance_cursor(SyncCursor::new("77"));
        saved.mark_processed(&MessageId::new("old"), None);
        let store = Arc::new(InMemoryCheckpointStore::with_checkpoint(saved));

        let coordinator = CheckpointCoordinator::load(store);
        assert_eq!(coordinator.cursor(), Some(&SyncCursor::new("77")));
        assert!(coordinator.is_processed(&MessageId::new("old")));
    }

    #[test]
    fn test_store_failures_are_not_fatal() {
        let mut coordinator = CheckpointCoordinator::load(Arc::new(BrokenStore));
        assert!(coordinator.cursor().is_none());

        coordinator.commit(&MessageId::new("m1"), None);
        assert!(coordinator.is_processed(&MessageId::new("m1")));
        assert!(!coordinator.persist());
    }
}
