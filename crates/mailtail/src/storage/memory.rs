//! In-memory storage implementations
//!
//! Used for tests and when the on-disk cache is disabled.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;

use super::{CachedMessage, CheckpointStore, MessageCache};
use crate::models::{Checkpoint, MessageId};

/// In-memory implementation of MessageCache
pub struct InMemoryMessageCache {
    entries: RwLock<HashMap<String, CachedMessage>>,
}

impl InMemoryMessageCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryMessageCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageCache for InMemoryMessageCache {
    fn get(&self, id: &MessageId) -> Result<Option<CachedMessage>> {
        let entries = self.entries.read().unwrap();
        Ok(entries.get(id.as_str()).cloned())
    }

    fn put(&self, entry: &CachedMessage) -> Result<()> {
        let mut entries = self.entries.write().unwrap();
        entries.insert(entry.id().0.clone(), entry.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.entries.write().unwrap().clear();
        Ok(())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.entries.read().unwrap().len())
    }
}

/// In-memory implementation of CheckpointStore
///
/// Counts saves so tests can assert on persistence ordering.
pub struct InMemoryCheckpointStore {
    saved: RwLock<Option<Checkpoint>>,
    saves: RwLock<usize>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self {
            saved: RwLock::new(None),
            saves: RwLock::new(0),
        }
    }

    /// Start with an existing checkpoint
    pub fn with_checkpoint(checkpoint: Checkpoint) -> Self {
        let store = Self::new();
        *store.saved.write().unwrap() = Some(checkpoint);
        store
    }

    /// Number of successful saves
    pub fn save_count(&self) -> usize {
        *self.saves.read().unwrap()
    }
}

impl Default for InMemoryCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn load(&self) -> Result<Option<Checkpoint>> {
        Ok(self.saved.read().unwrap().clone())
    }

    fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        *self.saved.write().unwrap() = Some(checkpoint.clone());
        *self.saves.write().unwrap() += 1;
        Ok(())
    }

    fn reset(&self) -> Result<()> {
        *self.saved.write().unwrap() = None;
        Ok(())
    }
}
