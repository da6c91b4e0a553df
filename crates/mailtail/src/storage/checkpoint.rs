//! JSON file checkpoint store

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::CheckpointStore;
use crate::models::Checkpoint;

/// Default checkpoint filename in the config directory
pub const CHECKPOINT_FILE: &str = "checkpoint.json";

/// Checkpoint persisted as a JSON document
///
/// Saves go through [`config::save_json_file`], which writes a sibling temp
/// file and renames it into place.
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `~/.config/gmailtail/checkpoint.json`
    pub fn default_location() -> Result<Self> {
        let path = config::config_path(CHECKPOINT_FILE)
            .context("Could not determine config directory")?;
        Ok(Self::new(path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self) -> Result<Option<Checkpoint>> {
        if !self.path.exists() {
            return Ok(None);
        }
        config::load_json_file(&self.path).map(Some)
    }

    fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        config::save_json_file(&self.path, checkpoint)
    }

    fn reset(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to remove checkpoint {}", self.path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MessageId, SyncCursor};
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_loads_none() {
        let dir = tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("checkpoint.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("state").join("checkpoint.json"));

        let mut checkpoint = Checkpoint::default();
        checkpoint.advance_cursor(SyncCursor::new("4242"));
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap();
        checkpoint.mark_processed(&MessageId::new("a"), Some(ts));
        checkpoint.mark_processed(&MessageId::new("b"), None);
        store.save(&checkpoint).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.cursor, Some(SyncCursor::new("4242")));
        assert_eq!(loaded.last_timestamp, Some(ts));
        let ids: Vec<&str> = loaded.processed_ids.iter().collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = FileCheckpointStore::new(&path);
        assert!(store.load().is_err());
    }

    #[test]
    fn test_reset_removes_file() {
        let dir = tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("checkpoint.json"));

        store.save(&Checkpoint::default()).unwrap();
        assert!(store.path().exists());

        store.reset().unwrap();
        assert!(!store.path().exists());
        // Resetting twice is fine
        store.reset().unwrap();
    }
}
