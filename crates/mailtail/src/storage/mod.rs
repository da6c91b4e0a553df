//! Storage traits and implementations
//!
//! Two stores back a tail run: the [`CheckpointStore`] holding resume state
//! and the [`MessageCache`] holding parsed messages. Both have an in-memory
//! implementation for tests and `--no-cache` runs.

mod checkpoint;
mod memory;
mod sqlite;
mod traits;

pub use checkpoint::{CHECKPOINT_FILE, FileCheckpointStore};
pub use memory::{InMemoryCheckpointStore, InMemoryMessageCache};
pub use sqlite::SqliteMessageCache;
pub use traits::{CachedMessage, CheckpointStore, MessageCache};

/// Default cache filename in the config directory
pub const CACHE_FILE: &str = "cache.sqlite";
