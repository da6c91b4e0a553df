//! Storage trait definitions

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::models::{Checkpoint, MessageId, StructuredMessage};
use crate::parser::ContentFlags;

/// A parsed message together with the content it was extracted with
///
/// Entries are versioned by their [`ContentFlags`]: an entry only satisfies
/// requests its flags cover.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedMessage {
    pub content: ContentFlags,
    pub message: StructuredMessage,
}

impl CachedMessage {
    pub fn new(content: ContentFlags, message: StructuredMessage) -> Self {
        Self { content, message }
    }

    pub fn id(&self) -> &MessageId {
        &self.message.id
    }
}

/// Keyed store of parsed messages, shared across runs
pub trait MessageCache: Send + Sync {
    /// Get a cached entry by message ID
    fn get(&self, id: &MessageId) -> Result<Option<CachedMessage>>;

    /// Insert or replace an entry
    fn put(&self, entry: &CachedMessage) -> Result<()>;

    /// Remove every entry
    fn clear(&self) -> Result<()>;

    /// Number of cached entries
    fn len(&self) -> Result<usize>;
}

/// Durable home of the resume [`Checkpoint`]
///
/// `save` must be atomic with respect to crashes: a failed or interrupted
/// save leaves the previous checkpoint loadable.
pub trait CheckpointStore: Send + Sync {
    /// Load the last saved checkpoint, if any
    fn load(&self) -> Result<Option<Checkpoint>>;

    /// Replace the saved checkpoint
    fn save(&self, checkpoint: &Checkpoint) -> Result<()>;

    /// Forget the saved checkpoint
    fn reset(&self) -> Result<()>;
}
