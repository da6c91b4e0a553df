//! Domain models for the tail stream

mod checkpoint;
mod message;

pub use checkpoint::{Checkpoint, ProcessedIdWindow, SyncCursor};
pub use message::{Attachment, EmailAddress, MessageId, StructuredMessage, ThreadId};
