//! Mailtail - incremental, checkpointed tail of a Gmail mailbox
//!
//! This crate provides:
//! - Domain models (StructuredMessage, Checkpoint, ProcessedIdWindow)
//! - Gmail API client and OAuth authentication
//! - A narrow remote mailbox trait with a deterministic test fixture
//! - Query building and record parsing
//! - Checkpoint and message cache storage
//! - The sync engine, processing pipeline and tail loop
//! - Output sinks

pub mod credentials;
pub mod gmail;
pub mod models;
pub mod output;
pub mod parser;
pub mod query;
pub mod remote;
pub mod storage;
pub mod sync;

pub use credentials::GmailCredentials;
pub use gmail::{GmailAuth, GmailClient};
pub use models::{
    Attachment, Checkpoint, EmailAddress, MessageId, ProcessedIdWindow, StructuredMessage,
    SyncCursor, ThreadId,
};
pub use output::{MessageSink, OutputFormat, VecSink, WriterSink};
pub use parser::{ContentFlags, ParseOptions, parse};
pub use query::{BuiltQuery, ConfigError, FilterSpec, build_query, parse_since};
pub use remote::{FixtureMailbox, MailboxApi, RawMessage, RemoteError};
pub use storage::{
    CachedMessage, CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore,
    InMemoryMessageCache, MessageCache, SqliteMessageCache,
};
pub use sync::{
    // Tail loop
    RunMode, RunSummary, Shutdown, TailError, TailOptions, Tailer,
    // Building blocks
    CheckpointCoordinator, Cycle, CycleOutcome, Pipeline, PipelineOptions, ProcessOutcome,
    SyncEngine, SyncMode,
};
