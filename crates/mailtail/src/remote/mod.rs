//! Remote mailbox API surface
//!
//! The sync engine only ever talks to the provider through [`MailboxApi`],
//! a narrow four-call capability. [`crate::gmail::GmailClient`] implements it
//! over HTTP; [`FixtureMailbox`] implements it over deterministic in-memory
//! fixtures for tests.

mod fixture;

pub use fixture::{FixtureMailbox, raw_message};

use crate::gmail::api::GmailMessage;
use crate::models::{MessageId, SyncCursor};

/// Raw provider record as returned by `get`
pub type RawMessage = GmailMessage;

/// Failure talking to the remote mailbox
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// The incremental cursor is too old or otherwise rejected by the provider
    #[error("history cursor expired or invalid")]
    HistoryExpired,
    /// Network, auth, quota or decode failure
    #[error("{0}")]
    Transport(String),
}

impl RemoteError {
    pub fn transport(message: impl std::fmt::Display) -> Self {
        Self::Transport(message.to_string())
    }
}

impl From<anyhow::Error> for RemoteError {
    fn from(err: anyhow::Error) -> Self {
        Self::Transport(format!("{err:#}"))
    }
}

/// One page of a snapshot listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub ids: Vec<MessageId>,
    pub next_page_token: Option<String>,
}

/// Messages added since a cursor, plus the cursor to resume from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryBatch {
    pub added: Vec<MessageId>,
    pub cursor: Option<SyncCursor>,
}

/// Mailbox identity and its current history position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub email_address: Option<String>,
    pub cursor: SyncCursor,
}

/// Capability to enumerate and fetch messages from a remote mailbox
///
/// Implementations may block. Timeouts and retries of individual calls are
/// the implementation's concern; callers treat every error as transient
/// except [`RemoteError::HistoryExpired`].
pub trait MailboxApi: Send + Sync {
    /// List message ids matching `query`, one page at a time
    fn list(&self, query: &str, page_token: Option<&str>, limit: usize)
    -> Result<ListPage, RemoteError>;

    /// Fetch the full raw record for a message
    fn get(&self, id: &MessageId) -> Result<RawMessage, RemoteError>;

    /// Ids of messages added after `since`, in provider order
    fn history(&self, since: &SyncCursor, limit: usize) -> Result<HistoryBatch, RemoteError>;

    /// Current mailbox profile, including the latest history cursor
    fn profile(&self) -> Result<Profile, RemoteError>;
}
