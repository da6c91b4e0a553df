//! In-memory mailbox for tests
//!
//! Serves pre-arranged listing pages, history batches and raw messages, and
//! can be scripted to fail specific calls. Every call is counted.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use base64::prelude::*;

use super::{HistoryBatch, ListPage, MailboxApi, Profile, RawMessage, RemoteError};
use crate::gmail::api::{GmailMessage, Header, MessageBody, MessagePart};
use crate::models::{MessageId, SyncCursor};

#[derive(Default)]
struct FixtureState {
    pages: Vec<Vec<MessageId>>,
    messages: HashMap<String, GmailMessage>,
    history: VecDeque<Result<HistoryBatch, RemoteError>>,
    profile_cursor: String,
    list_failures: usize,
    profile_failures: usize,
    get_failures: HashSet<String>,
    list_calls: usize,
    get_calls: usize,
    history_calls: usize,
    profile_calls: usize,
    queries: Vec<String>,
}

/// Deterministic [`MailboxApi`] backed by fixtures
pub struct FixtureMailbox {
    state: Mutex<FixtureState>,
}

impl FixtureMailbox {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FixtureState {
                profile_cursor: "1".to_string(),
                ..Default::default()
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FixtureState> {
        // A panicking test thread must not hide the fixture from the others
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a raw message served by `get`
    pub fn add_message(&self, message: GmailMessage) {
        self.state().messages.insert(message.id.clone(), message);
    }

    /// Replace the snapshot listing with the given pages
    pub fn set_pages(&self, pages: Vec<Vec<&str>>) {
        self.state().pages = pages
            .into_iter()
            .map(|page| page.into_iter().map(MessageId::from).collect())
            .collect();
    }

    /// Queue the result of the next `history` call
    pub fn push_history(&self, result: Result<HistoryBatch, RemoteError>) {
        self.state().history.push_back(result);
    }

    /// Queue a history batch adding `ids` and moving the cursor to `cursor`
    pub fn push_history_added(&self, ids: &[&str], cursor: &str) {
        self.push_history(Ok(HistoryBatch {
            added: ids.iter().map(|id| MessageId::from(*id)).collect(),
            cursor: Some(SyncCursor::new(cursor)),
        }));
    }

    pub fn set_profile_cursor(&self, cursor: &str) {
        self.state().profile_cursor = cursor.to_string();
    }

    /// Fail the next `n` calls to `list`
    pub fn fail_next_lists(&self, n: usize) {
        self.state().list_failures = n;
    }

    /// Fail the next `n` calls to `profile`
    pub fn fail_next_profiles(&self, n: usize) {
        self.state().profile_failures = n;
    }

    /// Make every `get` of this id fail
    pub fn fail_get(&self, id: &str) {
        self.state().get_failures.insert(id.to_string());
    }

    pub fn list_calls(&self) -> usize {
        self.state().list_calls
    }

    pub fn get_calls(&self) -> usize {
        self.state().get_calls
    }

    pub fn history_calls(&self) -> usize {
        self.state().history_calls
    }

    pub fn profile_calls(&self) -> usize {
        self.state().profile_calls
    }

    /// Queries passed to `list`, in call order
    pub fn queries(&self) -> Vec<String> {
        self.state().queries.clone()
    }
}

impl Default for FixtureMailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl MailboxApi for FixtureMailbox {
    fn list(
        &self,
        query: &str,
        page_token: Option<&str>,
        _limit: usize,
    ) -> Result<ListPage, RemoteError> {
        let mut state = self.state();
        state.list_calls += 1;
        state.queries.push(query.to_string());

        if state.list_failures > 0 {
            state.list_failures -= 1;
            return Err(RemoteError::transport("list failed (fixture)"));
        }

        let index = match page_token {
            Some(token) => token
                .strip_prefix("page-")
                .and_then(|n| n.parse::<usize>().ok())
                .ok_or_else(|| RemoteError::transport(format!("bad page token {token}")))?,
            None => 0,
        };

        let ids = state.pages.get(index).cloned().unwrap_or_default();
        let next_page_token =
            (index + 1 < state.pages.len()).then(|| format!("page-{}", index + 1));

        Ok(ListPage {
            ids,
            next_page_token,
        })
    }

    fn get(&self, id: &MessageId) -> Result<RawMessage, RemoteError> {
        let mut state = self.state();
        state.get_calls += 1;

        if state.get_failures.contains(id.as_str()) {
            return Err(RemoteError::transport(format!("get {id} failed (fixture)")));
        }

        state
            .messages
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| RemoteError::transport(format!("message {id} not found")))
    }

    fn history(&self, _since: &SyncCursor, _limit: usize) -> Result<HistoryBatch, RemoteError> {
        let mut state = self.state();
        state.history_calls += 1;

        match state.history.pop_front() {
            Some(result) => result,
            None => Ok(HistoryBatch {
                added: Vec::new(),
                cursor: Some(SyncCursor::new(state.profile_cursor.clone())),
            }),
        }
    }

    fn profile(&self) -> Result<Profile, RemoteError> {
        let mut state = self.state();
        state.profile_calls += 1;

        if state.profile_failures > 0 {
            state.profile_failures -= 1;
            return Err(RemoteError::transport("profile failed (fixture)"));
        }

        Ok(Profile {
            email_address: Some("me@example.com".to_string()),
            cursor: SyncCursor::new(state.profile_cursor.clone()),
        })
    }
}

/// Build a single-part `text/plain` raw message
pub fn raw_message(id: &str, subject: &str, body: &str, internal_date_ms: i64) -> GmailMessage {
    let header = |name: &str, value: &str| Header {
        name: name.to_string(),
        value: value.to_string(),
    };

    GmailMessage {
        id: id.to_string(),
        thread_id: format!("thread-{id}"),
        label_ids: Some(vec!["INBOX".to_string(), "UNREAD".to_string()]),
        snippet: body.chars().take(40).collect(),
        history_id: None,
        internal_date: Some(internal_date_ms.to_string()),
        size_estimate: Some(body.len() as u64),
        payload: Some(MessagePart {
            mime_type: Some("text/plain".to_string()),
            headers: Some(vec![
                header("From", "Sender <sender@example.com>"),
                header("To", "me@example.com"),
                header("Subject", subject),
            ]),
            body: Some(MessageBody {
                size: Some(body.len() as u64),
                data: Some(BASE64_URL_SAFE_NO_PAD.encode(body)),
                attachment_id: None,
            }),
            ..Default::default()
        }),
    }
}
