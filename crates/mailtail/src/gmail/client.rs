//! Gmail API HTTP client
//!
//! Implements [`MailboxApi`] over the Gmail REST API v1.
//! Uses synchronous HTTP (ureq) to be executor-agnostic.

use std::time::Duration;

use anyhow::{Context, Result};
use log::debug;
use serde::de::DeserializeOwned;

use super::GmailAuth;
use super::api::{GmailMessage, HistoryResponse, ListMessagesResponse, ProfileResponse};
use crate::models::{MessageId, SyncCursor};
use crate::remote::{HistoryBatch, ListPage, MailboxApi, Profile, RemoteError};

/// Gmail API client
pub struct GmailClient {
    auth: GmailAuth,
    agent: ureq::Agent,
}

impl GmailClient {
    /// Gmail API base URL
    const BASE_URL: &'static str = "https://gmail.googleapis.com/gmail/v1";

    /// Upper bound for `maxResults` accepted by list endpoints
    const MAX_PAGE_SIZE: usize = 500;

    /// Whole-request timeout for every call
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    /// Attempts made by `get` before giving up
    const GET_ATTEMPTS: u32 = 3;

    /// Create a new Gmail client
    pub fn new(auth: GmailAuth) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(Self::REQUEST_TIMEOUT))
            .build()
            .into();

        Self { auth, agent }
    }

    /// Make sure a usable access token exists, running the OAuth flow if needed
    pub fn authenticate(&self) -> Result<()> {
        self.auth.get_access_token()?;
        Ok(())
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth.is_authenticated()
    }

    /// GET a Gmail endpoint and decode the JSON response
    fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ureq::Error> {
        let access_token = self
            .auth
            .get_access_token()
            .map_err(|e| ureq::Error::Other(e.into()))?;

        let url = format!("{}{}", Self::BASE_URL, path);
        let mut request = self
            .agent
            .get(&url)
            .header("Authorization", &format!("Bearer {access_token}"));
        for (key, value) in query {
            request = request.query(*key, *value);
        }

        request.call()?.body_mut().read_json()
    }

    fn get_message_once(&self, id: &MessageId) -> Result<GmailMessage> {
        let path = format!("/users/me/messages/{}", urlencoding::encode(id.as_str()));
        self.get_json(&path, &[("format", "full")])
            .with_context(|| format!("Failed to fetch message {id}"))
    }

    /// One page of history since `start_history_id`
    fn history_page(
        &self,
        start_history_id: &str,
        page_token: Option<&str>,
        limit: usize,
    ) -> Result<HistoryResponse, RemoteError> {
        let limit = limit.clamp(1, Self::MAX_PAGE_SIZE).to_string();
        let mut query = vec![
            ("startHistoryId", start_history_id),
            ("historyTypes", "messageAdded"),
            ("maxResults", limit.as_str()),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }

        match self.get_json("/users/me/history", &query) {
            Ok(history) => Ok(history),
            // Gmail answers 404 when the start history id is too old
            Err(ureq::Error::StatusCode(404)) => Err(RemoteError::HistoryExpired),
            Err(e) => Err(RemoteError::transport(format!("Failed to fetch history: {e}"))),
        }
    }
}

impl MailboxApi for GmailClient {
    fn list(
        &self,
        query: &str,
        page_token: Option<&str>,
        limit: usize,
    ) -> Result<ListPage, RemoteError> {
        let limit = limit.clamp(1, Self::MAX_PAGE_SIZE).to_string();
        let mut params = vec![("maxResults", limit.as_str())];
        if !query.is_empty() {
            params.push(("q", query));
        }
        if let Some(token) = page_token {
            params.push(("pageToken", token));
        }

        let response: ListMessagesResponse = self
            .get_json("/users/me/messages", &params)
            .context("Failed to list messages")?;

        Ok(ListPage {
            ids: response
                .messages
                .unwrap_or_default()
                .into_iter()
                .map(|m| MessageId::new(m.id))
                .collect(),
            next_page_token: response.next_page_token,
        })
    }

    /// Fetch a message, retrying with exponential backoff and jitter
    fn get(&self, id: &MessageId) -> Result<GmailMessage, RemoteError> {
        let mut delay = Duration::from_millis(100);
        let mut attempt = 1;

        loop {
            match self.get_message_once(id) {
                Ok(message) => return Ok(message),
                Err(e) if attempt < Self::GET_ATTEMPTS => {
                    debug!("Attempt {attempt} to fetch {id} failed: {e:#}");
                    std::thread::sleep(delay + Duration::from_millis(rand_jitter()));
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Follows history pages until exhausted so the returned cursor never
    /// skips changes that sit on a later page.
    fn history(&self, since: &SyncCursor, limit: usize) -> Result<HistoryBatch, RemoteError> {
        let mut batch = HistoryBatch::default();
        let mut page_token: Option<String> = None;

        loop {
            let response = self.history_page(since.as_str(), page_token.as_deref(), limit)?;

            for record in response.history.unwrap_or_default() {
                for added in record.messages_added.unwrap_or_default() {
                    batch.added.push(MessageId::new(added.message.id));
                }
            }

            if let Some(history_id) = response.history_id {
                batch.cursor = Some(SyncCursor::new(history_id));
            }

            match response.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(batch)
    }

    fn profile(&self) -> Result<Profile, RemoteError> {
        let profile: ProfileResponse = self
            .get_json("/users/me/profile", &[])
            .context("Failed to fetch profile")?;

        Ok(Profile {
            email_address: profile.email_address,
            cursor: SyncCursor::new(profile.history_id),
        })
    }
}

/// Generate a random jitter value (0-100ms)
fn rand_jitter() -> u64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let hasher = RandomState::new().build_hasher();
    hasher.finish() % 100
}
