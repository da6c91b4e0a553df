//! Gmail API integration
//!
//! This module provides:
//! - OAuth2 authentication flow
//! - Gmail REST client implementing [`crate::remote::MailboxApi`]
//! - Raw API response types

mod auth;
mod client;

pub use auth::GmailAuth;
pub use client::GmailClient;

/// Gmail API response types
pub mod api {
    use serde::{Deserialize, Serialize};

    /// Response from listing messages
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ListMessagesResponse {
        pub messages: Option<Vec<MessageRef>>,
        pub next_page_token: Option<String>,
        pub result_size_estimate: Option<u32>,
    }

    /// Reference to a message (just ID and thread ID)
    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessageRef {
        pub id: String,
        #[serde(default)]
        pub thread_id: String,
    }

    /// Full message from Gmail API (`format=full`)
    ///
    /// Everything except `id` is optional so that unusual records still
    /// deserialize and parse best-effort.
    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GmailMessage {
        pub id: String,
        #[serde(default)]
        pub thread_id: String,
        pub label_ids: Option<Vec<String>>,
        #[serde(default)]
        pub snippet: String,
        pub history_id: Option<String>,
        /// Milliseconds since the epoch, as a decimal string
        pub internal_date: Option<String>,
        pub size_estimate: Option<u64>,
        pub payload: Option<MessagePart>,
    }

    /// Node of the MIME part tree; the message payload is the root node
    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessagePart {
        pub part_id: Option<String>,
        pub mime_type: Option<String>,
        pub filename: Option<String>,
        pub headers: Option<Vec<Header>>,
        pub body: Option<MessageBody>,
        pub parts: Option<Vec<MessagePart>>,
    }

    /// Email header (name-value pair)
    #[derive(Debug, Clone, Deserialize, Serialize)]
    pub struct Header {
        pub name: String,
        pub value: String,
    }

    /// Part body; `data` is base64url encoded
    #[derive(Debug, Clone, Default, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessageBody {
        pub size: Option<u64>,
        pub data: Option<String>,
        pub attachment_id: Option<String>,
    }

    /// Response from `history.list`
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HistoryResponse {
        pub history: Option<Vec<HistoryRecord>>,
        pub next_page_token: Option<String>,
        pub history_id: Option<String>,
    }

    /// One change record in the mailbox history
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HistoryRecord {
        pub id: Option<String>,
        pub messages_added: Option<Vec<MessageAdded>>,
    }

    #[derive(Debug, Deserialize)]
    pub struct MessageAdded {
        pub message: MessageRef,
    }

    /// Response from `users.getProfile`
    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ProfileResponse {
        pub email_address: Option<String>,
        pub messages_total: Option<u64>,
        pub threads_total: Option<u64>,
        pub history_id: String,
    }
}
