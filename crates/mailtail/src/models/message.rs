//! Message model emitted to the output stream

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a message (Gmail message ID)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of the conversation a message belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(pub String);

impl ThreadId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ThreadId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// An email address with its display name (empty when absent)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailAddress {
    /// Display name (e.g., "John Doe")
    pub name: String,
    /// Email address (e.g., "john@example.com")
    pub email: String,
}

impl EmailAddress {
    /// Create an address with no display name
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            name: String::new(),
            email: email.into(),
        }
    }

    pub fn with_name(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// Parse an address from a header value like `"John Doe" <john@example.com>`
    ///
    /// Anything that doesn't look like `Name <addr>` is taken verbatim as the
    /// address with an empty name.
    pub fn parse(s: &str) -> Self {
        let s = s.trim();

        if s.ends_with('>')
            && let Some(angle_start) = s.rfind('<')
        {
            let name = s[..angle_start].trim().trim_matches('"').trim();
            let email = s[angle_start + 1..s.len() - 1].trim();
            return Self::with_name(name, email);
        }

        Self::new(s)
    }

    /// Parse a comma-separated address list, dropping entries without an address
    pub fn parse_list(s: &str) -> Vec<Self> {
        s.split(',')
            .map(Self::parse)
            .filter(|addr| !addr.email.is_empty())
            .collect()
    }
}

/// Attachment descriptor found in the message part tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub filename: String,
    pub mime_type: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_id: Option<String>,
}

/// A parsed message, ready to be emitted
///
/// `id` and `thread_id` are always present. Every other field is best-effort;
/// `None` means "not extracted or projected away" and is omitted from output.
/// Instances are never mutated after parsing; re-fetching builds a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredMessage {
    pub id: MessageId,
    pub thread_id: ThreadId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_estimate: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<EmailAddress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Vec<EmailAddress>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cc: Option<Vec<EmailAddress>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bcc: Option<Vec<EmailAddress>>,
    /// Raw `Date` header
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    /// RFC 5322 `Message-ID` header
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// All headers, keys lower-cased
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<Attachment>>,
}

impl StructuredMessage {
    /// Create a message carrying only its identity
    pub fn new(id: MessageId, thread_id: ThreadId) -> Self {
        Self {
            id,
            thread_id,
            timestamp: None,
            labels: None,
            snippet: None,
            history_id: None,
            internal_date: None,
            size_estimate: None,
            subject: None,
            from: None,
            to: None,
            cc: None,
            bcc: None,
            date: None,
            message_id: None,
            headers: None,
            body: None,
            attachments: None,
        }
    }

    /// Subject line, or empty when missing
    pub fn subject_str(&self) -> &str {
        self.subject.as_deref().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_email_with_name() {
        let addr = EmailAddress::parse("John Doe <john@example.com>");
        assert_eq!(addr.name, "John Doe");
        assert_eq!(addr.email, "john@example.com");
    }

    #[test]
    fn test_parse_email_with_quoted_name() {
        let addr = EmailAddress::parse("\"Doe, John\" <john@example.com>");
        assert_eq!(addr.name, "Doe, John");
        assert_eq!(addr.email, "john@example.com");
    }

    #[test]
    fn test_parse_email_without_name() {
        let addr = EmailAddress::parse("  john@example.com ");
        assert_eq!(addr.name, "");
        assert_eq!(addr.email, "john@example.com");
    }

    #[test]
    fn test_parse_email_with_angle_brackets_no_name() {
        let addr = EmailAddress::parse("<john@example.com>");
        assert_eq!(addr.name, "");
        assert_eq!(addr.email, "john@example.com");
    }

    #[test]
    fn test_parse_list_drops_empty_segments() {
        let addrs = EmailAddress::parse_list("alice@example.com, , Bob <bob@example.com>,");
        assert_eq!(addrs.len(), 2);
        assert_eq!(addrs[0].email, "alice@example.com");
        assert_eq!(addrs[1].name, "Bob");
        assert_eq!(addrs[1].email, "bob@example.com");
    }

    #[test]
    fn test_serialization_omits_absent_fields() {
        let mut msg = StructuredMessage::new(MessageId::new("m1"), ThreadId::new("t1"));
        msg.subject = Some("Hello".to_string());

        let json = serde_json::to_value(&msg).unwrap();
        let keys: Vec<&str> = json.as_object().unwrap().keys().map(|k| k.as_str()).collect();
        assert_eq!(keys.len(), 3);
        assert!(keys.contains(&"id"));
        assert!(keys.contains(&"threadId"));
        assert!(keys.contains(&"subject"));
    }
}
