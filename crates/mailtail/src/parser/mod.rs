//! Record parser: raw Gmail message → [`StructuredMessage`]
//!
//! Parsing is split in two pure steps:
//! - [`parse_content`] extracts everything the [`ContentFlags`] ask for
//! - [`shape`] truncates the body and applies the field allowlist
//!
//! The message cache stores the output of the first step, so a cached entry
//! can be re-shaped for any options its flags cover.
//!
//! Malformed headers, dates and body encodings degrade to empty values; the
//! parser never fails.

mod parts;

use std::collections::BTreeMap;

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::gmail::api::Header;
use crate::models::{EmailAddress, MessageId, StructuredMessage, ThreadId};
use crate::remote::RawMessage;

pub(crate) use parts::decode_html_entities;

/// Marker appended to a truncated body
pub const TRUNCATION_MARKER: &str = "...";

/// Which optional content a parsed message carries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentFlags {
    pub body: bool,
    pub headers: bool,
    pub attachments: bool,
}

impl ContentFlags {
    /// True if content extracted with `self` satisfies a request for `wanted`
    pub fn covers(&self, wanted: &ContentFlags) -> bool {
        (self.body || !wanted.body)
            && (self.headers || !wanted.headers)
            && (self.attachments || !wanted.attachments)
    }

    pub fn union(&self, other: &ContentFlags) -> ContentFlags {
        ContentFlags {
            body: self.body || other.body,
            headers: self.headers || other.headers,
            attachments: self.attachments || other.attachments,
        }
    }
}

/// Options controlling what the parser extracts and emits
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseOptions {
    pub include_body: bool,
    pub include_headers: bool,
    pub include_attachments: bool,
    /// Body length cap in characters; `None` or `Some(0)` means unlimited
    pub max_body_length: Option<usize>,
    /// Field allowlist; `id`, `threadId` and `timestamp` always survive
    pub fields: Option<Vec<String>>,
}

impl ParseOptions {
    /// Content that has to be extracted to satisfy these options
    ///
    /// Headers ride along with the body, and are also extracted when the
    /// allowlist names them explicitly.
    pub fn content(&self) -> ContentFlags {
        let headers_listed = self
            .fields
            .as_ref()
            .is_some_and(|fields| fields.iter().any(|f| normalize_field(f) == "headers"));

        ContentFlags {
            body: self.include_body,
            headers: self.include_headers || self.include_body || headers_listed,
            attachments: self.include_attachments,
        }
    }

    /// Allowlist entries that don't name any known field
    pub fn unknown_fields(&self) -> Vec<String> {
        self.fields
            .iter()
            .flatten()
            .filter(|f| Field::from_name(f).is_none())
            .cloned()
            .collect()
    }
}

/// Parse a raw record according to `options`
pub fn parse(raw: &RawMessage, options: &ParseOptions) -> StructuredMessage {
    shape(parse_content(raw, options.content()), options)
}

/// Extract identity, metadata, addresses and the content `flags` ask for
pub fn parse_content(raw: &RawMessage, flags: ContentFlags) -> StructuredMessage {
    let mut msg = StructuredMessage::new(
        MessageId::new(raw.id.as_str()),
        ThreadId::new(raw.thread_id.as_str()),
    );

    let internal_date = raw
        .internal_date
        .as_deref()
        .and_then(|d| d.trim().parse::<i64>().ok());
    msg.internal_date = internal_date;
    msg.timestamp = internal_date.and_then(|ms| Utc.timestamp_millis_opt(ms).single());

    msg.labels = Some(raw.label_ids.clone().unwrap_or_default());
    msg.snippet = Some(decode_html_entities(&raw.snippet));
    msg.history_id = raw.history_id.clone();
    msg.size_estimate = raw.size_estimate;

    let payload = raw.payload.as_ref();
    let headers = collect_headers(payload.and_then(|p| p.headers.as_deref()).unwrap_or_default());
    let header = |name: &str| headers.get(name).map(String::as_str).unwrap_or_default();

    msg.subject = Some(header("subject").to_string());
    msg.from = Some(EmailAddress::parse(header("from")));
    msg.to = Some(EmailAddress::parse_list(header("to")));
    msg.cc = Some(EmailAddress::parse_list(header("cc")));
    msg.bcc = Some(EmailAddress::parse_list(header("bcc")));
    msg.date = headers.get("date").cloned();
    msg.message_id = headers.get("message-id").cloned();

    if flags.body {
        msg.body = Some(payload.map(parts::extract_body).unwrap_or_default());
    }
    if flags.attachments {
        msg.attachments = Some(payload.map(parts::extract_attachments).unwrap_or_default());
    }
    if flags.headers {
        msg.headers = Some(headers);
    }

    msg
}

/// Fit an extracted message to `options`: drop unrequested content,
/// truncate the body, then project onto the allowlist
pub fn shape(mut msg: StructuredMessage, options: &ParseOptions) -> StructuredMessage {
    let wanted = options.content();
    if !wanted.body {
        msg.body = None;
    }
    if !wanted.headers {
        msg.headers = None;
    }
    if !wanted.attachments {
        msg.attachments = None;
    }

    if let (Some(body), Some(max)) = (msg.body.as_mut(), options.max_body_length)
        && max > 0
    {
        truncate_body(body, max);
    }

    if let Some(fields) = &options.fields {
        project(&mut msg, fields);
    }

    msg
}

/// Cut `body` to `max` characters plus the truncation marker
fn truncate_body(body: &mut String, max: usize) {
    if let Some((cut, _)) = body.char_indices().nth(max) {
        body.truncate(cut);
        body.push_str(TRUNCATION_MARKER);
    }
}

/// Lower-cased header map; later duplicates win
fn collect_headers(headers: &[Header]) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|h| (h.name.to_ascii_lowercase(), h.value.clone()))
        .collect()
}

/// Optional fields addressable by the allowlist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Labels,
    Snippet,
    HistoryId,
    InternalDate,
    SizeEstimate,
    Subject,
    From,
    To,
    Cc,
    Bcc,
    Date,
    MessageId,
    Headers,
    Body,
    Attachments,
    /// Identity fields are accepted in the list but always kept anyway
    Always,
}

impl Field {
    fn from_name(name: &str) -> Option<Field> {
        let field = match normalize_field(name).as_str() {
            "id" | "threadid" | "timestamp" => Field::Always,
            "labels" | "labelids" => Field::Labels,
            "snippet" => Field::Snippet,
            "historyid" => Field::HistoryId,
            "internaldate" => Field::InternalDate,
            "sizeestimate" => Field::SizeEstimate,
            "subject" => Field::Subject,
            "from" => Field::From,
            "to" => Field::To,
            "cc" => Field::Cc,
            "bcc" => Field::Bcc,
            "date" => Field::Date,
            "messageid" => Field::MessageId,
            "headers" => Field::Headers,
            "body" => Field::Body,
            "attachments" => Field::Attachments,
            _ => return None,
        };
        Some(field)
    }
}

/// Field names compare ignoring case, `_` and `-`
fn normalize_field(name: &str) -> String {
    name.trim()
        .chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

fn project(msg: &mut StructuredMessage, fields: &[String]) {
    let allowed: Vec<Field> = fields.iter().filter_map(|f| Field::from_name(f)).collect();
    let keep = |field: Field| allowed.contains(&field);

    if !keep(Field::Labels) {
        msg.labels = None;
    }
    if !keep(Field::Snippet) {
        msg.snippet = None;
    }
    if !keep(Field::HistoryId) {
        msg.history_id = None;
    }
    if !keep(Field::InternalDate) {
        msg.internal_date = None;
    }
    if !keep(Field::SizeEstimate) {
        msg.size_estimate = None;
    }
    if !keep(Field::Subject) {
        msg.subject = None;
    }
    if !keep(Field::From) {
        msg.from = None;
    }
    if !keep(Field::To) {
        msg.to = None;
    }
    if !keep(Field::Cc) {
        msg.cc = None;
    }
    if !keep(Field::Bcc) {
        msg.bcc = None;
    }
    if !keep(Field::Date) {
        msg.date = None;
    }
    if !keep(Field::MessageId) {
        msg.message_id = None;
    }
    if !keep(Field::Headers) {
        msg.headers = None;
    }
    if !keep(Field::Body) {
        msg.body = None;
    }
    if !keep(Field::Attachments) {
        msg.attachments = None;
    }
}
