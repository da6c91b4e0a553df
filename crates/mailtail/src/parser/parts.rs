//! MIME part tree traversal
//!
//! Parts are visited depth-first, pre-order, with an explicit stack so that
//! adversarially deep nesting cannot exhaust the call stack.

use std::sync::LazyLock;

use base64::prelude::*;
use regex::Regex;

use crate::gmail::api::MessagePart;
use crate::models::Attachment;

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));

/// A part visited during traversal, with the index of its parent visit
struct Visit<'a> {
    part: &'a MessagePart,
    parent: Option<usize>,
}

/// Flatten the part tree into depth-first pre-order
fn walk(root: &MessagePart) -> Vec<Visit<'_>> {
    let mut order = Vec::new();
    let mut stack: Vec<(&MessagePart, Option<usize>)> = vec![(root, None)];

    while let Some((part, parent)) = stack.pop() {
        let index = order.len();
        order.push(Visit { part, parent });

        if let Some(children) = &part.parts {
            // Reverse so the first child is popped first
            for child in children.iter().rev() {
                stack.push((child, Some(index)));
            }
        }
    }

    order
}

fn is_leaf(part: &MessagePart) -> bool {
    part.parts.as_ref().is_none_or(|p| p.is_empty())
}

fn has_mime(part: &MessagePart, mime: &str) -> bool {
    part.mime_type
        .as_deref()
        .is_some_and(|m| m.to_ascii_lowercase().starts_with(mime))
}

fn is_attachment(part: &MessagePart) -> bool {
    part.filename.as_deref().is_some_and(|f| !f.is_empty())
}

fn leaf_data(part: &MessagePart) -> Option<&str> {
    part.body.as_ref()?.data.as_deref()
}

/// Extract the body text
///
/// Leaf selection: the first inline `text/plain` leaf wins, together with its
/// `text/plain` siblings (same parent). Without any plain leaf, the same rule
/// applies to `text/html`, whose text is stripped of tags and unescaped.
/// Selected leaves are joined with newlines.
pub(crate) fn extract_body(root: &MessagePart) -> String {
    let visits = walk(root);

    for mime in ["text/plain", "text/html"] {
        let candidates: Vec<&Visit> = visits
            .iter()
            .filter(|v| is_leaf(v.part) && !is_attachment(v.part) && has_mime(v.part, mime))
            .filter(|v| leaf_data(v.part).is_some())
            .collect();

        let Some(first) = candidates.first() else {
            continue;
        };

        let texts: Vec<String> = candidates
            .iter()
            .filter(|v| v.parent == first.parent)
            .filter_map(|v| leaf_data(v.part).map(decode_base64_body))
            .map(|text| {
                if mime == "text/html" {
                    html_to_text(&text)
                } else {
                    text
                }
            })
            .filter(|text| !text.is_empty())
            .collect();

        return texts.join("\n").trim().to_string();
    }

    String::new()
}

/// Collect every part carrying a filename, at any depth
pub(crate) fn extract_attachments(root: &MessagePart) -> Vec<Attachment> {
    walk(root)
        .into_iter()
        .filter(|v| is_attachment(v.part))
        .map(|v| {
            let body = v.part.body.as_ref();
            Attachment {
                filename: v.part.filename.clone().unwrap_or_default(),
                mime_type: v.part.mime_type.clone().unwrap_or_default(),
                size: body.and_then(|b| b.size).unwrap_or(0),
                attachment_id: body.and_then(|b| b.attachment_id.clone()),
            }
        })
        .collect()
}

/// Decode base64 body data
///
/// Gmail uses URL-safe base64 but padding can vary, so we try multiple
/// decoders. Invalid UTF-8 is replaced rather than rejected.
pub(crate) fn decode_base64_body(data: &str) -> String {
    use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE};

    let decoders: &[&base64::engine::GeneralPurpose] =
        &[&BASE64_URL_SAFE_NO_PAD, &URL_SAFE, &STANDARD, &STANDARD_NO_PAD];

    decoders
        .iter()
        .find_map(|decoder| decoder.decode(data.trim()).ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

/// Strip tags and unescape entities
pub(crate) fn html_to_text(html: &str) -> String {
    decode_html_entities(&TAG_RE.replace_all(html, ""))
}

/// Decode common HTML entities
pub(crate) fn decode_html_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
