//! Gmail search query construction
//!
//! Compiles the structured [`FilterSpec`] into the single opaque query string
//! passed to `messages.list`. Clauses are emitted in a fixed order:
//! free text, `from:`, `to:`, `subject:`, `has:attachment`, `is:unread`,
//! `label:` (one per label), `after:`.

mod since;

pub use since::parse_since;

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Bad filter input; the offending clause is dropped and the run continues
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid date for --since {input:?}: {reason}")]
    InvalidSince { input: String, reason: String },
    #[error("invalid subject pattern {pattern:?}: {reason}")]
    InvalidSubjectPattern { pattern: String, reason: String },
}

/// Structured message filters, all optional
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FilterSpec {
    /// Free-text Gmail query, passed through verbatim
    pub query: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    /// Subject text; also used as a case-insensitive regex after fetching
    pub subject: Option<String>,
    pub labels: Vec<String>,
    pub has_attachment: bool,
    pub unread_only: bool,
    /// Human date expression, e.g. `2024-01-15`, `yesterday`, `7d`
    pub since: Option<String>,
}

/// Result of compiling a [`FilterSpec`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuiltQuery {
    /// Query string; empty means "match everything"
    pub text: String,
    /// Clauses that were dropped, to be surfaced as warnings
    pub warnings: Vec<ConfigError>,
}

/// Compile filters into a Gmail query string
///
/// `now` anchors relative `since` expressions.
pub fn build_query(filters: &FilterSpec, now: DateTime<Utc>) -> BuiltQuery {
    let mut clauses = Vec::new();
    let mut warnings = Vec::new();

    if let Some(query) = present(&filters.query) {
        clauses.push(format!("({query})"));
    }
    if let Some(from) = present(&filters.from) {
        clauses.push(format!("from:{from}"));
    }
    if let Some(to) = present(&filters.to) {
        clauses.push(format!("to:{to}"));
    }
    if let Some(subject) = present(&filters.subject) {
        clauses.push(format!("subject:\"{}\"", subject.replace('"', "\\\"")));
    }
    if filters.has_attachment {
        clauses.push("has:attachment".to_string());
    }
    if filters.unread_only {
        clauses.push("is:unread".to_string());
    }
    for label in filters.labels.iter().map(|l| l.trim()).filter(|l| !l.is_empty()) {
        clauses.push(format!("label:{label}"));
    }
    if let Some(since) = present(&filters.since) {
        match parse_since(since, now) {
            Ok(date) => clauses.push(format!("after:{}", date.format("%Y/%m/%d"))),
            Err(reason) => warnings.push(ConfigError::InvalidSince {
                input: since.to_string(),
                reason,
            }),
        }
    }

    BuiltQuery {
        text: clauses.join(" "),
        warnings,
    }
}

/// Trimmed value, if non-blank
fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_empty_filters_match_all() {
        let built = build_query(&FilterSpec::default(), now());
        assert_eq!(built.text, "");
        assert!(built.warnings.is_empty());
    }

    #[test]
    fn test_clause_order() {
        let filters = FilterSpec {
            query: Some("in:inbox OR in:sent".into()),
            from: Some("alice@example.com".into()),
            to: Some("bob@example.com".into()),
            subject: Some("weekly".into()),
            labels: vec!["Work".into(), "Important".into()],
            has_attachment: true,
            unread_only: true,
            since: Some("2024-01-15".into()),
        };

        let built = build_query(&filters, now());
        assert_eq!(
            built.text,
            "(in:inbox OR in:sent) from:alice@example.com to:bob@example.com \
             subject:\"weekly\" has:attachment is:unread label:Work label:Important \
             after:2024/01/15"
        );
    }

    #[test]
    fn test_subject_quotes_escaped() {
        let filters = FilterSpec {
            subject: Some(r#"say "hi""#.into()),
            ..Default::default()
        };
        assert_eq!(build_query(&filters, now()).text, r#"subject:"say \"hi\"""#);
    }

    #[test]
    fn test_relative_since() {
        let filters = FilterSpec {
            since: Some("7 days ago".into()),
            ..Default::default()
        };
        assert_eq!(build_query(&filters, now()).text, "after:2024/03/03");
    }

    #[test]
    fn test_invalid_since_is_dropped_with_warning() {
        let filters = FilterSpec {
            from: Some("alice@example.com".into()),
            since: Some("the day after never".into()),
            ..Default::default()
        };

        let built = build_query(&filters, now());
        assert_eq!(built.text, "from:alice@example.com");
        assert_eq!(built.warnings.len(), 1);
        assert!(matches!(
            &built.warnings[0],
            ConfigError::InvalidSince { input, .. } if input == "the day after never"
        ));
    }

    #[test]
    fn test_blank_values_ignored() {
        let filters = FilterSpec {
            from: Some("   ".into()),
            labels: vec!["".into()],
            ..Default::default()
        };
        assert_eq!(build_query(&filters, now()).text, "");
    }
}
