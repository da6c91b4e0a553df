//! Output sinks for emitted messages
//!
//! Only accepted messages are written here. Diagnostics go through `log`,
//! which the binary routes to stderr.

use std::io::Write;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::models::StructuredMessage;

/// Subject length shown by the compact format
const COMPACT_SUBJECT_MAX: usize = 50;

/// Destination for accepted messages
pub trait MessageSink {
    fn emit(&mut self, message: &StructuredMessage) -> Result<()>;
}

/// Rendering of one emitted message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    #[default]
    Json,
    JsonLines,
    Compact,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "json-lines" | "jsonl" => Ok(Self::JsonLines),
            "compact" => Ok(Self::Compact),
            other => Err(format!(
                "unknown output format {other:?} (expected json, json-lines or compact)"
            )),
        }
    }
}

/// Writes one formatted record per message and flushes after each
pub struct WriterSink<W: Write> {
    writer: W,
    format: OutputFormat,
    pretty: bool,
}

impl<W: Write> WriterSink<W> {
    /// `pretty` only affects [`OutputFormat::Json`]
    pub fn new(writer: W, format: OutputFormat, pretty: bool) -> Self {
        Self {
            writer,
            format,
            pretty,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn render(&self, message: &StructuredMessage) -> Result<String> {
        let line = match self.format {
            OutputFormat::Json if self.pretty => serde_json::to_string_pretty(message)?,
            OutputFormat::Json | OutputFormat::JsonLines => serde_json::to_string(message)?,
            OutputFormat::Compact => compact_line(message),
        };
        Ok(line)
    }
}

impl<W: Write> MessageSink for WriterSink<W> {
    fn emit(&mut self, message: &StructuredMessage) -> Result<()> {
        let line = self.render(message)?;
        writeln!(self.writer, "{line}").context("Failed to write message")?;
        self.writer.flush().context("Failed to flush output")?;
        Ok(())
    }
}

/// `timestamp | from | subject`
fn compact_line(message: &StructuredMessage) -> String {
    let timestamp = message
        .timestamp
        .map(|ts| ts.to_rfc3339())
        .unwrap_or_else(|| "unknown".to_string());
    let from = message
        .from
        .as_ref()
        .map(|f| f.email.as_str())
        .filter(|email| !email.is_empty())
        .unwrap_or("unknown");
    let subject = message.subject.as_deref().unwrap_or("No subject");

    format!("{timestamp} | {from} | {}", cap_subject(subject))
}

fn cap_subject(subject: &str) -> String {
    if subject.chars().count() <= COMPACT_SUBJECT_MAX {
        return subject.to_string();
    }
    let mut capped: String = subject.chars().take(COMPACT_SUBJECT_MAX - 3).collect();
    capped.push_str("...");
    capped
}

/// Collects emitted messages in memory
#[derive(Debug, Default)]
pub struct VecSink {
    pub messages: Vec<StructuredMessage>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.messages.iter().map(|m| m.id.as_str()).collect()
    }
}

impl MessageSink for VecSink {
    fn emit(&mut self, message: &StructuredMessage) -> Result<()> {
        self.messages.push(message.clone());
        Ok(())
    }
}
