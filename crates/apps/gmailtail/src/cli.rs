//! Command line interface

use std::path::PathBuf;

use clap::Parser;
use mailtail::OutputFormat;

/// Tail a Gmail mailbox like a log file
///
/// Every flag can also be set in the JSON settings file; flags given on the
/// command line win.
#[derive(Parser, Debug, Default)]
#[command(name = "gmailtail", version, about, long_about = None)]
pub struct Cli {
    /// Settings file (default: ~/.config/gmailtail/config.json, if present)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Raw Gmail search query, passed through as-is
    #[arg(long, help_heading = "Filters")]
    pub query: Option<String>,

    /// Only messages from this sender
    #[arg(long, help_heading = "Filters")]
    pub from: Option<String>,

    /// Only messages sent to this recipient
    #[arg(long, help_heading = "Filters")]
    pub to: Option<String>,

    /// Subject text; also applied as a case-insensitive regex after fetching
    #[arg(long, help_heading = "Filters")]
    pub subject: Option<String>,

    /// Only messages with this label (repeatable)
    #[arg(long = "label", value_name = "LABEL", help_heading = "Filters")]
    pub labels: Vec<String>,

    /// Only messages with attachments
    #[arg(long, help_heading = "Filters")]
    pub has_attachment: bool,

    /// Only unread messages
    #[arg(long, help_heading = "Filters")]
    pub unread_only: bool,

    /// Only messages after this date (2024-01-15, yesterday, 7d, "2 weeks ago")
    #[arg(long, value_name = "DATE", help_heading = "Filters")]
    pub since: Option<String>,

    /// Output format: json, json-lines or compact
    #[arg(long, value_name = "FORMAT", help_heading = "Output")]
    pub format: Option<OutputFormat>,

    /// Pretty-print json output
    #[arg(long, help_heading = "Output")]
    pub pretty: bool,

    /// Comma-separated fields to emit (id, threadId and timestamp are always kept)
    #[arg(long, value_delimiter = ',', value_name = "FIELDS", help_heading = "Output")]
    pub fields: Option<Vec<String>>,

    /// Include the message body
    #[arg(long, help_heading = "Output")]
    pub include_body: bool,

    /// Include attachment metadata
    #[arg(long, help_heading = "Output")]
    pub include_attachments: bool,

    /// Truncate bodies longer than this many characters
    #[arg(long, value_name = "CHARS", help_heading = "Output")]
    pub max_body_length: Option<usize>,

    /// Keep polling for new messages
    #[arg(short = 'f', long, conflicts_with = "once", help_heading = "Monitoring")]
    pub follow: bool,

    /// List matching messages once and exit (default)
    #[arg(long, help_heading = "Monitoring")]
    pub once: bool,

    /// Time between polls in follow mode (seconds, or e.g. 30s, 5m)
    #[arg(long, value_name = "DURATION", help_heading = "Monitoring")]
    pub poll_interval: Option<String>,

    /// Messages per listing page
    #[arg(long, value_name = "N", help_heading = "Monitoring")]
    pub batch_size: Option<usize>,

    /// Stop after emitting this many messages
    #[arg(long, value_name = "N", help_heading = "Monitoring")]
    pub max_messages: Option<usize>,

    /// Parallel message fetches
    #[arg(long, value_name = "N", help_heading = "Monitoring")]
    pub fetch_threads: Option<usize>,

    /// Consecutive failed polls tolerated before a one-shot run gives up
    #[arg(long, value_name = "N", help_heading = "Monitoring")]
    pub max_retries: Option<usize>,

    /// Checkpoint file (default: ~/.config/gmailtail/checkpoint.json)
    #[arg(long, value_name = "PATH", help_heading = "State")]
    pub checkpoint_file: Option<PathBuf>,

    /// Discard the saved checkpoint before starting
    #[arg(long, help_heading = "State")]
    pub reset_checkpoint: bool,

    /// Message cache database (default: ~/.config/gmailtail/cache.sqlite)
    #[arg(long, value_name = "PATH", help_heading = "State")]
    pub cache_file: Option<PathBuf>,

    /// Keep parsed messages in memory only
    #[arg(long, help_heading = "State")]
    pub no_cache: bool,

    /// Empty the message cache before starting
    #[arg(long, help_heading = "State")]
    pub clear_cache: bool,

    /// OAuth client credentials JSON downloaded from Google Cloud Console
    #[arg(long, value_name = "PATH", help_heading = "Authentication")]
    pub credentials: Option<PathBuf>,

    /// Where the OAuth token is stored (default: ~/.config/gmailtail/token.json)
    #[arg(long, value_name = "PATH", help_heading = "Authentication")]
    pub token_file: Option<PathBuf>,

    /// Connect and show the query without processing any messages
    #[arg(long)]
    pub dry_run: bool,

    /// Debug diagnostics on stderr
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Errors only on stderr
    #[arg(short, long)]
    pub quiet: bool,
}
