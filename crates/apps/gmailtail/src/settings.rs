//! Settings file and command line merging
//!
//! The settings file is JSON with one section per concern:
//!
//! ```json
//! {
//!   "filters": { "from": "alerts@example.com", "labels": ["Ops"] },
//!   "output": { "format": "json-lines", "fields": ["subject", "from"] },
//!   "monitoring": { "follow": true, "poll_interval": "1m" },
//!   "cache": { "enabled": false }
//! }
//! ```
//!
//! Every key is optional. Command line flags override file values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, warn};
use mailtail::storage::CACHE_FILE;
use mailtail::{FilterSpec, OutputFormat, ParseOptions, RunMode, TailOptions};
use serde::Deserialize;

use crate::cli::Cli;

/// Settings filename in the config directory
const SETTINGS_FILE: &str = "config.json";

/// Shortest pause between polls in follow mode
const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub filters: FilterSpec,
    pub output: OutputSettings,
    pub monitoring: MonitoringSettings,
    pub checkpoint: CheckpointSettings,
    pub cache: CacheSettings,
    pub auth: AuthSettings,
    pub dry_run: bool,
    pub verbose: bool,
    pub quiet: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub format: OutputFormat,
    pub pretty: bool,
    pub fields: Option<Vec<String>>,
    pub include_body: bool,
    pub include_headers: bool,
    pub include_attachments: bool,
    pub max_body_length: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MonitoringSettings {
    pub follow: bool,
    pub poll_interval: Interval,
    pub batch_size: usize,
    pub max_messages: Option<usize>,
    pub fetch_threads: usize,
    pub max_retries: usize,
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        let defaults = TailOptions::default();
        Self {
            follow: false,
            poll_interval: Interval::Seconds(defaults.poll_interval.as_secs()),
            batch_size: defaults.batch_size,
            max_messages: None,
            fetch_threads: defaults.fetch_threads,
            max_retries: defaults.max_retries,
        }
    }
}

/// A duration given as whole seconds or as a humantime string
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Interval {
    Seconds(u64),
    Text(String),
}

impl Interval {
    pub fn to_duration(&self) -> Result<Duration> {
        match self {
            Interval::Seconds(secs) => Ok(Duration::from_secs(*secs)),
            Interval::Text(text) => parse_interval(text),
        }
    }
}

/// `30` is seconds; anything else goes through humantime (`30s`, `5m`)
fn parse_interval(text: &str) -> Result<Duration> {
    let text = text.trim();
    if let Ok(secs) = text.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(text).with_context(|| format!("Invalid poll interval {text:?}"))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CheckpointSettings {
    pub file: Option<PathBuf>,
    pub reset: bool,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,
    pub file: Option<PathBuf>,
    pub clear: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            file: None,
            clear: false,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    pub credentials: Option<PathBuf>,
    pub token_file: Option<PathBuf>,
}

impl Settings {
    /// Load `explicit`, or the default settings file if it exists
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return config::load_json_file(path);
        }
        match config::config_path(SETTINGS_FILE) {
            Some(path) if path.exists() => {
                debug!("Loading settings from {}", path.display());
                config::load_json_file(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Overlay command line flags
    pub fn merge(mut self, cli: &Cli) -> Self {
        let filters = &mut self.filters;
        override_with(&mut filters.query, &cli.query);
        override_with(&mut filters.from, &cli.from);
        override_with(&mut filters.to, &cli.to);
        override_with(&mut filters.subject, &cli.subject);
        override_with(&mut filters.since, &cli.since);
        if !cli.labels.is_empty() {
            filters.labels = cli.labels.clone();
        }
        filters.has_attachment |= cli.has_attachment;
        filters.unread_only |= cli.unread_only;

        let output = &mut self.output;
        if let Some(format) = cli.format {
            output.format = format;
        }
        output.pretty |= cli.pretty;
        override_with(&mut output.fields, &cli.fields);
        output.include_body |= cli.include_body;
        output.include_attachments |= cli.include_attachments;
        override_with(&mut output.max_body_length, &cli.max_body_length);

        let monitoring = &mut self.monitoring;
        if cli.follow {
            monitoring.follow = true;
        }
        if cli.once {
            monitoring.follow = false;
        }
        if let Some(interval) = &cli.poll_interval {
            monitoring.poll_interval = Interval::Text(interval.clone());
        }
        if let Some(n) = cli.batch_size {
            monitoring.batch_size = n;
        }
        override_with(&mut monitoring.max_messages, &cli.max_messages);
        if let Some(n) = cli.fetch_threads {
            monitoring.fetch_threads = n;
        }
        if let Some(n) = cli.max_retries {
            monitoring.max_retries = n;
        }

        override_with(&mut self.checkpoint.file, &cli.checkpoint_file);
        self.checkpoint.reset |= cli.reset_checkpoint;

        override_with(&mut self.cache.file, &cli.cache_file);
        if cli.no_cache {
            self.cache.enabled = false;
        }
        self.cache.clear |= cli.clear_cache;

        override_with(&mut self.auth.credentials, &cli.credentials);
        override_with(&mut self.auth.token_file, &cli.token_file);

        self.dry_run |= cli.dry_run;
        if cli.verbose {
            self.verbose = true;
            self.quiet = false;
        }
        if cli.quiet {
            self.quiet = true;
            self.verbose = false;
        }

        self
    }

    /// Default `env_logger` filter; `RUST_LOG` still takes precedence
    pub fn log_filter(&self) -> &'static str {
        log_filter(self.quiet, self.verbose)
    }

    pub fn run_mode(&self) -> RunMode {
        if self.monitoring.follow {
            RunMode::Follow
        } else {
            RunMode::Once
        }
    }

    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            include_body: self.output.include_body,
            include_headers: self.output.include_headers,
            include_attachments: self.output.include_attachments,
            max_body_length: self.output.max_body_length,
            fields: self.output.fields.clone(),
        }
    }

    pub fn tail_options(&self) -> Result<TailOptions> {
        let mut poll_interval = self.monitoring.poll_interval.to_duration()?;
        if self.monitoring.follow && poll_interval < MIN_POLL_INTERVAL {
            warn!("Poll interval {poll_interval:?} is too short, using {MIN_POLL_INTERVAL:?}");
            poll_interval = MIN_POLL_INTERVAL;
        }

        Ok(TailOptions {
            run_mode: self.run_mode(),
            filters: self.filters.clone(),
            parse: self.parse_options(),
            batch_size: self.monitoring.batch_size,
            max_messages: self.monitoring.max_messages.filter(|&n| n > 0),
            poll_interval,
            fetch_threads: self.monitoring.fetch_threads,
            max_retries: self.monitoring.max_retries,
        })
    }

    /// Cache database path, or `None` when caching is disabled
    pub fn cache_path(&self) -> Option<PathBuf> {
        if !self.cache.enabled {
            return None;
        }
        self.cache
            .file
            .clone()
            .or_else(|| config::config_path(CACHE_FILE))
    }
}

/// Filter for quiet/verbose flags
pub fn log_filter(quiet: bool, verbose: bool) -> &'static str {
    if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "info"
    }
}

fn override_with<T: Clone>(target: &mut Option<T>, value: &Option<T>) {
    if value.is_some() {
        target.clone_from(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::tempdir;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("gmailtail").chain(args.iter().copied())).unwrap()
    }

    fn load(json: &str) -> Settings {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, json).unwrap();
        Settings::load(Some(&path)).unwrap()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default().merge(&cli(&[]));
        let options = settings.tail_options().unwrap();

        assert_eq!(options.run_mode, RunMode::Once);
        assert_eq!(options.batch_size, 100);
        assert_eq!(options.poll_interval, Duration::from_secs(30));
        assert!(settings.cache.enabled);
        assert_eq!(settings.output.format, OutputFormat::Json);
        assert_eq!(settings.log_filter(), "info");
    }

    #[test]
    fn test_file_values_load() {
        let settings = load(
            r#"{
                "filters": { "from": "alerts@example.com", "labels": ["Ops"], "unread_only": true },
                "output": { "format": "json-lines", "fields": ["subject"], "include_body": true },
                "monitoring": { "follow": true, "poll_interval": "2m", "max_messages": 10 },
                "cache": { "enabled": false },
                "quiet": true
            }"#,
        );

        assert_eq!(settings.filters.from.as_deref(), Some("alerts@example.com"));
        assert_eq!(settings.filters.labels, vec!["Ops"]);
        assert!(settings.filters.unread_only);
        assert_eq!(settings.output.format, OutputFormat::JsonLines);
        assert!(settings.cache_path().is_none());
        assert_eq!(settings.log_filter(), "error");

        let options = settings.tail_options().unwrap();
        assert_eq!(options.run_mode, RunMode::Follow);
        assert_eq!(options.poll_interval, Duration::from_secs(120));
        assert_eq!(options.max_messages, Some(10));
        assert!(options.parse.include_body);
    }

    #[test]
    fn test_cli_overrides_file() {
        let settings = load(
            r#"{
                "filters": { "from": "file@example.com", "labels": ["FromFile"] },
                "monitoring": { "follow": true, "poll_interval": 10 },
                "quiet": true
            }"#,
        )
        .merge(&cli(&[
            "--from",
            "cli@example.com",
            "--label",
            "FromCli",
            "--once",
            "--poll-interval",
            "45",
            "--verbose",
            "--cache-file",
            "/tmp/cache.sqlite",
        ]));

        assert_eq!(settings.filters.from.as_deref(), Some("cli@example.com"));
        assert_eq!(settings.filters.labels, vec!["FromCli"]);
        assert_eq!(settings.run_mode(), RunMode::Once);
        assert_eq!(settings.log_filter(), "debug");
        assert_eq!(
            settings.cache_path(),
            Some(PathBuf::from("/tmp/cache.sqlite"))
        );
        assert_eq!(
            settings.tail_options().unwrap().poll_interval,
            Duration::from_secs(45)
        );
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(Settings::load(Some(&dir.path().join("nope.json"))).is_err());
    }

    #[test]
    fn test_parse_interval() {
        assert_eq!(parse_interval("30").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_interval("1m 30s").unwrap(), Duration::from_secs(90));
        assert!(parse_interval("soon").is_err());
    }

    #[test]
    fn test_follow_poll_interval_has_a_floor() {
        let follow = Settings::default().merge(&cli(&["--follow", "--poll-interval", "0"]));
        assert_eq!(
            follow.tail_options().unwrap().poll_interval,
            MIN_POLL_INTERVAL
        );

        let sub_second = Settings::default().merge(&cli(&["-f", "--poll-interval", "200ms"]));
        assert_eq!(
            sub_second.tail_options().unwrap().poll_interval,
            MIN_POLL_INTERVAL
        );

        // Run-once only pauses after failures, so it keeps what it was given
        let once = Settings::default().merge(&cli(&["--poll-interval", "0"]));
        assert_eq!(once.tail_options().unwrap().poll_interval, Duration::ZERO);
    }

    #[test]
    fn test_zero_max_messages_means_unlimited() {
        let settings = Settings::default().merge(&cli(&["--max-messages", "0"]));
        assert_eq!(settings.tail_options().unwrap().max_messages, None);
    }
}
