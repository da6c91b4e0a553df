//! gmailtail - follow a Gmail mailbox from the terminal
//!
//! Accepted messages go to stdout, one record each. Diagnostics go to stderr.

use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use log::{error, info, warn};
use mailtail::storage::{CheckpointStore, FileCheckpointStore, InMemoryMessageCache, MessageCache};
use mailtail::{
    GmailAuth, GmailClient, GmailCredentials, MailboxApi, Shutdown, SqliteMessageCache, TailError,
    Tailer, WriterSink, build_query,
};

mod cli;
mod settings;

use cli::Cli;
use settings::Settings;

fn main() -> ExitCode {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).map(|s| s.merge(&cli));

    // Initialize logging
    let filter = match &settings {
        Ok(settings) => settings.log_filter(),
        Err(_) => settings::log_filter(cli.quiet, cli.verbose),
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .format_timestamp_millis()
        .target(env_logger::Target::Stderr)
        .init();

    let settings = match settings {
        Ok(settings) => settings,
        Err(e) => {
            error!("Failed to load settings: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    match run(settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(settings: Settings) -> Result<()> {
    // Bootstrap config directory
    if let Err(e) = config::init() {
        warn!("Failed to initialize config directory: {e:#}");
    }

    let options = settings.tail_options()?;
    let unknown = options.parse.unknown_fields();
    if !unknown.is_empty() {
        warn!("Ignoring unknown fields: {}", unknown.join(", "));
    }

    let store: Arc<dyn CheckpointStore> = match &settings.checkpoint.file {
        Some(path) => Arc::new(FileCheckpointStore::new(path)),
        None => Arc::new(FileCheckpointStore::default_location()?),
    };
    if settings.checkpoint.reset {
        store.reset().context("Failed to reset checkpoint")?;
        info!("Checkpoint reset");
    }

    let cache = open_cache(&settings);
    if settings.cache.clear {
        cache.clear().context("Failed to clear message cache")?;
        info!("Message cache cleared");
    }

    let client = connect(&settings)?;

    if settings.dry_run {
        let built = build_query(&options.filters, Utc::now());
        for warning in &built.warnings {
            warn!("{warning}; ignoring that filter");
        }
        info!("Dry run, query: {:?} ({:?} mode)", built.text, options.run_mode);
        return Ok(());
    }

    let shutdown = Shutdown::new();
    let handler = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Shutdown requested, finishing current message");
        handler.cancel();
    }) {
        warn!("Failed to install signal handler: {e}");
    }

    let mut tailer = Tailer::new(client, store, cache, options)?;
    info!("Query: {:?}", tailer.query());

    let stdout = io::stdout();
    let mut sink = WriterSink::new(stdout.lock(), settings.output.format, settings.output.pretty);

    match tailer.run(&mut sink, &shutdown) {
        Ok(summary) => {
            if summary.cancelled {
                info!("Stopped");
            }
            Ok(())
        }
        // Downstream closed the pipe (e.g. `| head`); that's a normal stop
        Err(TailError::Output(e)) if is_broken_pipe(&e) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Authenticate and confirm the mailbox is reachable
fn connect(settings: &Settings) -> Result<Arc<dyn MailboxApi>> {
    let creds = GmailCredentials::load(settings.auth.credentials.as_deref())?;
    let token_path = match &settings.auth.token_file {
        Some(path) => path.clone(),
        None => GmailAuth::default_token_path()?,
    };

    let client = GmailClient::new(GmailAuth::new(
        creds.client_id,
        creds.client_secret,
        token_path,
    ));
    if !client.is_authenticated() {
        info!("No stored Gmail token, starting browser authorization");
    }
    client.authenticate().context("Failed to authenticate with Gmail")?;

    let profile = client.profile().context("Failed to reach the Gmail API")?;
    info!(
        "Connected to {} (history id {})",
        profile.email_address.as_deref().unwrap_or("Gmail"),
        profile.cursor
    );

    Ok(Arc::new(client))
}

/// SQLite cache, falling back to memory if it can't be opened
fn open_cache(settings: &Settings) -> Arc<dyn MessageCache> {
    let Some(path) = settings.cache_path() else {
        return Arc::new(InMemoryMessageCache::new());
    };

    match SqliteMessageCache::new(&path) {
        Ok(cache) => Arc::new(cache),
        Err(e) => {
            warn!("Message cache unavailable, using memory only: {e:#}");
            Arc::new(InMemoryMessageCache::new())
        }
    }
}

fn is_broken_pipe(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<io::Error>()
            .is_some_and(|e| e.kind() == io::ErrorKind::BrokenPipe)
    })
}
