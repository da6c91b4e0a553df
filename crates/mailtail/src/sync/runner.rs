//! The tail loop: poll, process, persist, sleep

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};

use super::checkpoint::CheckpointCoordinator;
use super::engine::{CycleOutcome, RunMode, SyncEngine};
use super::pipeline::{Pipeline, PipelineOptions, ProcessOutcome, StopReason};
use super::Shutdown;
use crate::output::MessageSink;
use crate::parser::ParseOptions;
use crate::query::{FilterSpec, build_query};
use crate::remote::{MailboxApi, RemoteError};
use crate::storage::{CheckpointStore, MessageCache};

/// Page size used when a run-once query fetches everything it matches
pub const FULL_LISTING_PAGE_SIZE: usize = 500;

/// Settings for a [`Tailer`]
#[derive(Debug, Clone)]
pub struct TailOptions {
    pub run_mode: RunMode,
    pub filters: FilterSpec,
    pub parse: ParseOptions,
    /// Listing and history page size
    pub batch_size: usize,
    /// Stop after emitting this many messages
    pub max_messages: Option<usize>,
    /// Sleep between follow-mode cycles, and before retrying a failed one
    pub poll_interval: Duration,
    /// Fetch pool size; 0 picks a default
    pub fetch_threads: usize,
    /// Consecutive failed cycles tolerated in run-once mode
    pub max_retries: usize,
}

impl Default for TailOptions {
    fn default() -> Self {
        Self {
            run_mode: RunMode::Once,
            filters: FilterSpec::default(),
            parse: ParseOptions::default(),
            batch_size: 100,
            max_messages: None,
            poll_interval: Duration::from_secs(30),
            fetch_threads: 4,
            max_retries: 3,
        }
    }
}

impl TailOptions {
    /// Page size for snapshot listing
    ///
    /// A run-once free-text query without a message cap fetches every match,
    /// so it uses the largest page the API allows.
    pub fn listing_page_size(&self) -> usize {
        let has_free_text = self
            .filters
            .query
            .as_deref()
            .is_some_and(|q| !q.trim().is_empty());

        if self.run_mode == RunMode::Once && has_free_text && self.max_messages.is_none() {
            FULL_LISTING_PAGE_SIZE
        } else {
            self.batch_size.max(1)
        }
    }
}

/// Errors that end a tail run
#[derive(Debug, thiserror::Error)]
pub enum TailError {
    #[error("giving up after {attempts} consecutive failed cycles: {last}")]
    RetriesExhausted { attempts: usize, last: RemoteError },
    #[error("failed to write output: {0:#}")]
    Output(anyhow::Error),
    #[error("failed to start: {0:#}")]
    Startup(anyhow::Error),
}

/// Totals for a whole run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub cycles: usize,
    pub failed_cycles: usize,
    pub emitted: usize,
    pub duplicates: usize,
    pub filtered: usize,
    pub failed: usize,
    pub cache_hits: usize,
    pub budget_reached: bool,
    pub cancelled: bool,
}

impl RunSummary {
    fn absorb(&mut self, outcome: &ProcessOutcome) {
        self.emitted += outcome.emitted;
        self.duplicates += outcome.duplicates;
        self.filtered += outcome.filtered;
        self.failed += outcome.failed;
        self.cache_hits += outcome.cache_hits;
    }
}

/// Drives the sync engine and pipeline until done or cancelled
pub struct Tailer {
    engine: SyncEngine,
    pipeline: Pipeline,
    checkpoint: CheckpointCoordinator,
    run_mode: RunMode,
    poll_interval: Duration,
    max_retries: usize,
}

impl Tailer {
    /// Build the query, load the checkpoint and set up the pipeline
    ///
    /// Follow mode resumes from the saved cursor. Run-once always lists from
    /// scratch and relies on the processed window to skip what was emitted
    /// before.
    pub fn new(
        api: Arc<dyn MailboxApi>,
        store: Arc<dyn CheckpointStore>,
        cache: Arc<dyn MessageCache>,
        options: TailOptions,
    ) -> Result<Self, TailError> {
        let built = build_query(&options.filters, Utc::now());
        for warning in &built.warnings {
            warn!("{warning}; ignoring that filter");
        }

        let checkpoint = CheckpointCoordinator::load(store);
        let resume = match options.run_mode {
            RunMode::Follow => checkpoint.cursor().cloned(),
            RunMode::Once => None,
        };
        if let Some(cursor) = &resume {
            info!("Resuming from history cursor {cursor}");
        }

        let engine = SyncEngine::new(
            api.clone(),
            built.text,
            options.run_mode,
            options.listing_page_size(),
            resume,
        );

        let pipeline = Pipeline::new(
            api,
            cache,
            PipelineOptions {
                parse: options.parse,
                subject_pattern: options.filters.subject.clone(),
                max_messages: options.max_messages,
                fetch_threads: options.fetch_threads,
            },
        )
        .map_err(TailError::Startup)?;

        Ok(Self {
            engine,
            pipeline,
            checkpoint,
            run_mode: options.run_mode,
            poll_interval: options.poll_interval,
            max_retries: options.max_retries.max(1),
        })
    }

    /// The compiled search query
    pub fn query(&self) -> &str {
        self.engine.query()
    }

    pub fn checkpoint(&self) -> &CheckpointCoordinator {
        &self.checkpoint
    }

    /// Run until the listing is exhausted (run-once), the message budget is
    /// spent, or `shutdown` is cancelled
    pub fn run(
        &mut self,
        sink: &mut dyn MessageSink,
        shutdown: &Shutdown,
    ) -> Result<RunSummary, TailError> {
        let mut summary = RunSummary::default();
        let mut consecutive_failures = 0;

        loop {
            if shutdown.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            let cycle = self.engine.poll();
            summary.cycles += 1;

            match &cycle.outcome {
                CycleOutcome::Failed(err) => {
                    summary.failed_cycles += 1;
                    consecutive_failures += 1;
                    if self.run_mode == RunMode::Once && consecutive_failures >= self.max_retries {
                        return Err(TailError::RetriesExhausted {
                            attempts: consecutive_failures,
                            last: err.clone(),
                        });
                    }
                }
                _ => consecutive_failures = 0,
            }

            let outcome = self
                .pipeline
                .process(&cycle.candidates, &mut self.checkpoint, sink, shutdown)
                .map_err(TailError::Output)?;
            summary.absorb(&outcome);
            debug!("Cycle {}: {:?} -> {outcome:?}", summary.cycles, cycle.outcome);

            // The cursor covers the whole cycle, so it only moves once every
            // candidate was handled
            if outcome.completed()
                && let Some(cursor) = self.engine.cursor()
                && self.checkpoint.set_cursor(cursor.clone())
            {
                self.checkpoint.persist();
            }

            if self.pipeline.budget().is_exhausted() {
                info!("Reached the maximum message count");
                summary.budget_reached = true;
                break;
            }
            if outcome.stopped == Some(StopReason::Cancelled) {
                summary.cancelled = true;
                break;
            }
            if self.engine.is_finished() {
                break;
            }

            // Run-once keeps paging without pausing unless something failed
            if self.run_mode == RunMode::Once && !cycle.is_failed() {
                continue;
            }
            if shutdown.sleep(self.poll_interval) {
                summary.cancelled = true;
                break;
            }
        }

        info!(
            "Emitted {} messages ({} already seen, {} filtered out, {} failed)",
            summary.emitted, summary.duplicates, summary.filtered, summary.failed
        );
        Ok(summary)
    }
}
