//! Per-candidate processing: dedup, resolve, filter, budget, emit, commit
//!
//! Resolution (cache lookup, fetch, parse) of a chunk of candidates runs in
//! parallel on a bounded rayon pool. Everything after that happens on the
//! calling thread in candidate order, so emission order equals candidate
//! order and the checkpoint has a single writer.

use std::sync::Arc;

use anyhow::Result;
use log::{debug, warn};
use rayon::prelude::*;
use regex::{Regex, RegexBuilder};

use super::Shutdown;
use super::checkpoint::CheckpointCoordinator;
use crate::models::{MessageId, StructuredMessage};
use crate::output::MessageSink;
use crate::parser::{self, ParseOptions};
use crate::query::ConfigError;
use crate::remote::{MailboxApi, RemoteError};
use crate::storage::{CachedMessage, MessageCache};

/// Candidates resolved per parallel round, per worker thread
const CHUNK_PER_THREAD: usize = 4;

/// Case-insensitive subject match applied after fetching
#[derive(Debug, Clone)]
pub struct SubjectFilter {
    regex: Regex,
}

impl SubjectFilter {
    /// Compile `pattern` as a case-insensitive regex
    pub fn compile(pattern: &str) -> Result<Self, ConfigError> {
        RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map(|regex| Self { regex })
            .map_err(|e| ConfigError::InvalidSubjectPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })
    }

    /// Compile `pattern`, matching it literally if it isn't a valid regex
    pub fn compile_or_literal(pattern: &str) -> Self {
        match Self::compile(pattern) {
            Ok(filter) => filter,
            Err(e) => {
                warn!("{e}; matching it as plain text");
                Self::compile(&regex::escape(pattern))
                    .unwrap_or_else(|_| unreachable!("escaped pattern is a valid regex"))
            }
        }
    }

    pub fn matches(&self, subject: &str) -> bool {
        self.regex.is_match(subject)
    }
}

/// Maximum number of messages to emit over the process lifetime
#[derive(Debug, Clone, Copy, Default)]
pub struct Budget {
    limit: Option<usize>,
    used: usize,
}

impl Budget {
    /// `None` or `Some(0)` means unlimited
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            limit: limit.filter(|&n| n > 0),
            used: 0,
        }
    }

    pub fn remaining(&self) -> Option<usize> {
        self.limit.map(|limit| limit.saturating_sub(self.used))
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == Some(0)
    }

    fn consume(&mut self) {
        self.used += 1;
    }
}

/// Why processing stopped before the last candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    BudgetReached,
    Cancelled,
}

/// Counters for one batch of candidates
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// Messages written to the sink
    pub emitted: usize,
    /// Candidates already in the processed window
    pub duplicates: usize,
    /// Messages rejected by the subject filter
    pub filtered: usize,
    /// Candidates that could not be fetched
    pub failed: usize,
    /// Messages served from the cache
    pub cache_hits: usize,
    /// Set when candidates were left unhandled
    pub stopped: Option<StopReason>,
}

impl ProcessOutcome {
    /// True if every candidate was handled
    pub fn completed(&self) -> bool {
        self.stopped.is_none()
    }
}

/// Settings for a [`Pipeline`]
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub parse: ParseOptions,
    pub subject_pattern: Option<String>,
    pub max_messages: Option<usize>,
    /// Size of the fetch pool; 0 picks rayon's default
    pub fetch_threads: usize,
}

struct Resolved {
    message: StructuredMessage,
    from_cache: bool,
}

/// Turns candidate ids into emitted messages
pub struct Pipeline {
    api: Arc<dyn MailboxApi>,
    cache: Arc<dyn MessageCache>,
    parse: ParseOptions,
    subject: Option<SubjectFilter>,
    budget: Budget,
    pool: rayon::ThreadPool,
    chunk_size: usize,
}

impl Pipeline {
    pub fn new(
        api: Arc<dyn MailboxApi>,
        cache: Arc<dyn MessageCache>,
        options: PipelineOptions,
    ) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.fetch_threads)
            .thread_name(|i| format!("mailtail-fetch-{i}"))
            .build()?;
        let chunk_size = pool.current_num_threads().max(1) * CHUNK_PER_THREAD;

        let subject = options
            .subject_pattern
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(SubjectFilter::compile_or_literal);

        Ok(Self {
            api,
            cache,
            parse: options.parse,
            subject,
            budget: Budget::new(options.max_messages),
            pool,
            chunk_size,
        })
    }

    pub fn budget(&self) -> &Budget {
        &self.budget
    }

    /// Handle `candidates` in order
    ///
    /// Per-message fetch failures are logged and skipped; those ids stay out
    /// of the window and are reconsidered when seen again. Only a sink
    /// failure is returned as an error.
    pub fn process(
        &mut self,
        candidates: &[MessageId],
        checkpoint: &mut CheckpointCoordinator,
        sink: &mut dyn MessageSink,
        shutdown: &Shutdown,
    ) -> Result<ProcessOutcome> {
        let mut outcome = ProcessOutcome::default();

        let pending: Vec<&MessageId> = candidates
            .iter()
            .filter(|id| {
                let seen = checkpoint.is_processed(id);
                if seen {
                    debug!("Skipping already processed message {id}");
                    outcome.duplicates += 1;
                }
                !seen
            })
            .collect();

        let mut next = 0;
        while next < pending.len() {
            if let Some(stop) = self.stop_reason(shutdown) {
                outcome.stopped = Some(stop);
                return Ok(outcome);
            }

            // Don't fetch far past what the budget can still accept
            let take = match self.budget.remaining() {
                Some(left) => self.chunk_size.min(left),
                None => self.chunk_size,
            };
            let chunk = &pending[next..(next + take).min(pending.len())];
            let resolved = self.resolve_chunk(chunk);

            for (i, (id, result)) in chunk.iter().zip(resolved).enumerate() {
                if let Some(stop) = self.stop_reason(shutdown) {
                    outcome.stopped = Some(stop);
                    return Ok(outcome);
                }

                let resolved = match result {
                    Ok(resolved) => resolved,
                    Err(e) => {
                        warn!("Skipping message {id}: {e}");
                        outcome.failed += 1;
                        continue;
                    }
                };
                if resolved.from_cache {
                    outcome.cache_hits += 1;
                }

                // Messages without a subject pass the subject filter
                let subject = resolved.message.subject_str();
                if let Some(filter) = &self.subject
                    && !subject.is_empty()
                    && !filter.matches(subject)
                {
                    debug!(
                        "Subject of {id} does not match filter: {:?}",
                        resolved.message.subject_str()
                    );
                    outcome.filtered += 1;
                    continue;
                }

                let message = parser::shape(resolved.message, &self.parse);
                sink.emit(&message)?;
                checkpoint.commit(id, message.timestamp);
                self.budget.consume();
                outcome.emitted += 1;

                let last = next + i + 1 == pending.len();
                if self.budget.is_exhausted() && !last {
                    outcome.stopped = Some(StopReason::BudgetReached);
                    return Ok(outcome);
                }
            }

            next += chunk.len();
        }

        Ok(outcome)
    }

    fn stop_reason(&self, shutdown: &Shutdown) -> Option<StopReason> {
        if shutdown.is_cancelled() {
            Some(StopReason::Cancelled)
        } else if self.budget.is_exhausted() {
            Some(StopReason::BudgetReached)
        } else {
            None
        }
    }

    fn resolve_chunk(&self, chunk: &[&MessageId]) -> Vec<Result<Resolved, RemoteError>> {
        self.pool
            .install(|| chunk.par_iter().map(|id| self.resolve(id)).collect())
    }

    /// Cache first, then fetch and write through
    fn resolve(&self, id: &MessageId) -> Result<Resolved, RemoteError> {
        let wanted = self.parse.content();

        let flags = match self.cache.get(id) {
            Ok(Some(entry)) if entry.content.covers(&wanted) => {
                return Ok(Resolved {
                    message: entry.message,
                    from_cache: true,
                });
            }
            // Cached with less content than needed; refetch without losing
            // what the entry already had
            Ok(Some(entry)) => entry.content.union(&wanted),
            Ok(None) => wanted,
            Err(e) => {
                warn!("Cache lookup for {id} failed: {e:#}");
                wanted
            }
        };

        let raw = self.api.get(id)?;
        let message = parser::parse_content(&raw, flags);

        if let Err(e) = self.cache.put(&CachedMessage::new(flags, message.clone())) {
            warn!("Failed to cache message {id}: {e:#}");
        }

        Ok(Resolved {
            message,
            from_cache: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::VecSink;
    use crate::parser::ContentFlags;
    use crate::remote::{FixtureMailbox, raw_message};
    use crate::storage::{InMemoryCheckpointStore, InMemoryMessageCache};

    struct FailingSink;

    impl MessageSink for FailingSink {
        fn emit(&mut self, _message: &StructuredMessage) -> Result<()> {
            anyhow::bail!("stdout closed")
        }
    }

    struct Harness {
        api: Arc<FixtureMailbox>,
        cache: Arc<InMemoryMessageCache>,
        store: Arc<InMemoryCheckpointStore>,
        checkpoint: CheckpointCoordinator,
        sink: VecSink,
        shutdown: Shutdown,
    }

    impl Harness {
        fn new(messages: &[(&str, &str)]) -> Self {
            let api = Arc::new(FixtureMailbox::new());
            for (i, (id, subject)) in messages.iter().enumerate() {
                let ts = 1_700_000_000_000 + i as i64 * 1000;
                api.add_message(raw_message(id, subject, "body text", ts));
            }
            let store = Arc::new(InMemoryCheckpointStore::new());
            Self {
                api,
                cache: Arc::new(InMemoryMessageCache::new()),
                checkpoint: CheckpointCoordinator::load(store.clone()),
                store,
                sink: VecSink::new(),
                shutdown: Shutdown::new(),
            }
        }

        fn pipeline(&self, options: PipelineOptions) -> Pipeline {
            Pipeline::new(
                self.api.clone(),
                self.cache.clone(),
                PipelineOptions {
                    fetch_threads: 2,
                    ..options
                },
            )
            .unwrap()
        }

        fn run(&mut self, pipeline: &mut Pipeline, ids: &[&str]) -> ProcessOutcome {
            let candidates: Vec<MessageId> = ids.iter().map(|id| MessageId::new(*id)).collect();
            pipeline
                .process(&candidates, &mut self.checkpoint, &mut self.sink, &self.shutdown)
                .unwrap()
        }
    }

    #[test]
    fn test_emits_in_candidate_order_and_commits() {
        let ids = ["m1", "m2", "m3", "m4", "m5", "m6", "m7", "m8", "m9", "m10"];
        let messages: Vec<(&str, &str)> = ids.iter().map(|id| (*id, "hello")).collect();
        let mut h = Harness::new(&messages);
        let mut pipeline = h.pipeline(PipelineOptions::default());

        let outcome = h.run(&mut pipeline, &ids);

        assert_eq!(outcome.emitted, 10);
        assert!(outcome.completed());
        assert_eq!(h.sink.ids(), ids.to_vec());
        assert!(h.checkpoint.is_processed(&MessageId::new("m10")));
        assert_eq!(h.store.save_count(), 10);
    }

    #[test]
    fn test_processed_ids_are_skipped_without_fetching() {
        let mut h = Harness::new(&[("m1", "a"), ("m2", "b")]);
        let mut pipeline = h.pipeline(PipelineOptions::default());

        h.run(&mut pipeline, &["m1"]);
        let calls = h.api.get_calls();
        let outcome = h.run(&mut pipeline, &["m1", "m2"]);

        assert_eq!(outcome.duplicates, 1);
        assert_eq!(outcome.emitted, 1);
        assert_eq!(h.api.get_calls(), calls + 1);
        assert_eq!(h.sink.ids(), vec!["m1", "m2"]);
    }

    #[test]
    fn test_subject_filter_rejects_without_committing() {
        let mut h = Harness::new(&[("m1", "Your Invoice #42"), ("m2", "Newsletter")]);
        let mut pipeline = h.pipeline(PipelineOptions {
            subject_pattern: Some("invoice".into()),
            ..Default::default()
        });

        let outcome = h.run(&mut pipeline, &["m1", "m2"]);

        assert_eq!(outcome.emitted, 1);
        assert_eq!(outcome.filtered, 1);
        assert_eq!(h.sink.ids(), vec!["m1"]);
        assert!(!h.checkpoint.is_processed(&MessageId::new("m2")));

        // Rejected messages are reconsidered (from cache) next time
        let again = h.run(&mut pipeline, &["m2"]);
        assert_eq!(again.filtered, 1);
        assert_eq!(again.cache_hits, 1);
    }

    #[test]
    fn test_subject_filter_passes_message_without_subject() {
        let mut h = Harness::new(&[]);
        let mut raw = raw_message("m1", "", "no subject here", 1_700_000_000_000);
        if let Some(headers) = raw.payload.as_mut().and_then(|p| p.headers.as_mut()) {
            headers.retain(|header| header.name != "Subject");
        }
        h.api.add_message(raw);
        let mut pipeline = h.pipeline(PipelineOptions {
            subject_pattern: Some("invoice".into()),
            ..Default::default()
        });

        let outcome = h.run(&mut pipeline, &["m1"]);

        assert_eq!(outcome.emitted, 1);
        assert_eq!(outcome.filtered, 0);
        assert_eq!(h.sink.messages[0].subject_str(), "");
        assert!(h.checkpoint.is_processed(&MessageId::new("m1")));
    }

    #[test]
    fn test_sink_failure_leaves_checkpoint_untouched() {
        let mut h = Harness::new(&[("m1", "a"), ("m2", "b")]);
        let mut pipeline = h.pipeline(PipelineOptions::default());
        let saves = h.store.save_count();

        let candidates = [MessageId::new("m1"), MessageId::new("m2")];
        let result = pipeline.process(
            &candidates,
            &mut h.checkpoint,
            &mut FailingSink,
            &h.shutdown,
        );

        assert!(result.is_err());
        assert!(!h.checkpoint.is_processed(&MessageId::new("m1")));
        assert!(!h.checkpoint.is_processed(&MessageId::new("m2")));
        assert_eq!(h.store.save_count(), saves);
        assert!(!pipeline.budget().is_exhausted());
    }

    #[test]
    fn test_invalid_subject_pattern_matches_literally() {
        let filter = SubjectFilter::compile_or_literal("[urgent");
        assert!(filter.matches("RE: [URGENT] server down"));
        assert!(!filter.matches("urgent"));
        assert!(SubjectFilter::compile("[urgent").is_err());
    }

    #[test]
    fn test_budget_stops_after_n() {
        let mut h = Harness::new(&[("m1", "a"), ("m2", "b"), ("m3", "c")]);
        let mut pipeline = h.pipeline(PipelineOptions {
            max_messages: Some(2),
            ..Default::default()
        });

        let outcome = h.run(&mut pipeline, &["m1", "m2", "m3"]);
        assert_eq!(outcome.emitted, 2);
        assert_eq!(outcome.stopped, Some(StopReason::BudgetReached));
        assert!(pipeline.budget().is_exhausted());

        // Budget spans the pipeline lifetime
        let later = h.run(&mut pipeline, &["m3"]);
        assert_eq!(later.emitted, 0);
        assert_eq!(later.stopped, Some(StopReason::BudgetReached));
        assert_eq!(h.sink.ids(), vec!["m1", "m2"]);
    }

    #[test]
    fn test_budget_reached_on_last_candidate_completes() {
        let mut h = Harness::new(&[("m1", "a"), ("m2", "b")]);
        let mut pipeline = h.pipeline(PipelineOptions {
            max_messages: Some(2),
            ..Default::default()
        });

        let outcome = h.run(&mut pipeline, &["m1", "m2"]);
        assert_eq!(outcome.emitted, 2);
        assert!(outcome.completed());
    }

    #[test]
    fn test_fetch_failure_is_isolated() {
        let mut h = Harness::new(&[("m1", "a"), ("m2", "b"), ("m3", "c")]);
        h.api.fail_get("m2");
        let mut pipeline = h.pipeline(PipelineOptions::default());

        let outcome = h.run(&mut pipeline, &["m1", "m2", "m3"]);

        assert_eq!(outcome.emitted, 2);
        assert_eq!(outcome.failed, 1);
        assert_eq!(h.sink.ids(), vec!["m1", "m3"]);
        assert!(!h.checkpoint.is_processed(&MessageId::new("m2")));
    }

    #[test]
    fn test_cancelled_before_processing() {
        let mut h = Harness::new(&[("m1", "a")]);
        let mut pipeline = h.pipeline(PipelineOptions::default());
        h.shutdown.cancel();

        let outcome = h.run(&mut pipeline, &["m1"]);
        assert_eq!(outcome.stopped, Some(StopReason::Cancelled));
        assert!(h.sink.messages.is_empty());
        assert_eq!(h.api.get_calls(), 0);
    }

    #[test]
    fn test_cache_hit_skips_fetch() {
        let mut h = Harness::new(&[("m1", "cached subject")]);
        let mut cached = parser::parse_content(
            &raw_message("m1", "cached subject", "", 0),
            ContentFlags::default(),
        );
        cached.snippet = Some("from cache".into());
        h.cache
            .put(&CachedMessage::new(ContentFlags::default(), cached))
            .unwrap();
        let mut pipeline = h.pipeline(PipelineOptions::default());

        let outcome = h.run(&mut pipeline, &["m1"]);
        assert_eq!(outcome.cache_hits, 1);
        assert_eq!(h.api.get_calls(), 0);
        assert_eq!(h.sink.messages[0].snippet.as_deref(), Some("from cache"));
    }

    #[test]
    fn test_cache_entry_without_body_is_refetched() {
        let mut h = Harness::new(&[("m1", "subject")]);
        let headers_only = ContentFlags {
            headers: true,
            ..Default::default()
        };
        let cached = parser::parse_content(&raw_message("m1", "subject", "", 0), headers_only);
        h.cache
            .put(&CachedMessage::new(headers_only, cached))
            .unwrap();

        let mut pipeline = h.pipeline(PipelineOptions {
            parse: ParseOptions {
                include_body: true,
                ..Default::default()
            },
            ..Default::default()
        });

        let outcome = h.run(&mut pipeline, &["m1"]);
        assert_eq!(outcome.cache_hits, 0);
        assert_eq!(h.api.get_calls(), 1);
        assert_eq!(h.sink.messages[0].body.as_deref(), Some("body text"));

        let entry = h.cache.get(&MessageId::new("m1")).unwrap().unwrap();
        assert!(entry.content.body);
        assert!(entry.content.headers);
    }

    #[test]
    fn test_emitted_records_are_projected() {
        let mut h = Harness::new(&[("m1", "Projected")]);
        let mut pipeline = h.pipeline(PipelineOptions {
            parse: ParseOptions {
                fields: Some(vec!["subject".into()]),
                ..Default::default()
            },
            ..Default::default()
        });

        h.run(&mut pipeline, &["m1"]);

        let value = serde_json::to_value(&h.sink.messages[0]).unwrap();
        let mut keys: Vec<&str> = value.as_object().unwrap().keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["id", "subject", "threadId", "timestamp"]);
    }

    #[test]
    fn test_budget_helpers() {
        assert_eq!(Budget::new(None).remaining(), None);
        assert_eq!(Budget::new(Some(0)).remaining(), None);
        let mut budget = Budget::new(Some(1));
        assert!(!budget.is_exhausted());
        budget.consume();
        assert!(budget.is_exhausted());
    }
}
