//! Cursor and mode state machine
//!
//! The engine decides where candidates come from on each poll:
//!
//! - `Bootstrap`: page through `messages.list` with the compiled query. Run-once
//!   mode walks every page; follow mode takes one page, oldest first. Once
//!   listing is done the profile's history id becomes the cursor and the
//!   engine switches to `Incremental`.
//! - `Incremental`: read `history.list` from the cursor. An expired cursor
//!   drops the engine back to `Bootstrap`.
//!
//! A failed remote call yields no candidates and leaves the cursor and page
//! token exactly where they were, so the next poll retries the same step.

use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, warn};

use crate::models::{MessageId, SyncCursor};
use crate::remote::{MailboxApi, RemoteError};

/// Where the next candidates come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Bootstrap,
    Incremental,
}

/// Whether the run stops after the snapshot listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Once,
    Follow,
}

/// What a poll did besides producing candidates
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A listing page was read and more pages remain
    Paging,
    /// Listing finished and the incremental cursor is established
    Bootstrapped,
    /// History was read from the cursor
    Incremental,
    /// The cursor was rejected; the next poll bootstraps
    Gap,
    /// A remote call failed; nothing moved
    Failed(RemoteError),
}

/// Result of one poll
#[derive(Debug, Clone)]
pub struct Cycle {
    /// Distinct candidate ids in presentation order
    pub candidates: Vec<MessageId>,
    pub outcome: CycleOutcome,
}

impl Cycle {
    fn empty(outcome: CycleOutcome) -> Self {
        Self {
            candidates: Vec::new(),
            outcome,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, CycleOutcome::Failed(_))
    }
}

/// Produces candidate message ids from the remote mailbox
pub struct SyncEngine {
    api: Arc<dyn MailboxApi>,
    query: String,
    run_mode: RunMode,
    page_size: usize,
    history_limit: usize,
    mode: SyncMode,
    cursor: Option<SyncCursor>,
    page_token: Option<String>,
    finished: bool,
}

impl SyncEngine {
    /// Create an engine; a `resume` cursor starts it in incremental mode
    pub fn new(
        api: Arc<dyn MailboxApi>,
        query: impl Into<String>,
        run_mode: RunMode,
        page_size: usize,
        resume: Option<SyncCursor>,
    ) -> Self {
        let mode = match resume {
            Some(_) => SyncMode::Incremental,
            None => SyncMode::Bootstrap,
        };

        Self {
            api,
            query: query.into(),
            run_mode,
            page_size: page_size.max(1),
            history_limit: page_size.max(1),
            mode,
            cursor: resume,
            page_token: None,
            finished: false,
        }
    }

    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    pub fn cursor(&self) -> Option<&SyncCursor> {
        self.cursor.as_ref()
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    /// True once a run-once listing has been fully consumed
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Run one cycle
    pub fn poll(&mut self) -> Cycle {
        match self.mode {
            SyncMode::Bootstrap => self.poll_listing(),
            SyncMode::Incremental => self.poll_history(),
        }
    }

    fn poll_listing(&mut self) -> Cycle {
        let page = match self
            .api
            .list(&self.query, self.page_token.as_deref(), self.page_size)
        {
            Ok(page) => page,
            Err(e) => {
                warn!("Listing messages failed: {e}");
                return Cycle::empty(CycleOutcome::Failed(e));
            }
        };

        let mut candidates = dedup(page.ids);
        debug!(
            "Listed {} candidates (more pages: {})",
            candidates.len(),
            page.next_page_token.is_some()
        );

        if self.run_mode == RunMode::Once
            && let Some(next) = page.next_page_token
        {
            self.page_token = Some(next);
            return Cycle {
                candidates,
                outcome: CycleOutcome::Paging,
            };
        }

        if self.run_mode == RunMode::Follow {
            // Provider lists newest first; start the feed from the oldest
            candidates.reverse();
        }

        // The page is only consumed once the cursor is known; a failure here
        // re-lists the same page next cycle
        let profile = match self.api.profile() {
            Ok(profile) => profile,
            Err(e) => {
                warn!("Fetching profile failed, staying in bootstrap: {e}");
                return Cycle::empty(CycleOutcome::Failed(e));
            }
        };

        debug!("Bootstrap complete at cursor {}", profile.cursor);
        self.cursor = Some(profile.cursor);
        self.page_token = None;
        self.mode = SyncMode::Incremental;
        self.finished = self.run_mode == RunMode::Once;

        Cycle {
            candidates,
            outcome: CycleOutcome::Bootstrapped,
        }
    }

    fn poll_history(&mut self) -> Cycle {
        let Some(cursor) = self.cursor.clone() else {
            self.mode = SyncMode::Bootstrap;
            return self.poll_listing();
        };

        match self.api.history(&cursor, self.history_limit) {
            Ok(batch) => {
                if let Some(next) = batch.cursor
                    && next.provider_cmp(&cursor).is_gt()
                {
                    self.cursor = Some(next);
                }
                let candidates = dedup(batch.added);
                debug!("History since {cursor} added {} candidates", candidates.len());
                Cycle {
                    candidates,
                    outcome: CycleOutcome::Incremental,
                }
            }
            Err(RemoteError::HistoryExpired) => {
                warn!("History cursor {cursor} expired, resynchronising from listing");
                self.cursor = None;
                self.page_token = None;
                self.mode = SyncMode::Bootstrap;
                Cycle::empty(CycleOutcome::Gap)
            }
            Err(e) => {
                warn!("Reading history failed: {e}");
                Cycle::empty(CycleOutcome::Failed(e))
            }
        }
    }
}

/// Drop repeated ids, keeping first occurrences in order
fn dedup(ids: Vec<MessageId>) -> Vec<MessageId> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{FixtureMailbox, HistoryBatch};

    fn ids(cycle: &Cycle) -> Vec<&str> {
        cycle.candidates.iter().map(MessageId::as_str).collect()
    }

    fn engine(api: &Arc<FixtureMailbox>, run_mode: RunMode, resume: Option<&str>) -> SyncEngine {
        SyncEngine::new(
            api.clone(),
            "label:inbox",
            run_mode,
            2,
            resume.map(SyncCursor::new),
        )
    }

    #[test]
    fn test_run_once_pages_then_bootstraps() {
        let api = Arc::new(FixtureMailbox::new());
        api.set_pages(vec![vec!["a", "b"], vec!["c", "d"], vec!["e", "f"]]);
        api.set_profile_cursor("900");
        let mut engine = engine(&api, RunMode::Once, None);

        let first = engine.poll();
        assert_eq!(first.outcome, CycleOutcome::Paging);
        assert_eq!(ids(&first), vec!["a", "b"]);
        assert!(engine.cursor().is_none());

        assert_eq!(ids(&engine.poll()), vec!["c", "d"]);

        let last = engine.poll();
        assert_eq!(last.outcome, CycleOutcome::Bootstrapped);
        assert_eq!(ids(&last), vec!["e", "f"]);
        assert_eq!(engine.cursor(), Some(&SyncCursor::new("900")));
        assert_eq!(engine.mode(), SyncMode::Incremental);
        assert!(engine.is_finished());
        assert_eq!(api.queries(), vec!["label:inbox"; 3]);
    }

    #[test]
    fn test_follow_takes_one_page_oldest_first() {
        let api = Arc::new(FixtureMailbox::new());
        api.set_pages(vec![vec!["new", "mid", "old"], vec!["older"]]);
        let mut engine = engine(&api, RunMode::Follow, None);

        let cycle = engine.poll();
        assert_eq!(cycle.outcome, CycleOutcome::Bootstrapped);
        assert_eq!(ids(&cycle), vec!["old", "mid", "new"]);
        assert_eq!(api.list_calls(), 1);
        assert!(!engine.is_finished());
        assert_eq!(engine.mode(), SyncMode::Incremental);
    }

    #[test]
    fn test_profile_failure_stays_in_bootstrap() {
        let api = Arc::new(FixtureMailbox::new());
        api.set_pages(vec![vec!["a"]]);
        api.fail_next_profiles(1);
        let mut engine = engine(&api, RunMode::Follow, None);

        let failed = engine.poll();
        assert!(failed.is_failed());
        assert!(failed.candidates.is_empty());
        assert_eq!(engine.mode(), SyncMode::Bootstrap);
        assert!(engine.cursor().is_none());

        let retried = engine.poll();
        assert_eq!(retried.outcome, CycleOutcome::Bootstrapped);
        assert_eq!(ids(&retried), vec!["a"]);
        assert_eq!(api.list_calls(), 2);
        assert_eq!(api.profile_calls(), 2);
    }

    #[test]
    fn test_list_failure_retries_same_page() {
        let api = Arc::new(FixtureMailbox::new());
        api.set_pages(vec![vec!["a"], vec!["b"]]);
        let mut engine = engine(&api, RunMode::Once, None);

        assert_eq!(ids(&engine.poll()), vec!["a"]);
        api.fail_next_lists(1);
        assert!(engine.poll().is_failed());
        assert_eq!(ids(&engine.poll()), vec!["b"]);
        assert!(engine.is_finished());
    }

    #[test]
    fn test_resume_cursor_starts_incremental() {
        let api = Arc::new(FixtureMailbox::new());
        api.push_history_added(&["x", "y", "x"], "120");
        let mut engine = engine(&api, RunMode::Follow, Some("100"));
        assert_eq!(engine.mode(), SyncMode::Incremental);

        let cycle = engine.poll();
        assert_eq!(cycle.outcome, CycleOutcome::Incremental);
        assert_eq!(ids(&cycle), vec!["x", "y"]);
        assert_eq!(engine.cursor(), Some(&SyncCursor::new("120")));
        assert_eq!(api.list_calls(), 0);
    }

    #[test]
    fn test_history_never_moves_cursor_backwards() {
        let api = Arc::new(FixtureMailbox::new());
        api.push_history_added(&[], "90");
        let mut engine = engine(&api, RunMode::Follow, Some("100"));

        engine.poll();
        assert_eq!(engine.cursor(), Some(&SyncCursor::new("100")));
    }

    #[test]
    fn test_history_failure_keeps_cursor() {
        let api = Arc::new(FixtureMailbox::new());
        api.push_history(Err(RemoteError::transport("timeout")));
        let mut engine = engine(&api, RunMode::Follow, Some("100"));

        let cycle = engine.poll();
        assert!(cycle.is_failed());
        assert!(cycle.candidates.is_empty());
        assert_eq!(engine.cursor(), Some(&SyncCursor::new("100")));
        assert_eq!(engine.mode(), SyncMode::Incremental);
    }

    #[test]
    fn test_gap_falls_back_to_bootstrap() {
        let api = Arc::new(FixtureMailbox::new());
        api.push_history(Err(RemoteError::HistoryExpired));
        api.set_pages(vec![vec!["b", "a"]]);
        api.set_profile_cursor("500");
        let mut engine = engine(&api, RunMode::Follow, Some("100"));

        let gap = engine.poll();
        assert_eq!(gap.outcome, CycleOutcome::Gap);
        assert!(gap.candidates.is_empty());
        assert_eq!(engine.mode(), SyncMode::Bootstrap);
        assert!(engine.cursor().is_none());

        let resync = engine.poll();
        assert_eq!(resync.outcome, CycleOutcome::Bootstrapped);
        assert_eq!(ids(&resync), vec!["a", "b"]);
        assert_eq!(engine.cursor(), Some(&SyncCursor::new("500")));
    }

    #[test]
    fn test_empty_history_batch_without_cursor() {
        let api = Arc::new(FixtureMailbox::new());
        api.push_history(Ok(HistoryBatch::default()));
        let mut engine = engine(&api, RunMode::Follow, Some("100"));

        let cycle = engine.poll();
        assert!(cycle.candidates.is_empty());
        assert_eq!(engine.cursor(), Some(&SyncCursor::new("100")));
    }

    #[test]
    fn test_listing_duplicates_removed_within_cycle() {
        let api = Arc::new(FixtureMailbox::new());
        api.set_pages(vec![vec!["a", "b", "a", "c", "b"]]);
        let mut engine = engine(&api, RunMode::Once, None);

        assert_eq!(ids(&engine.poll()), vec!["a", "b", "c"]);
    }
}
