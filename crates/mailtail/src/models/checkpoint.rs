//! Resume state for the tail loop
//!
//! A [`Checkpoint`] is the persisted record of how far the mailbox has been
//! observed: the provider history cursor, the newest emitted timestamp and a
//! bounded window of recently emitted message ids.

use std::cmp::Ordering;
use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::MessageId;

/// Opaque provider token marking a position in the mailbox change history
///
/// Gmail history ids are decimal integers; they are compared numerically when
/// both sides parse, lexically otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncCursor(pub String);

impl SyncCursor {
    pub fn new(cursor: impl Into<String>) -> Self {
        Self(cursor.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Provider ordering between two cursors
    pub fn provider_cmp(&self, other: &SyncCursor) -> Ordering {
        match (self.0.parse::<u64>(), other.0.parse::<u64>()) {
            (Ok(a), Ok(b)) => a.cmp(&b),
            _ => self.0.cmp(&other.0),
        }
    }
}

impl std::fmt::Display for SyncCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Bounded set of recently processed message ids, in insertion order
///
/// Once the set grows past `high_water` entries it is compacted down to the
/// `keep` most recently inserted ids.
#[derive(Debug, Clone)]
pub struct ProcessedIdWindow {
    members: HashSet<String>,
    order: VecDeque<String>,
    high_water: usize,
    keep: usize,
}

impl ProcessedIdWindow {
    pub const HIGH_WATER: usize = 10_000;
    pub const KEEP: usize = 5_000;

    pub fn new() -> Self {
        Self::with_limits(Self::HIGH_WATER, Self::KEEP)
    }

    /// Create a window with custom compaction limits (`keep <= high_water`)
    pub fn with_limits(high_water: usize, keep: usize) -> Self {
        Self {
            members: HashSet::new(),
            order: VecDeque::new(),
            high_water,
            keep: keep.min(high_water),
        }
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.members.contains(id.as_str())
    }

    /// Record an id as processed. Returns false if it was already present.
    pub fn insert(&mut self, id: &MessageId) -> bool {
        if !self.members.insert(id.0.clone()) {
            return false;
        }
        self.order.push_back(id.0.clone());

        if self.order.len() > self.high_water {
            self.compact();
        }
        true
    }

    /// Drop everything but the `keep` newest ids
    pub fn compact(&mut self) {
        while self.order.len() > self.keep {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Iterate ids oldest first
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }
}

impl Default for ProcessedIdWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl Serialize for ProcessedIdWindow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.order.iter())
    }
}

impl<'de> Deserialize<'de> for ProcessedIdWindow {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let ids = Vec::<String>::deserialize(deserializer)?;
        let mut window = Self::new();
        for id in ids {
            window.insert(&MessageId(id));
        }
        Ok(window)
    }
}

/// Persisted resume state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Incremental history position; `None` means bootstrap is required
    #[serde(default)]
    pub cursor: Option<SyncCursor>,
    /// Timestamp of the newest message emitted so far
    #[serde(default)]
    pub last_timestamp: Option<DateTime<Utc>>,
    /// Recently emitted ids, oldest first
    #[serde(default)]
    pub processed_ids: ProcessedIdWindow,
}

impl Checkpoint {
    /// Advance the cursor, refusing to move it backwards.
    ///
    /// Returns true if the stored cursor changed.
    pub fn advance_cursor(&mut self, cursor: SyncCursor) -> bool {
        match &self.cursor {
            Some(current) if cursor.provider_cmp(current) != Ordering::Greater => false,
            _ => {
                self.cursor = Some(cursor);
                true
            }
        }
    }

    /// Move the last-seen timestamp forward only
    pub fn observe_timestamp(&mut self, timestamp: DateTime<Utc>) {
        if self.last_timestamp.is_none_or(|last| timestamp > last) {
            self.last_timestamp = Some(timestamp);
        }
    }

    /// Record an emitted message
    pub fn mark_processed(&mut self, id: &MessageId, timestamp: Option<DateTime<Utc>>) {
        self.processed_ids.insert(id);
        if let Some(ts) = timestamp {
            self.observe_timestamp(ts);
        }
    }

    pub fn is_processed(&self, id: &MessageId) -> bool {
        self.processed_ids.contains(id)
    }
}
