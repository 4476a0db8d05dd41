//! Per-key ordered index over message versions.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use valta_types::{Message, ValidTime};

/// Ordered set of the versions of one stream, keyed by creation time.
///
/// Backed by a balanced tree: O(log n) ordered lookup, O(log n) neighbor
/// traversal. The memtable depends only on the floor/ceiling/successor
/// interface, so a skip list or sorted array would serve equally.
///
/// Versions are shared as [`Arc`]s; the store owns the canonical reference
/// and suspended queries hold clones.
#[derive(Debug, Default)]
pub struct VersionStore {
    versions: BTreeMap<ValidTime, Arc<Message>>,
}

impl VersionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of versions held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// Insert a version. Precondition: its creation time is unique within
    /// the stream (the driver is responsible for duplicate suppression).
    pub fn insert(&mut self, message: Arc<Message>) {
        self.versions.insert(message.creation_time(), message);
    }

    /// Smallest version with `creation_time >= t`.
    #[must_use]
    pub fn ceiling(&self, t: ValidTime) -> Option<&Arc<Message>> {
        self.versions.range(t..).next().map(|(_, m)| m)
    }

    /// Largest version with `creation_time < t`.
    #[must_use]
    pub fn floor_below(&self, t: ValidTime) -> Option<&Arc<Message>> {
        self.versions.range(..t).next_back().map(|(_, m)| m)
    }

    /// Smallest version with `creation_time > t`.
    #[must_use]
    pub fn successor(&self, t: ValidTime) -> Option<&Arc<Message>> {
        self.versions
            .range((Bound::Excluded(t), Bound::Unbounded))
            .next()
            .map(|(_, m)| m)
    }

    /// Earliest version of the stream.
    #[must_use]
    pub fn first(&self) -> Option<&Arc<Message>> {
        self.versions.values().next()
    }

    /// Latest version of the stream.
    #[must_use]
    pub fn last(&self) -> Option<&Arc<Message>> {
        self.versions.values().next_back()
    }

    /// All versions in creation-time order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Message>> {
        self.versions.values()
    }
}
