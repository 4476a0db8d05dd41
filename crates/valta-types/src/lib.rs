//! Core value types for the valta storage engine.
//!
//! Everything here is plain data: the clock/identifier newtypes shared by
//! every crate in the workspace, the immutable [`Message`] stored in the
//! memtable, the [`Status`] classification returned by point-in-time reads,
//! the [`Reason`] a suspended query retires with, and the per-sensor
//! inter-arrival parameters ([`SensorSpec`] / [`SensorTable`]) consumed by
//! the probability kernel.
//!
//! The runtime machinery (version stores, memtable, query pool) lives in
//! `valta-mvcc` and `valta-pool`; this crate has no behavior beyond
//! construction, accessors and formatting.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Clock and identifier newtypes
// ---------------------------------------------------------------------------

/// Opaque identifier of a sensor data stream.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct Key(u64);

impl Key {
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "k#{}", self.0)
    }
}

/// Per-stream sequence number assigned at the sensor.
///
/// Strictly increasing in generation order for a given key. Gaps are legal
/// (a gap is a HOLE); regressions are an invariant violation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    /// Zero doubles as "unset" in gap-tracking fields (`next_sequence`).
    pub const ZERO: Self = Self(0);

    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// The immediately following sequence number.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// Whether this field holds a real sequence number (see [`Self::ZERO`]).
    #[inline]
    pub const fn is_set(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq#{}", self.0)
    }
}

/// A point on the logical clock.
///
/// Valid time (when data became true in the world) and arrival time (when a
/// record reached the database) share this scale; the driver's serial order
/// is ascending arrival time.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct ValidTime(u64);

impl ValidTime {
    pub const ZERO: Self = Self(0);

    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Ticks elapsed since `earlier`, saturating at zero.
    #[inline]
    #[must_use]
    pub const fn since(self, earlier: Self) -> u64 {
        self.0.saturating_sub(earlier.0)
    }

    /// This instant shifted forward by `ticks`.
    #[inline]
    #[must_use]
    pub const fn offset(self, ticks: u64) -> Self {
        Self(self.0.saturating_add(ticks))
    }
}

impl fmt::Display for ValidTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// One immutable version of a sensor stream.
///
/// Messages never change after insertion; the memtable owns them and hands
/// out [`Arc`] clones, so references held by suspended queries stay valid
/// for the query's whole lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    creation_time: ValidTime,
    sequence: SequenceNumber,
    value: String,
}

impl Message {
    pub fn new(
        creation_time: ValidTime,
        sequence: SequenceNumber,
        value: impl Into<String>,
    ) -> Self {
        Self {
            creation_time,
            sequence,
            value: value.into(),
        }
    }

    /// The valid time at which this version became true in the world.
    #[inline]
    pub const fn creation_time(&self) -> ValidTime {
        self.creation_time
    }

    #[inline]
    pub const fn sequence(&self) -> SequenceNumber {
        self.sequence
    }

    #[inline]
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} {} value={}]",
            self.creation_time, self.sequence, self.value
        )
    }
}

// ---------------------------------------------------------------------------
// Status / Reason
// ---------------------------------------------------------------------------

/// Classification of a point-in-time lookup.
///
/// Sequence-order violations are not a status; they surface as a
/// `SequenceOutOfOrder` failure instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// The returned version is definitive: its immediate successor is known
    /// and lies strictly after the requested time.
    Ok,
    /// On the dangling version: valid at the requested time, but no later
    /// message is known yet, so a future arrival could supersede it.
    Odv,
    /// A later message is known but its sequence number leaves a gap; an
    /// intermediate message could still arrive and be the true answer.
    Hole,
    /// No version existed at the requested time.
    NotFound,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ok => "OK",
            Self::Odv => "ODV",
            Self::Hole => "HOLE",
            Self::NotFound => "NOTFOUND",
        };
        f.write_str(name)
    }
}

/// Why a query-pool update left a query in the state it did.
///
/// These are telemetry classifications, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    /// The query stays parked.
    NotCompleted,
    /// Every requested key reached OK; the answer is provably non-stale.
    NonOdv,
    /// The deadline elapsed before the query could complete.
    Timeout,
    /// The joint temporal-correctness probability met the threshold.
    MaybeCorrect,
    /// The pool indexed this query under a key its result set does not
    /// contain. Benign; treated as a no-op.
    KeyNotInQuery,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotCompleted => "not-completed",
            Self::NonOdv => "non-odv",
            Self::Timeout => "timeout",
            Self::MaybeCorrect => "maybe-correct",
            Self::KeyNotInQuery => "key-not-in-query",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Lookup
// ---------------------------------------------------------------------------

/// The outcome of a point-in-time read: the version (if any), its
/// classification, and the sequence number of the next known version
/// (zero when unset).
#[derive(Debug, Clone)]
pub struct Lookup {
    pub message: Option<Arc<Message>>,
    pub status: Status,
    pub next_sequence: SequenceNumber,
}

impl Lookup {
    pub fn new(message: Arc<Message>, status: Status, next_sequence: SequenceNumber) -> Self {
        Self {
            message: Some(message),
            status,
            next_sequence,
        }
    }

    /// A miss; `next_sequence` carries the earliest known sequence number
    /// for the key (zero if the key has no versions at all), seeding later
    /// gap detection.
    pub fn not_found(next_sequence: SequenceNumber) -> Self {
        Self {
            message: None,
            status: Status::NotFound,
            next_sequence,
        }
    }

    /// A dangling-version answer: `message` is the newest known version.
    pub fn odv(message: Arc<Message>) -> Self {
        Self {
            message: Some(message),
            status: Status::Odv,
            next_sequence: SequenceNumber::ZERO,
        }
    }

    /// Sequence number of the returned version, zero on a miss.
    #[inline]
    pub fn sequence(&self) -> SequenceNumber {
        self.message
            .as_ref()
            .map_or(SequenceNumber::ZERO, |m| m.sequence())
    }

    /// Creation time of the returned version, zero on a miss.
    #[inline]
    pub fn creation_time(&self) -> ValidTime {
        self.message
            .as_ref()
            .map_or(ValidTime::ZERO, |m| m.creation_time())
    }
}

// ---------------------------------------------------------------------------
// Sensor parameters
// ---------------------------------------------------------------------------

/// Inter-arrival distribution parameters of one sensor: the mean and
/// standard deviation, in clock ticks, of the gap between consecutive
/// versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(u32, u32)", into = "(u32, u32)")]
pub struct SensorSpec {
    mean: u32,
    stddev: u32,
}

impl SensorSpec {
    pub const fn new(mean: u32, stddev: u32) -> Self {
        Self { mean, stddev }
    }

    #[inline]
    pub const fn mean(self) -> u32 {
        self.mean
    }

    #[inline]
    pub const fn stddev(self) -> u32 {
        self.stddev
    }
}

impl From<(u32, u32)> for SensorSpec {
    fn from((mean, stddev): (u32, u32)) -> Self {
        Self { mean, stddev }
    }
}

impl From<SensorSpec> for (u32, u32) {
    fn from(spec: SensorSpec) -> Self {
        (spec.mean, spec.stddev)
    }
}

/// Mapping from sensor key to its inter-arrival parameters.
///
/// Serialized as a JSON object whose keys are the decimal stream keys and
/// whose values are `[mean, stddev]` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensorTable {
    sensors: HashMap<u64, SensorSpec>,
}

impl SensorTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: Key, spec: SensorSpec) {
        self.sensors.insert(key.get(), spec);
    }

    #[inline]
    pub fn get(&self, key: Key) -> Option<SensorSpec> {
        self.sensors.get(&key.get()).copied()
    }

    #[inline]
    pub fn contains(&self, key: Key) -> bool {
        self.sensors.contains_key(&key.get())
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = Key> + '_ {
        self.sensors.keys().copied().map(Key::new)
    }
}

impl FromIterator<(Key, SensorSpec)> for SensorTable {
    fn from_iter<I: IntoIterator<Item = (Key, SensorSpec)>>(iter: I) -> Self {
        Self {
            sensors: iter
                .into_iter()
                .map(|(key, spec)| (key.get(), spec))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_number_next_and_unset() {
        assert_eq!(SequenceNumber::new(4).next(), SequenceNumber::new(5));
        assert!(!SequenceNumber::ZERO.is_set());
        assert!(SequenceNumber::new(1).is_set());
    }

    #[test]
    fn valid_time_since_saturates() {
        let early = ValidTime::new(10);
        let late = ValidTime::new(25);
        assert_eq!(late.since(early), 15);
        assert_eq!(early.since(late), 0);
        assert_eq!(early.offset(5), ValidTime::new(15));
    }

    #[test]
    fn lookup_accessors_handle_misses() {
        let miss = Lookup::not_found(SequenceNumber::new(3));
        assert_eq!(miss.sequence(), SequenceNumber::ZERO);
        assert_eq!(miss.creation_time(), ValidTime::ZERO);
        assert_eq!(miss.status, Status::NotFound);
        assert_eq!(miss.next_sequence, SequenceNumber::new(3));

        let hit = Lookup::odv(Arc::new(Message::new(
            ValidTime::new(7),
            SequenceNumber::new(2),
            "v",
        )));
        assert_eq!(hit.sequence(), SequenceNumber::new(2));
        assert_eq!(hit.creation_time(), ValidTime::new(7));
    }

    #[test]
    fn status_display_matches_wire_names() {
        assert_eq!(Status::Ok.to_string(), "OK");
        assert_eq!(Status::Odv.to_string(), "ODV");
        assert_eq!(Status::Hole.to_string(), "HOLE");
        assert_eq!(Status::NotFound.to_string(), "NOTFOUND");
    }

    #[test]
    fn sensor_table_round_trips_through_json() {
        let mut table = SensorTable::new();
        table.insert(Key::new(3), SensorSpec::new(1000, 400));
        table.insert(Key::new(17), SensorSpec::new(750, 320));

        let json = serde_json::to_string(&table).unwrap();
        let back: SensorTable = serde_json::from_str(&json).unwrap();
        assert_eq!(back, table);
        assert_eq!(back.get(Key::new(3)), Some(SensorSpec::new(1000, 400)));
    }

    #[test]
    fn sensor_table_parses_pair_arrays() {
        let table: SensorTable =
            serde_json::from_str(r#"{"0":[900,350],"12":[1200,480]}"#).unwrap();
        assert_eq!(table.get(Key::new(12)), Some(SensorSpec::new(1200, 480)));
        assert!(!table.contains(Key::new(1)));
    }
}
