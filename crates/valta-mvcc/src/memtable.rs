//! The memtable: key → version store, with status-classified reads.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use valta_error::{Result, ValtaError};
use valta_types::{Key, Lookup, Message, SequenceNumber, Status, ValidTime};

use crate::version_store::VersionStore;

/// In-memory level of the database: one [`VersionStore`] per stream key.
///
/// Owns every stored message. `creation_time` records when this level was
/// opened; `archive_time` is the archival hook. Recording it is the whole
/// of the archival behavior at this level, and any future compaction must
/// not invalidate message references held by live queries.
#[derive(Debug)]
pub struct Memtable {
    creation_time: ValidTime,
    archive_time: Option<ValidTime>,
    streams: HashMap<Key, VersionStore>,
}

impl Memtable {
    #[must_use]
    pub fn new(creation_time: ValidTime) -> Self {
        Self {
            creation_time,
            archive_time: None,
            streams: HashMap::new(),
        }
    }

    #[must_use]
    pub fn creation_time(&self) -> ValidTime {
        self.creation_time
    }

    #[must_use]
    pub fn archive_time(&self) -> Option<ValidTime> {
        self.archive_time
    }

    /// Archival hook: records the archive time. Compaction and eviction are
    /// deliberately out of scope at this level.
    pub fn archive(&mut self, at: ValidTime) {
        self.archive_time = Some(at);
    }

    /// Number of distinct streams with at least one version.
    #[must_use]
    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// Store a new version, creating the stream's store on first use.
    ///
    /// Returns the shared message so the caller can feed the same reference
    /// to the query-pool sweep. Duplicate creation times are the driver's
    /// responsibility.
    pub fn put(
        &mut self,
        key: Key,
        sequence: SequenceNumber,
        creation_time: ValidTime,
        value: impl Into<String>,
    ) -> Result<Arc<Message>> {
        let message = Arc::new(Message::new(creation_time, sequence, value));
        let store = self.streams.entry(key).or_insert_with(|| {
            debug!(%key, "opening version store for new stream");
            VersionStore::new()
        });
        store.insert(Arc::clone(&message));
        Ok(message)
    }

    /// Point-in-time read: the version valid at `t` for `key`, classified.
    ///
    /// - `Ok`: the returned version's immediate successor (by sequence) is
    ///   known and has a creation time strictly after `t`.
    /// - `Odv`: the returned version is the newest known; a later arrival
    ///   could supersede it.
    /// - `Hole`: a later version is known but its sequence number leaves a
    ///   gap; `next_sequence` names the far side of the gap.
    /// - `NotFound`: nothing valid at `t`; `next_sequence` is the earliest
    ///   known sequence for the key (zero if the key is unknown).
    ///
    /// A sequence regression between creation-time neighbors is an
    /// invariant violation and fails with `SequenceOutOfOrder`.
    pub fn get(&self, key: Key, t: ValidTime) -> Result<Lookup> {
        let Some(store) = self.streams.get(&key) else {
            return Ok(Lookup::not_found(SequenceNumber::ZERO));
        };
        if store.is_empty() {
            return Ok(Lookup::not_found(SequenceNumber::ZERO));
        }

        match store.ceiling(t) {
            Some(elem) if elem.creation_time() == t => {
                // Exact match: the requested instant is a version boundary.
                match store.successor(t) {
                    None => Ok(Lookup::odv(Arc::clone(elem))),
                    Some(next) => classify(elem, next),
                }
            }
            Some(elem) => {
                // elem is the first version strictly after t.
                match store.floor_below(t) {
                    None => {
                        // Earliest version not yet generated at t; seed gap
                        // detection with its sequence number.
                        Ok(Lookup::not_found(elem.sequence()))
                    }
                    Some(current) => classify(current, elem),
                }
            }
            None => {
                // t is past every known version.
                let last = store.last().expect("non-empty store has a last version");
                Ok(Lookup::odv(Arc::clone(last)))
            }
        }
    }
}

/// Classify `current` against its creation-time successor `next`.
fn classify(current: &Arc<Message>, next: &Arc<Message>) -> Result<Lookup> {
    let next_sequence = next.sequence();
    if next_sequence == current.sequence().next() {
        Ok(Lookup::new(Arc::clone(current), Status::Ok, next_sequence))
    } else if next_sequence > current.sequence() {
        Ok(Lookup::new(Arc::clone(current), Status::Hole, next_sequence))
    } else {
        Err(ValtaError::SequenceOutOfOrder {
            current: current.sequence().get(),
            next: next_sequence.get(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    fn filled(entries: &[(u64, u64)]) -> Memtable {
        let mut mem = Memtable::new(ValidTime::ZERO);
        for &(ct, seq) in entries {
            mem.put(
                Key::new(1),
                SequenceNumber::new(seq),
                ValidTime::new(ct),
                format!("value-{seq}"),
            )
            .unwrap();
        }
        mem
    }

    fn get(mem: &Memtable, key: u64, t: u64) -> Lookup {
        mem.get(Key::new(key), ValidTime::new(t)).unwrap()
    }

    #[test]
    fn classification_over_a_stream_with_a_gap() {
        // Versions (ct=10,seq=1), (ct=20,seq=2), (ct=40,seq=4): seq 3 is a
        // hole between t=20 and t=40.
        let mem = filled(&[(10, 1), (20, 2), (40, 4)]);

        let r = get(&mem, 1, 5);
        assert_eq!(r.status, Status::NotFound);
        assert_eq!(r.next_sequence, SequenceNumber::new(1));
        assert!(r.message.is_none());

        let r = get(&mem, 1, 10);
        assert_eq!(r.status, Status::Ok);
        assert_eq!(r.sequence(), SequenceNumber::new(1));
        assert_eq!(r.next_sequence, SequenceNumber::new(2));

        let r = get(&mem, 1, 15);
        assert_eq!(r.status, Status::Ok);
        assert_eq!(r.sequence(), SequenceNumber::new(1));
        assert_eq!(r.next_sequence, SequenceNumber::new(2));

        let r = get(&mem, 1, 20);
        assert_eq!(r.status, Status::Hole);
        assert_eq!(r.sequence(), SequenceNumber::new(2));
        assert_eq!(r.next_sequence, SequenceNumber::new(4));

        let r = get(&mem, 1, 30);
        assert_eq!(r.status, Status::Hole);
        assert_eq!(r.sequence(), SequenceNumber::new(2));
        assert_eq!(r.next_sequence, SequenceNumber::new(4));

        let r = get(&mem, 1, 40);
        assert_eq!(r.status, Status::Odv);
        assert_eq!(r.sequence(), SequenceNumber::new(4));
        assert_eq!(r.next_sequence, SequenceNumber::ZERO);

        let r = get(&mem, 1, 1000);
        assert_eq!(r.status, Status::Odv);
        assert_eq!(r.sequence(), SequenceNumber::new(4));
    }

    #[test]
    fn single_version_stream_boundaries() {
        let mut mem = Memtable::new(ValidTime::ZERO);
        mem.put(
            Key::new(100),
            SequenceNumber::new(1),
            ValidTime::new(10),
            "v",
        )
        .unwrap();

        assert_eq!(get(&mem, 100, 9).status, Status::NotFound);
        assert_eq!(get(&mem, 100, 10).status, Status::Odv);
        assert_eq!(get(&mem, 100, 11).status, Status::Odv);
    }

    #[test]
    fn unknown_key_is_notfound_with_zero_seed() {
        let mem = filled(&[(10, 1)]);
        let r = get(&mem, 99, 50);
        assert_eq!(r.status, Status::NotFound);
        assert_eq!(r.next_sequence, SequenceNumber::ZERO);
    }

    #[test]
    fn sequence_regression_is_fatal() {
        // Creation-time order 10 < 20 but sequence order 5 > 2.
        let mem = filled(&[(10, 5), (20, 2)]);
        let err = mem.get(Key::new(1), ValidTime::new(12)).unwrap_err();
        assert!(matches!(
            err,
            ValtaError::SequenceOutOfOrder { current: 5, next: 2 }
        ));
    }

    #[test]
    fn archive_records_the_time_only() {
        let mut mem = filled(&[(10, 1)]);
        assert_eq!(mem.archive_time(), None);
        mem.archive(ValidTime::new(500));
        assert_eq!(mem.archive_time(), Some(ValidTime::new(500)));
        // Stored versions are untouched.
        assert_eq!(get(&mem, 1, 10).status, Status::Odv);
    }

    proptest! {
        /// With agreeing creation-time / sequence orders, every lookup is
        /// sound: OK answers name their true successor, ODV answers are the
        /// stream maximum, HOLE answers straddle the requested time, and
        /// NOTFOUND seeds the earliest known sequence.
        #[test]
        fn lookup_status_is_sound(
            offsets in proptest::collection::btree_set(1u64..500, 1..20),
            probe in 0u64..600,
        ) {
            // Build a stream where both orders agree by construction and
            // sequence gaps appear wherever offsets skip values.
            let mut mem = Memtable::new(ValidTime::ZERO);
            let versions: Vec<(u64, u64)> = offsets
                .iter()
                .copied()
                .map(|o| (o * 3, o))
                .collect();
            for &(ct, seq) in &versions {
                mem.put(
                    Key::new(7),
                    SequenceNumber::new(seq),
                    ValidTime::new(ct),
                    "v",
                )
                .unwrap();
            }

            let r = mem.get(Key::new(7), ValidTime::new(probe)).unwrap();
            let at_or_before: Vec<&(u64, u64)> =
                versions.iter().filter(|(ct, _)| *ct <= probe).collect();

            match r.status {
                Status::NotFound => {
                    prop_assert!(at_or_before.is_empty());
                    prop_assert_eq!(r.next_sequence.get(), versions[0].1);
                }
                Status::Odv => {
                    let (last_ct, last_seq) = *versions.last().unwrap();
                    prop_assert_eq!(r.sequence().get(), last_seq);
                    prop_assert!(last_ct <= probe);
                }
                Status::Ok => {
                    let (ct, seq) = **at_or_before.last().unwrap();
                    prop_assert_eq!(r.sequence().get(), seq);
                    prop_assert_eq!(r.creation_time().get(), ct);
                    prop_assert_eq!(r.next_sequence.get(), seq + 1);
                    // The successor exists and is after the probe.
                    let succ = versions.iter().find(|(_, s)| *s == seq + 1).unwrap();
                    prop_assert!(succ.0 > probe);
                }
                Status::Hole => {
                    let (_, seq) = **at_or_before.last().unwrap();
                    prop_assert_eq!(r.sequence().get(), seq);
                    prop_assert!(r.next_sequence.get() > seq + 1);
                }
            }
        }
    }
}
