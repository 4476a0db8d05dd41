//! The pool of suspended queries, indexed by requested key.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use valta_error::{Result, ValtaError};
use valta_types::{Key, Message, Reason, SensorTable, ValidTime};

use crate::query::{Query, RetirePolicy};

/// Result of one pool sweep: queries that retired (removed from the pool
/// and handed back by value) and the arrival times of queries whose answer
/// changed but which stay parked. A retired query never also appears in
/// `updated`.
#[derive(Debug, Default)]
pub struct PoolSweep {
    pub completed: Vec<Query>,
    pub updated: Vec<ValidTime>,
}

/// Suspended queries indexed two ways: a primary map keyed by arrival time
/// (the unique query id under the one-query-per-tick regime) and a per-key
/// secondary index naming every query that requests the key.
///
/// The pool owns parked queries outright; completion moves a query out of
/// both indexes and returns it to the caller.
#[derive(Debug, Default)]
pub struct QueryPool {
    queries: BTreeMap<ValidTime, Query>,
    by_key: HashMap<Key, BTreeSet<ValidTime>>,
    update_count: u64,
    update_total: Duration,
}

impl QueryPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct queries currently parked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    /// A parked query by its arrival time.
    #[must_use]
    pub fn get(&self, arrival: ValidTime) -> Option<&Query> {
        self.queries.get(&arrival)
    }

    /// Whether any parked query requests `key`.
    #[must_use]
    pub fn tracks_key(&self, key: Key) -> bool {
        self.by_key.contains_key(&key)
    }

    /// Park a query, indexing it under every key it requests.
    ///
    /// Arrival time is the query id; a second query with the same arrival
    /// time fails loudly rather than silently replacing the first.
    pub fn add(&mut self, query: Query) -> Result<()> {
        let arrival = query.arrival_time();
        if self.queries.contains_key(&arrival) {
            return Err(ValtaError::DuplicateArrivalTime {
                arrival: arrival.get(),
            });
        }
        for key in query.keys() {
            self.by_key.entry(key).or_default().insert(arrival);
        }
        debug!(%arrival, keys = query.incomplete(), "query parked");
        self.queries.insert(arrival, query);
        Ok(())
    }

    /// Sweep every query that requests `key` with an incoming message.
    ///
    /// Retired queries are unlinked from all their key entries before the
    /// next query is processed; iteration runs over a snapshot of the key's
    /// arrival set, so the removals never disturb the traversal. Beyond
    /// multiset identity the outcome does not depend on iteration order.
    pub fn update(
        &mut self,
        clock: ValidTime,
        key: Key,
        new_message: &Arc<Message>,
        policy: &RetirePolicy,
        sensors: &SensorTable,
    ) -> Result<PoolSweep> {
        let mut sweep = PoolSweep::default();
        let Some(arrivals) = self.by_key.get(&key) else {
            return Ok(sweep);
        };
        let arrivals: Vec<ValidTime> = arrivals.iter().copied().collect();

        for arrival in arrivals {
            let Some(query) = self.queries.get_mut(&arrival) else {
                continue;
            };
            let started = Instant::now();
            let outcome = query.update(clock, key, new_message, policy, sensors)?;
            self.update_total += started.elapsed();
            self.update_count += 1;

            if outcome.completed {
                let query = self
                    .queries
                    .remove(&arrival)
                    .expect("query present in primary index");
                self.unlink(&query);
                debug!(%arrival, reason = %outcome.reason, "query retired");
                sweep.completed.push(query);
            } else if outcome.updated {
                debug_assert_eq!(outcome.reason, Reason::NotCompleted);
                sweep.updated.push(arrival);
            }
        }
        Ok(sweep)
    }

    /// Remove a retired query from every key entry it appears under.
    fn unlink(&mut self, query: &Query) {
        let arrival = query.arrival_time();
        for key in query.keys() {
            if let Some(set) = self.by_key.get_mut(&key) {
                set.remove(&arrival);
                if set.is_empty() {
                    self.by_key.remove(&key);
                }
            }
        }
    }

    /// Number of per-query update calls performed across all sweeps.
    #[must_use]
    pub fn update_count(&self) -> u64 {
        self.update_count
    }

    /// Wall time spent inside per-query updates.
    #[must_use]
    pub fn update_total_time(&self) -> Duration {
        self.update_total
    }

    /// Mean per-update wall time in microseconds (zero before any update).
    #[must_use]
    pub fn update_average_time(&self) -> f64 {
        if self.update_count == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        {
            self.update_total.as_micros() as f64 / self.update_count as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use valta_types::{Lookup, SensorSpec, SequenceNumber, Status};

    fn msg(ct: u64, seq: u64) -> Arc<Message> {
        Arc::new(Message::new(
            ValidTime::new(ct),
            SequenceNumber::new(seq),
            format!("value-{seq}"),
        ))
    }

    fn sensors(keys: &[u64]) -> SensorTable {
        keys.iter()
            .map(|&k| (Key::new(k), SensorSpec::new(1000, 400)))
            .collect()
    }

    fn hole_query(arrival: u64, request: u64, key: u64) -> Query {
        let mut q = Query::new(ValidTime::new(arrival), ValidTime::new(request), 1);
        q.insert_result(
            Key::new(key),
            Lookup::new(msg(20, 2), Status::Hole, SequenceNumber::new(4)),
            0.4,
        );
        q
    }

    #[test]
    fn add_indexes_under_every_requested_key() {
        let mut pool = QueryPool::new();
        let mut q = Query::new(ValidTime::new(30), ValidTime::new(25), 2);
        q.insert_result(Key::new(1), Lookup::odv(msg(20, 2)), 0.5);
        q.insert_result(Key::new(2), Lookup::odv(msg(21, 9)), 0.5);
        pool.add(q).unwrap();

        assert_eq!(pool.len(), 1);
        assert!(pool.tracks_key(Key::new(1)));
        assert!(pool.tracks_key(Key::new(2)));
        assert!(!pool.tracks_key(Key::new(3)));
    }

    #[test]
    fn duplicate_arrival_time_fails_loudly() {
        let mut pool = QueryPool::new();
        pool.add(hole_query(30, 25, 1)).unwrap();
        let err = pool.add(hole_query(30, 25, 2)).unwrap_err();
        assert!(matches!(
            err,
            ValtaError::DuplicateArrivalTime { arrival: 30 }
        ));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn sweep_on_untracked_key_is_empty() {
        let mut pool = QueryPool::new();
        pool.add(hole_query(30, 25, 1)).unwrap();
        let sweep = pool
            .update(
                ValidTime::new(31),
                Key::new(9),
                &msg(22, 3),
                &RetirePolicy::new(1000, 0.0),
                &sensors(&[1, 9]),
            )
            .unwrap();
        assert!(sweep.completed.is_empty());
        assert!(sweep.updated.is_empty());
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn completion_unlinks_the_query_from_all_keys() {
        let mut pool = QueryPool::new();
        let mut q = Query::new(ValidTime::new(30), ValidTime::new(25), 2);
        q.insert_result(
            Key::new(1),
            Lookup::new(msg(20, 2), Status::Ok, SequenceNumber::new(3)),
            0.5,
        );
        q.complete_one_key();
        q.insert_result(
            Key::new(2),
            Lookup::new(msg(18, 6), Status::Hole, SequenceNumber::new(8)),
            0.5,
        );
        pool.add(q).unwrap();

        // seq 7 closes key 2's hole: the query retires.
        let sweep = pool
            .update(
                ValidTime::new(35),
                Key::new(2),
                &msg(19, 7),
                &RetirePolicy::new(1000, 0.0),
                &sensors(&[1, 2]),
            )
            .unwrap();

        assert_eq!(sweep.completed.len(), 1);
        assert!(sweep.updated.is_empty());
        assert_eq!(pool.len(), 0);
        assert!(!pool.tracks_key(Key::new(1)));
        assert!(!pool.tracks_key(Key::new(2)));
        assert!(pool.update_count() >= 1);
    }

    #[test]
    fn updated_but_parked_queries_stay_readable() {
        let mut pool = QueryPool::new();
        let mut q = Query::new(ValidTime::new(30), ValidTime::new(25), 1);
        q.insert_result(Key::new(1), Lookup::odv(msg(10, 1)), 0.2);
        pool.add(q).unwrap();

        // A fresher version valid at T replaces the answer but the key is
        // still dangling.
        let sweep = pool
            .update(
                ValidTime::new(34),
                Key::new(1),
                &msg(20, 2),
                &RetirePolicy::new(1000, 0.0),
                &sensors(&[1]),
            )
            .unwrap();

        assert!(sweep.completed.is_empty());
        assert_eq!(sweep.updated, vec![ValidTime::new(30)]);
        let parked = pool.get(ValidTime::new(30)).unwrap();
        assert_eq!(
            parked.result(Key::new(1)).unwrap().sequence(),
            SequenceNumber::new(2)
        );
    }

    #[test]
    fn timeout_retires_every_overdue_query_on_the_key() {
        let mut pool = QueryPool::new();
        pool.add(hole_query(30, 25, 1)).unwrap();
        pool.add(hole_query(40, 35, 1)).unwrap();

        // deadline 20: at clock 55 the t30 query is overdue, the t40 one
        // is not (55 <= 40 + 20).
        let sweep = pool
            .update(
                ValidTime::new(55),
                Key::new(1),
                &msg(60, 5),
                &RetirePolicy::new(20, 0.0),
                &sensors(&[1]),
            )
            .unwrap();

        assert_eq!(sweep.completed.len(), 1);
        assert_eq!(
            sweep.completed[0].arrival_time(),
            ValidTime::new(30)
        );
        assert_eq!(pool.len(), 1);
        assert!(pool.get(ValidTime::new(40)).is_some());
    }

    #[test]
    fn threshold_met_during_sweep_retires_with_maybe_correct() {
        let mut pool = QueryPool::new();
        let mut q = Query::new(ValidTime::new(30), ValidTime::new(1000), 1);
        // Parked with a stale answer and a hole; probability near zero.
        q.insert_result(
            Key::new(1),
            Lookup::new(msg(10, 1), Status::Hole, SequenceNumber::new(3)),
            0.01,
        );
        pool.add(q).unwrap();

        // Replacement valid just before T with the fresh-reference policy:
        // per-key probability jumps close to 1 and crosses ck.
        let policy = RetirePolicy::new(10_000, 0.5)
            .with_prob_reference(crate::query::ProbReference::ReplacementCreation);
        let sweep = pool
            .update(ValidTime::new(1100), Key::new(1), &msg(995, 2), &policy, &sensors(&[1]))
            .unwrap();

        assert_eq!(sweep.completed.len(), 1);
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn average_update_time_is_zero_before_any_sweep() {
        let pool = QueryPool::new();
        assert_eq!(pool.update_count(), 0);
        assert!(pool.update_average_time().abs() < f64::EPSILON);
    }
}
