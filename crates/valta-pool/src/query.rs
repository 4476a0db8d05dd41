//! Per-query state and the message-refinement fold.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::trace;

use valta_error::{Result, ValtaError};
use valta_types::{
    Key, Lookup, Message, Reason, SensorTable, SequenceNumber, Status, ValidTime,
};

use crate::probability::prob_temporal_correct;

/// Which creation time feeds the probability recomputation when a parked
/// query's answer is replaced by a newer message.
///
/// Aging from the *replaced* message's creation time gives the conservative
/// (lower) estimate and is the default; aging from the replacement's own
/// creation time treats the fresher version as the new reference point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProbReference {
    /// Age from the creation time of the message being replaced.
    #[default]
    OriginalCreation,
    /// Age from the creation time of the replacement message.
    ReplacementCreation,
}

/// Retirement configuration shared by the driver and the pool: the maximum
/// arrival-time delay a query may wait, the joint-probability threshold for
/// early acceptance, and the probability-reference choice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetirePolicy {
    /// Maximum arrival-time delay (`dk`) before a query times out.
    pub deadline: u64,
    /// Correctness threshold (`ck`). Zero disables probabilistic
    /// acceptance entirely: the reference-consistency regime, in which
    /// queries retire only via non-ODV completion or timeout.
    pub correctness: f64,
    pub prob_reference: ProbReference,
}

impl RetirePolicy {
    #[must_use]
    pub fn new(deadline: u64, correctness: f64) -> Self {
        Self {
            deadline,
            correctness,
            prob_reference: ProbReference::default(),
        }
    }

    #[must_use]
    pub fn with_prob_reference(mut self, reference: ProbReference) -> Self {
        self.prob_reference = reference;
        self
    }

    /// Whether a joint probability is high enough for early retirement.
    #[must_use]
    pub fn accepts(&self, prob: f64) -> bool {
        self.correctness > 0.0 && prob >= self.correctness
    }
}

/// One key's answer within a query.
#[derive(Debug, Clone)]
pub struct KeyResult {
    message: Option<Arc<Message>>,
    status: Status,
    next_sequence: SequenceNumber,
    prob: f64,
}

impl KeyResult {
    #[must_use]
    pub fn message(&self) -> Option<&Arc<Message>> {
        self.message.as_ref()
    }

    #[must_use]
    pub fn status(&self) -> Status {
        self.status
    }

    #[must_use]
    pub fn next_sequence(&self) -> SequenceNumber {
        self.next_sequence
    }

    /// Per-key probability of temporal correctness.
    #[must_use]
    pub fn prob_temporal_correct(&self) -> f64 {
        self.prob
    }

    /// Sequence number of the current answer, zero on a miss.
    #[must_use]
    pub fn sequence(&self) -> SequenceNumber {
        self.message
            .as_ref()
            .map_or(SequenceNumber::ZERO, |m| m.sequence())
    }

    fn current_sequence(&self) -> SequenceNumber {
        self.sequence()
    }

    fn current_creation(&self) -> ValidTime {
        self.message
            .as_ref()
            .map_or(ValidTime::ZERO, |m| m.creation_time())
    }
}

/// What one `update` call did to a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// The query retired (remove it from the pool).
    pub completed: bool,
    /// At least one current answer was replaced by the new message.
    pub updated: bool,
    pub reason: Reason,
}

impl UpdateOutcome {
    const fn parked() -> Self {
        Self {
            completed: false,
            updated: false,
            reason: Reason::NotCompleted,
        }
    }
}

/// A multi-key point-in-time query and its refinement state.
///
/// `incomplete` counts the keys whose status is not yet OK; the joint
/// probability is the product of the per-key probabilities (keys are
/// assumed independent). The sensor table and retirement policy are passed
/// into [`Query::update`] rather than held here, so the query needs no
/// back-reference to the pool that parks it.
#[derive(Debug)]
pub struct Query {
    arrival_time: ValidTime,
    request_time: ValidTime,
    incomplete: usize,
    prob: f64,
    // Ordered so the joint-probability fold is deterministic across runs.
    results: BTreeMap<Key, KeyResult>,
}

impl Query {
    #[must_use]
    pub fn new(arrival_time: ValidTime, request_time: ValidTime, total_keys: usize) -> Self {
        Self {
            arrival_time,
            request_time,
            incomplete: total_keys,
            prob: 1.0,
            results: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn arrival_time(&self) -> ValidTime {
        self.arrival_time
    }

    #[must_use]
    pub fn request_time(&self) -> ValidTime {
        self.request_time
    }

    /// Number of keys not yet at OK.
    #[must_use]
    pub fn incomplete(&self) -> usize {
        self.incomplete
    }

    /// Joint probability that every returned version was still current at
    /// the request time.
    #[must_use]
    pub fn prob_temporal_correct(&self) -> f64 {
        self.prob
    }

    #[must_use]
    pub fn result(&self, key: Key) -> Option<&KeyResult> {
        self.results.get(&key)
    }

    /// The keys this query requests.
    pub fn keys(&self) -> impl Iterator<Item = Key> + '_ {
        self.results.keys().copied()
    }

    /// Record the initial memtable answer for one key and fold its
    /// probability into the joint product. The caller decrements
    /// `incomplete` via [`Query::complete_one_key`] iff the status is OK.
    pub fn insert_result(&mut self, key: Key, lookup: Lookup, prob: f64) {
        self.results.insert(
            key,
            KeyResult {
                message: lookup.message,
                status: lookup.status,
                next_sequence: lookup.next_sequence,
                prob,
            },
        );
        self.recompute_joint();
    }

    pub fn complete_one_key(&mut self) {
        self.incomplete = self.incomplete.saturating_sub(1);
    }

    /// All requested keys have a definitive (OK) answer.
    #[must_use]
    pub fn all_keys_ok(&self) -> bool {
        self.incomplete == 0
    }

    /// The joint probability meets the correctness threshold.
    #[must_use]
    pub fn maybe_correct(&self, ck: f64) -> bool {
        self.prob >= ck
    }

    fn recompute_joint(&mut self) {
        self.prob = self
            .results
            .values()
            .map(KeyResult::prob_temporal_correct)
            .product();
    }

    /// Fold an incoming message into this query.
    ///
    /// Steps, in order: key-membership check (a miss is the benign
    /// `KeyNotInQuery` no-op), lazy deadline check (timeout retires the
    /// query without applying the update), per-key refinement, joint
    /// probability re-check (threshold met retires with `MaybeCorrect`),
    /// and completion bookkeeping (last key reaching OK retires with
    /// `NonOdv`).
    pub fn update(
        &mut self,
        clock: ValidTime,
        key: Key,
        new_message: &Arc<Message>,
        policy: &RetirePolicy,
        sensors: &SensorTable,
    ) -> Result<UpdateOutcome> {
        let request_time = self.request_time;
        if !self.results.contains_key(&key) {
            return Ok(UpdateOutcome {
                completed: false,
                updated: false,
                reason: Reason::KeyNotInQuery,
            });
        }

        if clock > self.arrival_time.offset(policy.deadline) {
            return Ok(UpdateOutcome {
                completed: true,
                updated: false,
                reason: Reason::Timeout,
            });
        }

        let spec = sensors
            .get(key)
            .ok_or(ValtaError::MissingSensor { key: key.get() })?;
        let current = self
            .results
            .get_mut(&key)
            .expect("membership checked above");
        let step = update_key(request_time, current, new_message, policy, spec)?;

        if step.updated {
            self.recompute_joint();
            if policy.accepts(self.prob) {
                trace!(arrival = %self.arrival_time, prob = self.prob, "query retires on correctness threshold");
                return Ok(UpdateOutcome {
                    completed: true,
                    updated: true,
                    reason: Reason::MaybeCorrect,
                });
            }
        }
        if step.completed {
            self.incomplete = self.incomplete.saturating_sub(1);
            if self.all_keys_ok() {
                return Ok(UpdateOutcome {
                    completed: true,
                    updated: step.updated,
                    reason: step.reason,
                });
            }
        }

        Ok(UpdateOutcome {
            completed: false,
            updated: step.updated,
            reason: Reason::NotCompleted,
        })
    }
}

/// Refine one key's answer with an incoming message.
///
/// `completed` means the key flipped to OK; `updated` means the current
/// answer message was replaced. The two are independent: confirming a
/// successor completes a key without touching its answer.
fn update_key(
    request_time: ValidTime,
    result: &mut KeyResult,
    new_message: &Arc<Message>,
    policy: &RetirePolicy,
    spec: valta_types::SensorSpec,
) -> Result<UpdateOutcome> {
    let current_seq = result.current_sequence();
    let new_seq = new_message.sequence();

    if new_message.creation_time() > request_time {
        // The new message post-dates the requested instant: it can only
        // bound the answer, never become it.
        if result.status == Status::NotFound {
            // Tighten the earliest-known sequence (zero means unset).
            if !result.next_sequence.is_set() || new_seq < result.next_sequence {
                result.next_sequence = new_seq;
            }
            return Ok(UpdateOutcome::parked());
        }
        if new_seq == current_seq.next() {
            // Immediate successor: the current answer is provably not a
            // dangling version.
            result.next_sequence = new_seq;
            result.status = Status::Ok;
            return Ok(UpdateOutcome {
                completed: true,
                updated: false,
                reason: Reason::NonOdv,
            });
        }
        if new_seq > current_seq.next() {
            if result.status == Status::Odv {
                result.next_sequence = new_seq;
            } else {
                result.next_sequence = result.next_sequence.min(new_seq);
            }
            result.status = Status::Hole;
            return Ok(UpdateOutcome::parked());
        }
        return Err(ValtaError::SequenceOutOfOrder {
            current: new_seq.get(),
            next: current_seq.get(),
        });
    }

    // The new message was valid at the requested instant and may be a
    // better answer.
    if new_seq < current_seq {
        return Ok(UpdateOutcome::parked());
    }

    let reference_creation = match policy.prob_reference {
        ProbReference::OriginalCreation => result.current_creation(),
        ProbReference::ReplacementCreation => new_message.creation_time(),
    };
    result.message = Some(Arc::clone(new_message));
    result.prob = prob_temporal_correct(spec, reference_creation, request_time);

    if result.status == Status::Odv {
        // A newer version valid at T: still dangling, just fresher.
        return Ok(UpdateOutcome {
            completed: false,
            updated: true,
            reason: Reason::NotCompleted,
        });
    }
    if result.next_sequence.is_set() && new_seq.next() == result.next_sequence {
        // The gap in front of the known successor is closed.
        result.status = Status::Ok;
        return Ok(UpdateOutcome {
            completed: true,
            updated: true,
            reason: Reason::NonOdv,
        });
    }
    result.status = Status::Hole;
    Ok(UpdateOutcome {
        completed: false,
        updated: true,
        reason: Reason::NotCompleted,
    })
}
