//! The asynchronous query pool.
//!
//! Queries that the memtable cannot answer definitively are parked here and
//! refined on every incoming message. A parked query retires when every
//! requested key reaches OK (non-ODV), when its joint temporal-correctness
//! probability meets the configured threshold, or when its deadline lapses
//! (evaluated lazily at update time; nothing fires asynchronously).
//!
//! The probability kernel ([`prob_temporal_correct`]) turns a per-sensor
//! inter-arrival distribution into the probability that a returned version
//! was still current at the requested time.

pub mod pool;
pub mod probability;
pub mod query;

pub use pool::{PoolSweep, QueryPool};
pub use probability::prob_temporal_correct;
pub use query::{KeyResult, ProbReference, Query, RetirePolicy, UpdateOutcome};
