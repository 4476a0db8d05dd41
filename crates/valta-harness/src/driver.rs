//! The two-pass instruction driver.
//!
//! Pass 1 executes Puts and Gets in arrival order against a live database
//! and query pool. Pass 2 replays every Get against the fully-loaded store
//! and counts disagreements with the concurrent answers
//! (`inconsistent_results`). With probabilistic acceptance disabled
//! (ck = 0) and a deadline longer than the trace, pass 1 converges to the
//! replay answers and the count is zero.

use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use valta_core::Database;
use valta_error::{Result, ValtaError};
use valta_pool::{prob_temporal_correct, Query, QueryPool, RetirePolicy};
use valta_types::{Key, SensorTable, SequenceNumber, Status, ValidTime};

use crate::instructions::{read_instructions, Instruction, Op};
use crate::sensors::load_sensor_table;
use crate::stats::RunStats;

/// Per-query answer snapshot used for the consistency comparison: the
/// sequence number last reported for each requested key.
type AnswerMap = HashMap<Key, SequenceNumber>;

/// Identifies one Get across both passes: its record ordinal in the
/// instruction stream. Arrival time alone is not enough — ties between
/// same-tick Gets are legal input, so the answer maps need a monotone
/// disambiguator, the same uniqueness discipline the pool applies to its
/// arrival-time index.
type QueryId = u64;

fn micros(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX)
}

/// Wrap an execution error with the record that triggered it.
fn at_record<T>(record: u64, arrival: ValidTime, result: Result<T>) -> Result<T> {
    result.map_err(|source| ValtaError::Execution {
        record,
        arrival: arrival.get(),
        source: Box::new(source),
    })
}

/// Every key referenced by a Get must have sensor parameters before any
/// query is assembled.
fn validate_sensor_coverage(
    instructions: &[Instruction],
    sensors: &SensorTable,
) -> Result<()> {
    for inst in instructions {
        if inst.op != Op::Get {
            continue;
        }
        for key in inst.requested_keys() {
            if !sensors.contains(key) {
                return Err(ValtaError::MissingSensor { key: key.get() });
            }
        }
    }
    Ok(())
}

/// Copy a query's current per-key answers into its snapshot entry.
fn record_answers(entry: &mut AnswerMap, query: &Query) {
    for key in query.keys() {
        if let Some(result) = query.result(key) {
            entry.insert(key, result.sequence());
        }
    }
}

/// Execute a parsed instruction stream and collect run statistics.
pub fn execute_instructions(
    instructions: &[Instruction],
    policy: &RetirePolicy,
    sensors: &SensorTable,
) -> Result<RunStats> {
    validate_sensor_coverage(instructions, sensors)?;
    info!(
        deadline = policy.deadline,
        correctness = policy.correctness,
        records = instructions.len(),
        "starting two-pass execution"
    );

    let mut stats = RunStats::default();
    let mut db = Database::open(ValidTime::ZERO);
    db.set_sensors(sensors.clone());
    let mut pool = QueryPool::new();

    // Concurrent answers, keyed by query id (record ordinal).
    let mut first_answers: HashMap<QueryId, AnswerMap> = HashMap::new();
    // Which query id a parked arrival time belongs to; entries live
    // exactly as long as the query is in the pool.
    let mut parked_ids: HashMap<ValidTime, QueryId> = HashMap::new();

    for (index, inst) in instructions.iter().enumerate() {
        let record = index as u64 + 1;
        let clock = inst.arrival;
        match inst.op {
            Op::Get => {
                stats.total_queries += 1;
                let keys = inst.requested_keys();
                let mut query = Query::new(clock, inst.valid_time, keys.len());
                let entry = first_answers.entry(record).or_default();

                let started = Instant::now();
                for &key in &keys {
                    let lookup = at_record(record, clock, db.get(key, inst.valid_time))?;
                    let spec = sensors
                        .get(key)
                        .expect("sensor coverage validated eagerly");
                    let prob =
                        prob_temporal_correct(spec, lookup.creation_time(), inst.valid_time);
                    entry.insert(key, lookup.sequence());
                    let is_ok = lookup.status == Status::Ok;
                    query.insert_result(key, lookup, prob);
                    if is_ok {
                        query.complete_one_key();
                    }
                }
                stats.time_first_execution += micros(started.elapsed());

                if query.all_keys_ok() {
                    stats.ok_count += 1;
                } else if policy.accepts(query.prob_temporal_correct()) {
                    debug!(arrival = %clock, prob = query.prob_temporal_correct(),
                        "query retired at submission on correctness threshold");
                    stats.ck_count += 1;
                } else {
                    at_record(record, clock, pool.add(query))?;
                    parked_ids.insert(clock, record);
                }
            }
            Op::Put => {
                let value = format!("value-{}", inst.sequence.get());
                let message = at_record(
                    record,
                    clock,
                    db.put(inst.key, inst.sequence, inst.valid_time, value),
                )?;

                let started = Instant::now();
                let sweep = at_record(
                    record,
                    clock,
                    pool.update(clock, inst.key, &message, policy, sensors),
                )?;
                stats.time_scan_query_pool += micros(started.elapsed());
                stats.scan_count += 1;

                for query in &sweep.completed {
                    let response = clock.since(query.arrival_time());
                    if response > policy.deadline {
                        stats.timeouts += 1;
                        stats.total_response_time += policy.deadline;
                    } else {
                        stats.total_response_time += response;
                    }
                    if let Some(id) = parked_ids.remove(&query.arrival_time()) {
                        if let Some(entry) = first_answers.get_mut(&id) {
                            record_answers(entry, query);
                        }
                    }
                }
                for &arrival in &sweep.updated {
                    let Some(id) = parked_ids.get(&arrival) else {
                        continue;
                    };
                    if let (Some(entry), Some(query)) =
                        (first_answers.get_mut(id), pool.get(arrival))
                    {
                        record_answers(entry, query);
                    }
                }
            }
        }
    }
    stats.update_average_time = pool.update_average_time();
    debug!(parked = pool.len(), "pass 1 complete");

    // Pass 2: replay every Get against the filled store. Record ordinals
    // line up with pass 1 because both passes enumerate the same stream.
    let mut replay_answers: HashMap<QueryId, AnswerMap> = HashMap::new();
    for (index, inst) in instructions.iter().enumerate() {
        if inst.op != Op::Get {
            continue;
        }
        let record = index as u64 + 1;
        let entry = replay_answers.entry(record).or_default();
        for key in inst.requested_keys() {
            let lookup = at_record(record, inst.arrival, db.get(key, inst.valid_time))?;
            entry.insert(key, lookup.sequence());
        }
    }

    for (id, first) in &first_answers {
        match replay_answers.get(id) {
            Some(replay) if replay == first => {}
            _ => {
                debug!(record = *id, "concurrent answer disagrees with replay");
                stats.inconsistent_results += 1;
            }
        }
    }

    info!(
        total_queries = stats.total_queries,
        ok_count = stats.ok_count,
        timeouts = stats.timeouts,
        inconsistent = stats.inconsistent_results,
        "run complete"
    );
    Ok(stats)
}

/// Load both input files and execute the run.
pub fn run_files(
    instructions_path: impl AsRef<Path>,
    sensors_path: impl AsRef<Path>,
    policy: &RetirePolicy,
) -> Result<RunStats> {
    let sensors = load_sensor_table(sensors_path)?;
    let instructions = read_instructions(instructions_path)?;
    execute_instructions(&instructions, policy, &sensors)
}
