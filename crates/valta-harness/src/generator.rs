//! Offline dataset generation.
//!
//! Produces a sensor-parameter table and an instruction stream the driver
//! can replay: per-sensor version streams whose inter-arrival gaps are
//! drawn from each sensor's `Normal(mean, stddev)`, transmission-delay
//! jitter between generation and arrival, and a query stream with bounded
//! inter-query gaps. Everything is derived from one seed, so a
//! configuration generates the same dataset every time.

use std::fs;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use smallvec::SmallVec;
use tracing::info;

use valta_error::{Result, ValtaError};
use valta_types::{Key, SensorSpec, SensorTable, SequenceNumber, ValidTime};

use crate::instructions::{write_instructions, Instruction, Op};
use crate::sensors::write_sensor_table;

/// Knobs of the offline generator.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Number of sensor streams (keys 0..sensor_count).
    pub sensor_count: usize,
    /// Generation stops once a stream's clock passes this tick.
    pub clock_max: u64,
    /// First tick at which queries may arrive.
    pub query_start: u64,
    /// Mean transmission delay between generation and arrival of a version.
    pub mean_data_transmission: u64,
    pub data_transmission_stddev: u64,
    /// Mean transmission delay of a query (request time trails arrival).
    pub mean_query_transmission: u64,
    pub query_transmission_stddev: u64,
    /// Streams requested per query (first key plus extras).
    pub keys_per_query: usize,
    pub seed: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            sensor_count: 1000,
            clock_max: 1_000_000,
            query_start: 10_000,
            mean_data_transmission: 500,
            data_transmission_stddev: 1000,
            mean_query_transmission: 500,
            query_transmission_stddev: 1000,
            keys_per_query: 1,
            seed: 42,
        }
    }
}

impl GeneratorConfig {
    fn validate(&self) -> Result<()> {
        if self.sensor_count == 0 {
            return Err(ValtaError::InvalidConfig {
                detail: "sensor_count must be at least 1".to_owned(),
            });
        }
        if self.keys_per_query == 0 {
            return Err(ValtaError::InvalidConfig {
                detail: "keys_per_query must be at least 1".to_owned(),
            });
        }
        if self.data_transmission_stddev == 0 || self.query_transmission_stddev == 0 {
            return Err(ValtaError::InvalidConfig {
                detail: "transmission stddev must be positive".to_owned(),
            });
        }
        Ok(())
    }
}

/// A generated run input: the sensor table and the merged, arrival-ordered
/// instruction stream.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub sensors: SensorTable,
    pub instructions: Vec<Instruction>,
}

/// A normal draw clamped to at least one tick.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn positive_normal(rng: &mut StdRng, mean: u64, stddev: u64) -> u64 {
    #[allow(clippy::cast_precision_loss)]
    let normal = Normal::new(mean as f64, stddev as f64)
        .expect("stddev validated positive and finite");
    normal.sample(rng).max(1.0) as u64
}

/// Generate a dataset from `config`. Deterministic in the seed.
pub fn generate(config: &GeneratorConfig) -> Result<Dataset> {
    config.validate()?;
    let mut rng = StdRng::seed_from_u64(config.seed);

    let mut sensors = SensorTable::new();
    for i in 0..config.sensor_count {
        let spec = SensorSpec::new(rng.gen_range(500..1500), rng.gen_range(300..500));
        sensors.insert(Key::new(i as u64), spec);
    }

    let mut instructions = Vec::new();

    // Version streams: each sensor emits until its generation clock passes
    // clock_max; arrival trails generation by the transmission delay.
    for i in 0..config.sensor_count {
        let key = Key::new(i as u64);
        let spec = sensors.get(key).expect("sensor inserted above");
        let mut clock = 0u64;
        let mut sequence = 0u64;
        while clock < config.clock_max {
            let generation =
                clock + positive_normal(&mut rng, u64::from(spec.mean()), u64::from(spec.stddev()));
            clock = generation;
            let arrival = generation
                + positive_normal(
                    &mut rng,
                    config.mean_data_transmission,
                    config.data_transmission_stddev,
                );
            sequence += 1;
            instructions.push(Instruction {
                arrival: ValidTime::new(arrival),
                op: Op::Put,
                key,
                valid_time: ValidTime::new(generation),
                sequence: SequenceNumber::new(sequence),
                extra_keys: SmallVec::new(),
            });
        }
    }

    // Query stream: one query every 15..25 ticks, each asking for an
    // instant shortly before its own arrival.
    let mut clock = config.query_start;
    while clock < config.clock_max {
        let arrival = clock + rng.gen_range(15..25);
        clock = arrival;
        let target = arrival.saturating_sub(positive_normal(
            &mut rng,
            config.mean_query_transmission,
            config.query_transmission_stddev,
        ));
        let key = Key::new(rng.gen_range(0..config.sensor_count) as u64);
        let mut extra_keys = SmallVec::new();
        for _ in 1..config.keys_per_query {
            extra_keys.push(Key::new(rng.gen_range(0..config.sensor_count) as u64));
        }
        instructions.push(Instruction {
            arrival: ValidTime::new(arrival),
            op: Op::Get,
            key,
            valid_time: ValidTime::new(target),
            sequence: SequenceNumber::ZERO,
            extra_keys,
        });
    }

    // Merge all streams into the driver's serial order.
    instructions.sort_by_key(|inst| inst.arrival);

    info!(
        sensors = config.sensor_count,
        records = instructions.len(),
        seed = config.seed,
        "dataset generated"
    );
    Ok(Dataset {
        sensors,
        instructions,
    })
}

/// Write `dataset` into `dir` as `instructions.txt` + `sensors.json`,
/// returning the two paths.
pub fn write_dataset(dir: impl AsRef<Path>, dataset: &Dataset) -> Result<(PathBuf, PathBuf)> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;
    let instructions_path = dir.join("instructions.txt");
    let sensors_path = dir.join("sensors.json");
    write_instructions(&instructions_path, &dataset.instructions)?;
    write_sensor_table(&sensors_path, &dataset.sensors)?;
    Ok((instructions_path, sensors_path))
}
