//! Driver harness for the valta storage core.
//!
//! Feeds `(Put, Get)` event streams to the database in arrival-time order,
//! parks unsatisfied queries in the pool, and collects run statistics. Also
//! hosts the offline dataset generator and the loaders for the two input
//! files (instruction CSV, sensor-parameter JSON).

pub mod driver;
pub mod generator;
pub mod instructions;
pub mod sensors;
pub mod stats;

pub use driver::{execute_instructions, run_files};
pub use generator::{generate, write_dataset, Dataset, GeneratorConfig};
pub use instructions::{read_instructions, write_instructions, Instruction, Op};
pub use sensors::{load_sensor_table, write_sensor_table};
pub use stats::RunStats;
