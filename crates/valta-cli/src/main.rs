//! The `valta` binary: generate run inputs, execute them, emit statistics.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use valta_harness::{generate, run_files, write_dataset, GeneratorConfig};
use valta_pool::{ProbReference, RetirePolicy};

#[derive(Parser, Debug)]
#[command(
    name = "valta",
    version,
    about = "Log-structured multi-version store for sensor streams",
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a sensors.json + instructions.txt dataset.
    Generate {
        /// Output directory for the dataset files.
        #[arg(long, value_name = "DIR", default_value = "input")]
        out_dir: PathBuf,

        /// Number of sensor streams.
        #[arg(long, default_value_t = 1000)]
        sensors: usize,

        /// Generation horizon on the logical clock.
        #[arg(long, default_value_t = 1_000_000)]
        clock_max: u64,

        /// Mean transmission delay of data versions, in ticks.
        #[arg(long, default_value_t = 500)]
        mean_data_transmission: u64,

        /// Mean transmission delay of queries, in ticks.
        #[arg(long, default_value_t = 500)]
        mean_query_transmission: u64,

        /// Keys requested per query.
        #[arg(long, default_value_t = 1)]
        keys_per_query: usize,

        /// Generator seed.
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },

    /// Execute an instruction file and print the statistics record.
    Run {
        /// Instruction CSV (header `arr,op,key,time,seq`).
        instructions: PathBuf,

        /// Sensor-parameter JSON.
        sensors: PathBuf,

        /// Maximum arrival-time delay before a query times out.
        #[arg(long, default_value_t = 2000)]
        deadline: u64,

        /// Correctness threshold for early retirement (0 disables it).
        #[arg(long, default_value_t = 0.0)]
        correctness: f64,

        /// Recompute replacement probabilities from the replacement's own
        /// creation time instead of the replaced answer's.
        #[arg(long, default_value_t = false)]
        fresh_prob_reference: bool,

        /// Also write the statistics record to this path.
        #[arg(long, value_name = "FILE")]
        stats_out: Option<PathBuf>,
    },
}

fn run(cli: Cli) -> valta_error::Result<()> {
    match cli.command {
        Command::Generate {
            out_dir,
            sensors,
            clock_max,
            mean_data_transmission,
            mean_query_transmission,
            keys_per_query,
            seed,
        } => {
            let config = GeneratorConfig {
                sensor_count: sensors,
                clock_max,
                mean_data_transmission,
                mean_query_transmission,
                keys_per_query,
                seed,
                ..GeneratorConfig::default()
            };
            let dataset = generate(&config)?;
            let (instructions_path, sensors_path) = write_dataset(&out_dir, &dataset)?;
            println!(
                "wrote {} records to {} and {} sensors to {}",
                dataset.instructions.len(),
                instructions_path.display(),
                dataset.sensors.len(),
                sensors_path.display()
            );
            Ok(())
        }
        Command::Run {
            instructions,
            sensors,
            deadline,
            correctness,
            fresh_prob_reference,
            stats_out,
        } => {
            let mut policy = RetirePolicy::new(deadline, correctness);
            if fresh_prob_reference {
                policy = policy.with_prob_reference(ProbReference::ReplacementCreation);
            }
            let stats = run_files(&instructions, &sensors, &policy)?;
            let json = stats.to_json()?;
            println!("{json}");
            if let Some(path) = stats_out {
                fs::write(path, json)?;
            }
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            eprintln!("valta: {err}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_a_run_invocation() {
        let cli = Cli::parse_from([
            "valta",
            "run",
            "input/instructions.txt",
            "input/sensors.json",
            "--deadline",
            "500",
            "--correctness",
            "0.9",
        ]);
        match cli.command {
            Command::Run {
                deadline,
                correctness,
                ..
            } => {
                assert_eq!(deadline, 500);
                assert!((correctness - 0.9).abs() < f64::EPSILON);
            }
            Command::Generate { .. } => panic!("expected run subcommand"),
        }
    }

    #[test]
    fn cli_generate_defaults_match_the_generator() {
        let cli = Cli::parse_from(["valta", "generate"]);
        match cli.command {
            Command::Generate { sensors, seed, .. } => {
                assert_eq!(sensors, 1000);
                assert_eq!(seed, 42);
            }
            Command::Run { .. } => panic!("expected generate subcommand"),
        }
    }
}
