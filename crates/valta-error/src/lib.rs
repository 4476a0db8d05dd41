//! Primary error type for valta operations.
//!
//! One enum for the whole workspace: storage invariant violations, query
//! pool misuse, and the driver's input-file failure modes. Completion
//! reasons (timeout, probabilistic acceptance, ...) are *not* errors; they
//! live in `valta_types::Reason`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ValtaError {
    // === Storage invariants ===
    /// Sequence ordering contradicts creation-time ordering for a key.
    /// Fatal: the stream's invariants no longer hold.
    #[error("sequences are out of order: current = {current}, next = {next}")]
    SequenceOutOfOrder { current: u64, next: u64 },

    // === Query pool ===
    /// A query with this arrival time is already parked. Arrival time is
    /// the pool's unique query id; the driver regime is one query per tick.
    #[error("query pool already holds a query arriving at t{arrival}")]
    DuplicateArrivalTime { arrival: u64 },

    /// A referenced stream has no entry in the sensor-parameter table.
    #[error("no sensor parameters for key k#{key}")]
    MissingSensor { key: u64 },

    // === Driver input ===
    /// An instruction record could not be parsed.
    #[error("instruction record {record}: {detail}")]
    MalformedInstruction { record: u64, detail: String },

    /// The instruction file header does not match `arr,op,key,time,seq`.
    #[error("bad instruction header: expected `{expected}`, got `{actual}`")]
    BadInstructionHeader { expected: String, actual: String },

    /// Instruction records must be ordered by ascending arrival time.
    #[error(
        "instruction record {record} out of arrival order: t{arrival} after t{previous}"
    )]
    UnorderedInstruction {
        record: u64,
        previous: u64,
        arrival: u64,
    },

    /// An operation code other than 0 (Get) or 1 (Put).
    #[error("instruction record {record}: unknown operation code {code}")]
    UnknownOperation { record: u64, code: u64 },

    /// A harness configuration that cannot produce a well-formed run.
    #[error("invalid configuration: {detail}")]
    InvalidConfig { detail: String },

    /// Execution of a well-formed record failed; wraps the underlying
    /// error with the record that triggered it.
    #[error("record {record} (arrival t{arrival}): {source}")]
    Execution {
        record: u64,
        arrival: u64,
        #[source]
        source: Box<ValtaError>,
    },

    // === Passthroughs ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Result alias used throughout valta.
pub type Result<T> = std::result::Result<T, ValtaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_out_of_order_names_both_sequences() {
        let err = ValtaError::SequenceOutOfOrder {
            current: 7,
            next: 5,
        };
        assert_eq!(
            err.to_string(),
            "sequences are out of order: current = 7, next = 5"
        );
    }

    #[test]
    fn execution_error_reports_the_record() {
        let err = ValtaError::Execution {
            record: 12,
            arrival: 480,
            source: Box::new(ValtaError::MissingSensor { key: 9 }),
        };
        let text = err.to_string();
        assert!(text.contains("record 12"));
        assert!(text.contains("t480"));
    }
}
