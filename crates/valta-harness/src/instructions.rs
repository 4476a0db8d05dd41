//! Instruction-file parsing and emission.
//!
//! The wire format is CSV with header `arr,op,key,time,seq` and a variable
//! number of trailing key columns (multi-key Gets). Records must be ordered
//! by ascending arrival time; the reader enforces this.

use std::path::Path;

use smallvec::SmallVec;

use valta_error::{Result, ValtaError};
use valta_types::{Key, SequenceNumber, ValidTime};

/// The mandatory header columns.
pub const HEADER: [&str; 5] = ["arr", "op", "key", "time", "seq"];

/// Operation discriminant. On the wire: 0 = Get, 1 = Put.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Get,
    Put,
}

/// One driver event.
///
/// For a Put, `valid_time` is the new version's creation time and
/// `sequence` its sequence number. For a Get, `valid_time` is the requested
/// instant, `sequence` is ignored, and `extra_keys` carries any further
/// requested streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub arrival: ValidTime,
    pub op: Op,
    pub key: Key,
    pub valid_time: ValidTime,
    pub sequence: SequenceNumber,
    pub extra_keys: SmallVec<[Key; 4]>,
}

impl Instruction {
    /// Every key a Get requests, first key first, duplicates collapsed.
    #[must_use]
    pub fn requested_keys(&self) -> Vec<Key> {
        let mut keys = Vec::with_capacity(1 + self.extra_keys.len());
        keys.push(self.key);
        for &k in &self.extra_keys {
            if !keys.contains(&k) {
                keys.push(k);
            }
        }
        keys
    }
}

fn parse_field(record: u64, field: Option<&str>, name: &str) -> Result<u64> {
    let raw = field.ok_or_else(|| ValtaError::MalformedInstruction {
        record,
        detail: format!("missing `{name}` field"),
    })?;
    raw.trim()
        .parse::<u64>()
        .map_err(|_| ValtaError::MalformedInstruction {
            record,
            detail: format!("`{name}` is not a non-negative integer: `{raw}`"),
        })
}

/// Read and validate an instruction file.
///
/// Fails on a bad header, an unparsable field, an unknown operation code,
/// or an arrival-time regression.
pub fn read_instructions(path: impl AsRef<Path>) -> Result<Vec<Instruction>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .has_headers(false)
        .from_path(path.as_ref())?;

    let mut instructions = Vec::new();
    let mut previous: Option<ValidTime> = None;

    for (index, row) in reader.records().enumerate() {
        let row = row?;
        if index == 0 {
            let actual: Vec<&str> = row.iter().map(str::trim).collect();
            if actual != HEADER {
                return Err(ValtaError::BadInstructionHeader {
                    expected: HEADER.join(","),
                    actual: actual.join(","),
                });
            }
            continue;
        }

        let record = index as u64;
        let arrival = ValidTime::new(parse_field(record, row.get(0), "arr")?);
        let op_code = parse_field(record, row.get(1), "op")?;
        let key = Key::new(parse_field(record, row.get(2), "key")?);
        let valid_time = ValidTime::new(parse_field(record, row.get(3), "time")?);
        let sequence = SequenceNumber::new(parse_field(record, row.get(4), "seq")?);

        let op = match op_code {
            0 => Op::Get,
            1 => Op::Put,
            code => return Err(ValtaError::UnknownOperation { record, code }),
        };

        if let Some(prev) = previous {
            if arrival < prev {
                return Err(ValtaError::UnorderedInstruction {
                    record,
                    previous: prev.get(),
                    arrival: arrival.get(),
                });
            }
        }
        previous = Some(arrival);

        let mut extra_keys = SmallVec::new();
        if op == Op::Get {
            for i in 5..row.len() {
                extra_keys.push(Key::new(parse_field(record, row.get(i), "key")?));
            }
        }

        instructions.push(Instruction {
            arrival,
            op,
            key,
            valid_time,
            sequence,
            extra_keys,
        });
    }

    Ok(instructions)
}

/// Write an instruction file in the wire format, header first.
pub fn write_instructions(
    path: impl AsRef<Path>,
    instructions: &[Instruction],
) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .from_path(path.as_ref())?;
    writer.write_record(HEADER)?;
    for inst in instructions {
        let op_code = match inst.op {
            Op::Get => 0u64,
            Op::Put => 1,
        };
        let mut fields = vec![
            inst.arrival.get().to_string(),
            op_code.to_string(),
            inst.key.get().to_string(),
            inst.valid_time.get().to_string(),
            inst.sequence.get().to_string(),
        ];
        for &k in &inst.extra_keys {
            fields.push(k.get().to_string());
        }
        writer.write_record(&fields)?;
    }
    writer.flush()?;
    Ok(())
}
