//! Sensor-parameter file loading and emission.
//!
//! The format is a JSON object mapping decimal stream keys to
//! `[mean, stddev]` pairs, loaded once at start-up and injected into the
//! driver.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use valta_error::Result;
use valta_types::SensorTable;

pub fn load_sensor_table(path: impl AsRef<Path>) -> Result<SensorTable> {
    let file = File::open(path.as_ref())?;
    let table = serde_json::from_reader(BufReader::new(file))?;
    Ok(table)
}

pub fn write_sensor_table(path: impl AsRef<Path>, table: &SensorTable) -> Result<()> {
    let file = File::create(path.as_ref())?;
    serde_json::to_writer(BufWriter::new(file), table)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use valta_types::{Key, SensorSpec};

    #[test]
    fn round_trips_a_table() {
        let table: SensorTable = [
            (Key::new(0), SensorSpec::new(900, 350)),
            (Key::new(12), SensorSpec::new(1200, 480)),
        ]
        .into_iter()
        .collect();

        let file = tempfile::NamedTempFile::new().unwrap();
        write_sensor_table(file.path(), &table).unwrap();
        let back = load_sensor_table(file.path()).unwrap();
        assert_eq!(back, table);
    }

    #[test]
    fn loads_hand_written_json() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), r#"{"3":[1000,400]}"#).unwrap();
        let table = load_sensor_table(file.path()).unwrap();
        assert_eq!(table.get(Key::new(3)), Some(SensorSpec::new(1000, 400)));
    }
}
