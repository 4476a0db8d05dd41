//! The database facade.
//!
//! A thin wrapper over the in-memory level so that later levels (archival,
//! compaction, L1+, persistence) can interpose without disturbing callers.
//! It also carries the per-key sensor parameters for query-pool clients.

use std::sync::Arc;

use valta_error::Result;
use valta_mvcc::Memtable;
use valta_types::{Key, Lookup, Message, SensorTable, SequenceNumber, ValidTime};

/// Single entry point to the store.
#[derive(Debug)]
pub struct Database {
    mem: Memtable,
    sensors: SensorTable,
}

impl Database {
    /// Open an empty database whose in-memory level starts at
    /// `creation_time`.
    #[must_use]
    pub fn open(creation_time: ValidTime) -> Self {
        Self {
            mem: Memtable::new(creation_time),
            sensors: SensorTable::new(),
        }
    }

    /// Store a new version of `key`'s stream, returning the shared message.
    pub fn put(
        &mut self,
        key: Key,
        sequence: SequenceNumber,
        creation_time: ValidTime,
        value: impl Into<String>,
    ) -> Result<Arc<Message>> {
        self.mem.put(key, sequence, creation_time, value)
    }

    /// The version of `key` valid at `t`, classified.
    pub fn get(&self, key: Key, t: ValidTime) -> Result<Lookup> {
        self.mem.get(key, t)
    }

    pub fn set_sensors(&mut self, sensors: SensorTable) {
        self.sensors = sensors;
    }

    #[must_use]
    pub fn sensors(&self) -> &SensorTable {
        &self.sensors
    }

    /// Archival extension point: records the archive time on the in-memory
    /// level. Compaction semantics are deliberately left to later levels.
    pub fn archive(&mut self, at: ValidTime) {
        self.mem.archive(at);
    }

    /// Number of distinct streams stored.
    #[must_use]
    pub fn stream_count(&self) -> usize {
        self.mem.stream_count()
    }
}
