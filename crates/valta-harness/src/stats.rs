//! Per-run statistics.

use serde::{Deserialize, Serialize};

use valta_error::Result;

/// The statistics record emitted after a run.
///
/// Times are microseconds of wall clock except `total_response_time`, which
/// is in arrival-clock ticks (clamped to the deadline for timeouts).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    /// Number of Get instructions executed.
    pub total_queries: u64,
    /// Summed response time, in ticks, of queries retired by the pool.
    pub total_response_time: u64,
    /// Queries answered definitively at first execution.
    pub ok_count: u64,
    /// Queries retired immediately on the correctness threshold.
    pub ck_count: u64,
    /// Queries retired by deadline expiry.
    pub timeouts: u64,
    /// Queries whose concurrent answer disagreed with the final replay.
    pub inconsistent_results: u64,
    /// Wall time of first executions (initial Gets), microseconds.
    pub time_first_execution: u64,
    /// Wall time of query-pool sweeps, microseconds.
    pub time_scan_query_pool: u64,
    /// Number of pool sweeps performed.
    pub scan_count: u64,
    /// Mean per-query update time inside sweeps, microseconds.
    pub update_average_time: f64,
}

impl RunStats {
    /// Pretty-printed JSON for emission.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Equality on the deterministic (non-timing) fields only; two runs of
    /// the same instructions agree on these even though wall-clock fields
    /// differ.
    #[must_use]
    pub fn logical_eq(&self, other: &Self) -> bool {
        self.total_queries == other.total_queries
            && self.total_response_time == other.total_response_time
            && self.ok_count == other.ok_count
            && self.ck_count == other.ck_count
            && self.timeouts == other.timeouts
            && self.inconsistent_results == other.inconsistent_results
            && self.scan_count == other.scan_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_carries_every_wire_key() {
        let stats = RunStats {
            total_queries: 10,
            ..RunStats::default()
        };
        let json = stats.to_json().unwrap();
        for key in [
            "total_queries",
            "total_response_time",
            "ok_count",
            "ck_count",
            "timeouts",
            "inconsistent_results",
            "time_first_execution",
            "time_scan_query_pool",
            "scan_count",
            "update_average_time",
        ] {
            assert!(json.contains(key), "missing `{key}` in {json}");
        }
    }

    #[test]
    fn logical_eq_ignores_timing_fields() {
        let a = RunStats {
            total_queries: 5,
            time_first_execution: 123,
            ..RunStats::default()
        };
        let b = RunStats {
            total_queries: 5,
            time_first_execution: 999,
            update_average_time: 3.5,
            ..RunStats::default()
        };
        assert!(a.logical_eq(&b));
        assert_ne!(a, b);
    }
}
