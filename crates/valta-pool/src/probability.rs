//! Probability of temporal correctness.

use std::f64::consts::SQRT_2;

use valta_types::{SensorSpec, ValidTime};

/// Probability that the version created at `creation` was still current at
/// `request`, under the sensor's `Normal(mean, stddev)` inter-arrival
/// distribution.
///
/// With Δ = request − creation (saturating at zero), this is
/// `1 − F(Δ)` for the normal CDF `F`: the probability that the interval
/// to the next version is at least Δ, i.e. that no newer version had yet
/// occurred by the requested time. Computed as
/// `erfc((Δ − mean) / (stddev·√2)) / 2`, which is numerically stable in
/// both tails.
///
/// A zero `stddev` degenerates to the step function at the mean.
#[must_use]
pub fn prob_temporal_correct(spec: SensorSpec, creation: ValidTime, request: ValidTime) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let delta = request.since(creation) as f64;
    let mean = f64::from(spec.mean());
    let stddev = f64::from(spec.stddev());
    if stddev == 0.0 {
        return if delta <= mean { 1.0 } else { 0.0 };
    }
    0.5 * libm::erfc((delta - mean) / (stddev * SQRT_2))
}
