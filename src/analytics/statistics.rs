//! Duration statistics shared by the per-grain views

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Duration percentiles over one grain
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Percentiles {
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

impl Percentiles {
    /// Percentiles of durations already sorted ascending
    pub fn from_sorted(sorted: &[f64]) -> Option<Self> {
        if sorted.is_empty() {
            return None;
        }

        Some(Self {
            p50: percentile(sorted, 50.0),
            p90: percentile(sorted, 90.0),
            p95: percentile(sorted, 95.0),
            p99: percentile(sorted, 99.0),
        })
    }
}

/// Summary of the terminal durations of one grain
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DurationStats {
    pub count: usize,
    pub min_ms: i64,
    pub max_ms: i64,
    pub avg_ms: f64,
    pub percentiles: Percentiles,
}

impl DurationStats {
    /// Compute stats from `(duration_ms, execution_id)` samples.
    ///
    /// Samples are ordered by duration and then by execution id, so equal
    /// durations always land in the same order and the result is
    /// bit-identical across passes.
    pub fn from_samples(mut samples: Vec<(i64, Uuid)>) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }

        samples.sort_unstable();
        let sorted: Vec<f64> = samples.iter().map(|(d, _)| *d as f64).collect();
        let total: i128 = samples.iter().map(|(d, _)| *d as i128).sum();

        Some(Self {
            count: samples.len(),
            min_ms: samples[0].0,
            max_ms: samples[samples.len() - 1].0,
            avg_ms: mean(total, samples.len()),
            percentiles: Percentiles::from_sorted(&sorted)?,
        })
    }
}

/// `p`-th percentile of ascending data, interpolating linearly between the
/// two closest ranks
pub fn percentile(sorted_data: &[f64], p: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let index = (p / 100.0) * (sorted_data.len() - 1) as f64;
    let lower = index.floor() as usize;
    let upper = index.ceil() as usize;

    if lower == upper {
        sorted_data[lower]
    } else {
        let weight = index - lower as f64;
        sorted_data[lower] * (1.0 - weight) + sorted_data[upper] * weight
    }
}

/// `successes / terminal`, undefined when nothing finished
pub fn success_rate(successes: usize, terminal: usize) -> Option<f64> {
    if terminal == 0 {
        None
    } else {
        Some(successes as f64 / terminal as f64)
    }
}

/// Mean of an exact integer sum
pub fn mean(total: i128, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        total as f64 / count as f64
    }
}
