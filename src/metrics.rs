//! Positional error statistics of a reconstruction against ground
//! truth.
//!
//! Matching is by timestamp rounded to three decimal places in string
//! form. The quantisation is part of the contract: two implementations
//! that round the same way score bit-identically.

use std::collections::HashMap;

use crate::geo::haversine;
use crate::types::{AccuracyMetrics, EnrichedPoint, PositionalFix};

/// Shared timestamp key: three decimals, string form.
pub fn timestamp_key(t: f64) -> String {
    format!("{t:.3}")
}

/// Compare an estimate against enriched ground truth. Ground-truth
/// points without a matching estimate timestamp are ignored; when
/// nothing matches, every statistic reports +inf with count 0.
pub fn compute_accuracy(ground_truth: &[EnrichedPoint], estimate: &[PositionalFix]) -> AccuracyMetrics {
    let by_time: HashMap<String, &PositionalFix> = estimate
        .iter()
        .map(|fix| (timestamp_key(fix.timestamp), fix))
        .collect();

    let mut sum_sq = 0.0;
    let mut sum_abs = 0.0;
    let mut max_error = 0.0f64;
    let mut count = 0usize;

    for truth in ground_truth {
        let Some(est) = by_time.get(&timestamp_key(truth.timestamp())) else {
            continue;
        };
        let err = haversine(truth.point.lat, truth.point.lon, est.lat, est.lon);
        sum_sq += err * err;
        sum_abs += err;
        max_error = max_error.max(err);
        count += 1;
    }

    if count == 0 {
        return AccuracyMetrics::empty();
    }
    AccuracyMetrics {
        rmse: (sum_sq / count as f64).sqrt(),
        mae: sum_abs / count as f64,
        max_error,
        count,
    }
}
