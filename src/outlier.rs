//! Physics-based rejection of implausible positional fixes.
//!
//! A fix is judged against the previously accepted fix using four
//! criteria (implied acceleration, GPS-vs-inertial yaw rate, implied
//! vs reported speed, expected vs measured lateral G), plus a
//! triangle-window test that flags single-point excursions. Inertial
//! and speed/bearing context comes from the enriched stream through
//! each fix's `original_index`, so noisy lat/lon never pollutes the
//! reference channels.

use nalgebra::Vector2;

use crate::config::{OutlierConfig, OutlierMethod};
use crate::geo::{bearing_diff_deg, gps_to_local, haversine};
use crate::types::{AnomalyScores, DownsampledFix, EnrichedPoint, OutlierVerdict};

/// Survivors and rejects of one filtering pass, input order preserved.
#[derive(Clone, Debug, Default)]
pub struct OutlierPartition {
    pub kept: Vec<DownsampledFix>,
    pub rejected: Vec<(DownsampledFix, OutlierVerdict)>,
}

/// Reported speed below which the lateral-G criterion stays silent.
const LAT_ACC_MIN_SPEED: f64 = 2.0;

/// Floor for the triangle base distance (m), so straight-through
/// passes with a tiny base do not divide by zero.
const TRIANGLE_BASE_FLOOR: f64 = 0.1;

/// Partition `fixes` into kept and rejected. The first fix is always
/// kept; with fewer than two fixes there is nothing to judge.
pub fn filter_fixes(
    fixes: &[DownsampledFix],
    stream: &[EnrichedPoint],
    cfg: &OutlierConfig,
    g: f64,
    meters_per_deg_lat: f64,
) -> OutlierPartition {
    let mut out = OutlierPartition::default();
    if fixes.is_empty() {
        return out;
    }
    if !cfg.enabled {
        out.kept = fixes.to_vec();
        return out;
    }

    let triangle = if cfg.use_temporal_check && cfg.method == OutlierMethod::Physics {
        triangle_flags(fixes, cfg, meters_per_deg_lat)
    } else {
        vec![false; fixes.len()]
    };

    out.kept.push(fixes[0]);
    // Implied speed at the previously accepted fix; seeded from its
    // reported speed before any pair has been formed.
    let mut v_prev = stream
        .get(fixes[0].original_index)
        .map(|p| p.point.speed)
        .unwrap_or(0.0);
    let mut prev = fixes[0];

    for (i, fix) in fixes.iter().enumerate().skip(1) {
        let verdict = match cfg.method {
            OutlierMethod::Simple => judge_simple(&prev, fix, cfg),
            OutlierMethod::Physics => {
                judge_physics(&prev, fix, v_prev, stream, triangle[i], cfg, g)
            }
        };
        match verdict {
            OutlierVerdict::Kept => {
                let dt = fix.timestamp - prev.timestamp;
                if dt > 0.0 {
                    v_prev = haversine(prev.lat, prev.lon, fix.lat, fix.lon) / dt;
                }
                prev = *fix;
                out.kept.push(*fix);
            }
            rejected => out.rejected.push((*fix, rejected)),
        }
    }

    if !out.rejected.is_empty() {
        log::debug!(
            "outlier filter rejected {}/{} fixes",
            out.rejected.len(),
            fixes.len()
        );
    }
    out
}

fn judge_simple(prev: &DownsampledFix, fix: &DownsampledFix, cfg: &OutlierConfig) -> OutlierVerdict {
    let dt = fix.timestamp - prev.timestamp;
    if dt <= 0.0 {
        return OutlierVerdict::Kept;
    }
    let jump = haversine(prev.lat, prev.lon, fix.lat, fix.lon);
    let implied_speed = jump / dt;
    if implied_speed > cfg.simple_max_speed {
        return OutlierVerdict::Rejected {
            reason: format!("implied speed {implied_speed:.1} m/s"),
            scores: AnomalyScores::default(),
            total_score: implied_speed / cfg.simple_max_speed,
        };
    }
    if jump > cfg.simple_max_jump {
        return OutlierVerdict::Rejected {
            reason: format!("jump {jump:.1} m"),
            scores: AnomalyScores::default(),
            total_score: jump / cfg.simple_max_jump,
        };
    }
    OutlierVerdict::Kept
}

#[allow(clippy::too_many_arguments)]
fn judge_physics(
    prev: &DownsampledFix,
    fix: &DownsampledFix,
    v_prev: f64,
    stream: &[EnrichedPoint],
    triangle_positive: bool,
    cfg: &OutlierConfig,
    g: f64,
) -> OutlierVerdict {
    let dt = fix.timestamp - prev.timestamp;
    if dt <= 0.0 {
        return OutlierVerdict::Kept;
    }

    let sample = stream.get(fix.original_index).map(|p| &p.point);
    let prev_sample = stream.get(prev.original_index).map(|p| &p.point);

    let implied_speed = haversine(prev.lat, prev.lon, fix.lat, fix.lon) / dt;
    let mut scores = AnomalyScores::default();

    // Implied acceleration against the hard physical ceiling
    let a_max = cfg.max_accel_g * g;
    let implied_accel = (implied_speed - v_prev).abs() / dt;
    if implied_accel > a_max {
        scores.accel = (implied_accel - a_max) / a_max;
    }

    // GPS-derived yaw rate against the averaged inertial yaw rate
    if let (Some(s), Some(ps)) = (sample, prev_sample) {
        let gps_yaw_rate = bearing_diff_deg(ps.bearing, s.bearing) / dt;
        let imu_yaw_rate = 0.5 * (ps.yaw_rate + s.yaw_rate);
        let diff = (gps_yaw_rate - imu_yaw_rate).abs();
        if diff > cfg.max_yaw_rate_diff {
            scores.yaw = (diff - cfg.max_yaw_rate_diff) / cfg.max_yaw_rate_diff;
        }
    }

    // Implied speed against the receiver's reported speed
    if let Some(s) = sample {
        let diff = (implied_speed - s.speed).abs();
        if diff > cfg.max_speed_diff {
            scores.speed = (diff - cfg.max_speed_diff) / cfg.max_speed_diff;
        }

        // Turn-rate consistency: |omega| * v should match the
        // measured lateral acceleration when actually moving
        if s.speed > LAT_ACC_MIN_SPEED {
            let expected_g = (s.yaw_rate.to_radians().abs() * s.speed) / g;
            let diff = (expected_g - s.lateral_acc.abs()).abs();
            if diff > cfg.max_lat_acc_diff {
                scores.lat_acc = (diff - cfg.max_lat_acc_diff) / cfg.max_lat_acc_diff;
            }
        }
    }

    let total = scores.total();
    let over_threshold = total > cfg.anomaly_threshold;
    let triangle_reject = triangle_positive && total > cfg.anomaly_threshold / 2.0;

    if over_threshold || triangle_reject {
        let reason = if over_threshold {
            dominant_criterion(&scores).to_string()
        } else {
            "triangle window".to_string()
        };
        OutlierVerdict::Rejected {
            reason,
            scores,
            total_score: total,
        }
    } else {
        OutlierVerdict::Kept
    }
}

fn dominant_criterion(scores: &AnomalyScores) -> &'static str {
    let weighted = [
        (2.0 * scores.accel, "implied acceleration"),
        (1.5 * scores.yaw, "yaw rate mismatch"),
        (1.0 * scores.speed, "speed mismatch"),
        (1.0 * scores.lat_acc, "lateral acceleration mismatch"),
    ];
    weighted
        .iter()
        .cloned()
        .fold((0.0, "anomaly score"), |best, c| if c.0 > best.0 { c } else { best })
        .1
}

/// Single-point excursion test: fix `i` is suspicious when the detour
/// through it is much longer than the direct hop `i-1 -> i+1` and it
/// sits well off that segment. Evaluated on the raw input order.
fn triangle_flags(
    fixes: &[DownsampledFix],
    cfg: &OutlierConfig,
    meters_per_deg_lat: f64,
) -> Vec<bool> {
    let mut flags = vec![false; fixes.len()];
    if fixes.len() < 3 {
        return flags;
    }
    for i in 1..fixes.len() - 1 {
        let (a, b, c) = (&fixes[i - 1], &fixes[i], &fixes[i + 1]);
        let d_ab = haversine(a.lat, a.lon, b.lat, b.lon);
        let d_bc = haversine(b.lat, b.lon, c.lat, c.lon);
        let d_ac = haversine(a.lat, a.lon, c.lat, c.lon);
        let ratio = (d_ab + d_bc) / d_ac.max(TRIANGLE_BASE_FLOOR);
        if ratio <= cfg.triangle_ratio {
            continue;
        }
        let perp = perpendicular_distance(a, b, c, meters_per_deg_lat);
        if perp > cfg.min_perp_distance {
            flags[i] = true;
        }
    }
    flags
}

/// Perpendicular distance from `b` to the segment `[a, c]`, in local
/// tangent-plane metres around `a`.
fn perpendicular_distance(
    a: &DownsampledFix,
    b: &DownsampledFix,
    c: &DownsampledFix,
    meters_per_deg_lat: f64,
) -> f64 {
    let (pe, pn) = gps_to_local(b.lat, b.lon, a.lat, a.lon, meters_per_deg_lat);
    let (se, sn) = gps_to_local(c.lat, c.lon, a.lat, a.lon, meters_per_deg_lat);
    let p = Vector2::new(pe, pn);
    let seg = Vector2::new(se, sn);
    let len_sq = seg.norm_squared();
    if len_sq < 1e-9 {
        return p.norm();
    }
    let t = (p.dot(&seg) / len_sq).clamp(0.0, 1.0);
    (p - seg * t).norm()
}
