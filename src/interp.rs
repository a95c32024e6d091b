//! Scalar resamplers over an irregular time axis, and the two
//! interpolation-based trajectory reconstructors built on them.
//!
//! Both evaluators clamp outside the knot span, so a reconstruction
//! covers the full high-rate timebase with constant extrapolation at
//! the ends.

use crate::types::PositionalFix;

/// Index of the knot interval containing `t`, i.e. the largest `i`
/// with `ts[i] <= t`, clamped to a valid segment start.
fn segment_index(ts: &[f64], t: f64) -> usize {
    match ts.binary_search_by(|probe| probe.partial_cmp(&t).expect("timestamps are finite")) {
        Ok(i) => i.min(ts.len() - 2),
        Err(0) => 0,
        Err(i) => (i - 1).min(ts.len() - 2),
    }
}

/// Piecewise-linear interpolation of `(ts, vs)` at `t`. Exact at the
/// knots, clamped beyond them.
pub fn interp_linear(ts: &[f64], vs: &[f64], t: f64) -> f64 {
    debug_assert_eq!(ts.len(), vs.len());
    if ts.is_empty() {
        return 0.0;
    }
    if ts.len() == 1 || t <= ts[0] {
        return vs[0];
    }
    if t >= ts[ts.len() - 1] {
        return vs[vs.len() - 1];
    }
    let i = segment_index(ts, t);
    let (t0, t1) = (ts[i], ts[i + 1]);
    let h = t1 - t0;
    if h <= 0.0 {
        return vs[i];
    }
    let s = (t - t0) / h;
    vs[i] + (vs[i + 1] - vs[i]) * s
}

/// Catmull-Rom interpolation over an irregular time axis, in cubic
/// Hermite form with finite-difference tangents scaled by the true
/// knot spacing. Boundary segments reuse the endpoint as its own
/// neighbour. Passes through every inner control point.
pub fn interp_catmull_rom(ts: &[f64], vs: &[f64], t: f64) -> f64 {
    debug_assert_eq!(ts.len(), vs.len());
    if ts.len() < 3 {
        return interp_linear(ts, vs, t);
    }
    if t <= ts[0] {
        return vs[0];
    }
    if t >= ts[ts.len() - 1] {
        return vs[vs.len() - 1];
    }

    let i = segment_index(ts, t);
    let (t1, t2) = (ts[i], ts[i + 1]);
    let h = t2 - t1;
    if h <= 0.0 {
        return vs[i];
    }

    let (p1, p2) = (vs[i], vs[i + 1]);
    let (t0, p0) = if i == 0 { (t1, p1) } else { (ts[i - 1], vs[i - 1]) };
    let (t3, p3) = if i + 2 >= ts.len() {
        (t2, p2)
    } else {
        (ts[i + 2], vs[i + 2])
    };

    // Catmull-Rom tangents as centred finite differences; degenerate
    // spans fall back to the one-sided slope.
    let m1 = if t2 - t0 > 0.0 {
        (p2 - p0) / (t2 - t0)
    } else {
        (p2 - p1) / h
    };
    let m2 = if t3 - t1 > 0.0 {
        (p3 - p1) / (t3 - t1)
    } else {
        (p2 - p1) / h
    };

    let s = (t - t1) / h;
    let s2 = s * s;
    let s3 = s2 * s;
    let h00 = 2.0 * s3 - 3.0 * s2 + 1.0;
    let h10 = s3 - 2.0 * s2 + s;
    let h01 = -2.0 * s3 + 3.0 * s2;
    let h11 = s3 - s2;

    h00 * p1 + h10 * h * m1 + h01 * p2 + h11 * h * m2
}

fn unpack(fixes: &[PositionalFix]) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let ts = fixes.iter().map(|f| f.timestamp).collect();
    let lats = fixes.iter().map(|f| f.lat).collect();
    let lons = fixes.iter().map(|f| f.lon).collect();
    (ts, lats, lons)
}

/// Linear reconstruction: evaluate the fix sequence at every timestamp
/// of `timebase`.
pub fn apply_linear(fixes: &[PositionalFix], timebase: &[f64]) -> Vec<PositionalFix> {
    if fixes.is_empty() {
        return Vec::new();
    }
    let (ts, lats, lons) = unpack(fixes);
    timebase
        .iter()
        .map(|&t| PositionalFix {
            timestamp: t,
            lat: interp_linear(&ts, &lats, t),
            lon: interp_linear(&ts, &lons, t),
        })
        .collect()
}

/// Catmull-Rom reconstruction at every timestamp of `timebase`.
pub fn apply_spline(fixes: &[PositionalFix], timebase: &[f64]) -> Vec<PositionalFix> {
    if fixes.is_empty() {
        return Vec::new();
    }
    let (ts, lats, lons) = unpack(fixes);
    timebase
        .iter()
        .map(|&t| PositionalFix {
            timestamp: t,
            lat: interp_catmull_rom(&ts, &lats, t),
            lon: interp_catmull_rom(&ts, &lons, t),
        })
        .collect()
}
