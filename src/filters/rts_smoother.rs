//! One-dimensional constant-velocity Kalman filter with a
//! Rauch-Tung-Striebel backward pass, applied independently to the
//! latitude and longitude axes.
//!
//! The forward pass runs over the full high-rate timebase with a
//! measurement only at the samples a downsampled fix survived to;
//! every other step is pure prediction. That is what turns a sparse
//! fix sequence into a dense reconstruction. Measurement and process
//! variances are configured in metres and converted to degrees at the
//! lap's reference latitude, since the axes here are raw lat/lon.

use ndarray::{arr2, Array2};

use crate::config::KalmanConfig;
use crate::linalg::{det_2x2, invert_2x2, SINGULAR_EPS};
use crate::types::{DownsampledFix, EnrichedPoint, PositionalFix};

struct ForwardStep {
    x_pred: [f64; 2],
    p_pred: Array2<f64>,
    x_corr: [f64; 2],
    p_corr: Array2<f64>,
}

fn transition(dt: f64) -> Array2<f64> {
    arr2(&[[1.0, dt], [0.0, 1.0]])
}

fn process_noise(dt: f64, q: f64) -> Array2<f64> {
    let dt2 = dt * dt;
    let dt3 = dt2 * dt;
    let dt4 = dt3 * dt;
    arr2(&[
        [dt4 / 4.0 * q, dt3 / 2.0 * q],
        [dt3 / 2.0 * q, dt2 * q],
    ])
}

/// Forward-filter then RTS-smooth one axis.
///
/// `times` is the high-rate timebase, `measurements` the sparse axis
/// values aligned to it (`None` between fixes). The caller guarantees
/// `measurements[0]` is present. Returns the smoothed positions.
pub fn smooth_axis(times: &[f64], measurements: &[Option<f64>], q: f64, r: f64, initial_p: f64) -> Vec<f64> {
    debug_assert_eq!(times.len(), measurements.len());
    let n = times.len();
    if n == 0 {
        return Vec::new();
    }

    let z0 = measurements[0].unwrap_or(0.0);
    let mut x = [z0, 0.0];
    let mut p = arr2(&[[initial_p, 0.0], [0.0, initial_p]]);

    let mut forward: Vec<ForwardStep> = Vec::with_capacity(n);
    forward.push(ForwardStep {
        x_pred: x,
        p_pred: p.clone(),
        x_corr: x,
        p_corr: p.clone(),
    });

    for i in 1..n {
        let dt = times[i] - times[i - 1];
        if dt > 0.0 {
            let f = transition(dt);
            x = [x[0] + dt * x[1], x[1]];
            p = f.dot(&p).dot(&f.t()) + process_noise(dt, q);
        }
        let x_pred = x;
        let p_pred = p.clone();

        if let Some(z) = measurements[i] {
            // Scalar update with H = [1, 0]
            let s = p[[0, 0]] + r;
            if s.abs() > SINGULAR_EPS {
                let k = [p[[0, 0]] / s, p[[1, 0]] / s];
                let innovation = z - x[0];
                x[0] += k[0] * innovation;
                x[1] += k[1] * innovation;
                let p00 = p[[0, 0]];
                let p01 = p[[0, 1]];
                p[[0, 0]] = (1.0 - k[0]) * p00;
                p[[0, 1]] = (1.0 - k[0]) * p01;
                p[[1, 0]] -= k[1] * p00;
                p[[1, 1]] -= k[1] * p01;
            }
        }

        forward.push(ForwardStep {
            x_pred,
            p_pred,
            x_corr: x,
            p_corr: p.clone(),
        });
    }

    // Backward pass: x_s[i] = x+[i] + C (x_s[i+1] - x-[i+1]) with
    // C = P+[i] F(dt)^T (P-[i+1])^-1. A near-singular predicted
    // covariance falls back to the forward estimate for that step.
    let mut smoothed = vec![[0.0, 0.0]; n];
    smoothed[n - 1] = forward[n - 1].x_corr;
    for i in (0..n - 1).rev() {
        let next = &forward[i + 1];
        let cur = &forward[i];
        if det_2x2(&next.p_pred).abs() < SINGULAR_EPS {
            log::warn!("rts: singular predicted covariance at step {i}, keeping forward state");
            smoothed[i] = cur.x_corr;
            continue;
        }
        let dt = times[i + 1] - times[i];
        let f = transition(dt);
        let c = cur.p_corr.dot(&f.t()).dot(&invert_2x2(&next.p_pred));
        let dx = [
            smoothed[i + 1][0] - next.x_pred[0],
            smoothed[i + 1][1] - next.x_pred[1],
        ];
        smoothed[i] = [
            cur.x_corr[0] + c[[0, 0]] * dx[0] + c[[0, 1]] * dx[1],
            cur.x_corr[1] + c[[1, 0]] * dx[0] + c[[1, 1]] * dx[1],
        ];
    }

    smoothed.iter().map(|s| s[0]).collect()
}

/// Full RTS reconstruction of a lap from its surviving fixes.
///
/// Runs the per-axis smoother on raw latitude and longitude from the
/// first fix's sample onward and recombines the axes directly.
pub fn apply_kalman_rts(
    fixes: &[DownsampledFix],
    stream: &[EnrichedPoint],
    cfg: &KalmanConfig,
    meters_per_deg_lat: f64,
) -> Vec<PositionalFix> {
    if fixes.is_empty() || stream.is_empty() {
        return Vec::new();
    }

    let start = fixes[0].original_index.min(stream.len() - 1);
    let times: Vec<f64> = stream[start..].iter().map(|p| p.timestamp()).collect();

    let mut lat_meas: Vec<Option<f64>> = vec![None; times.len()];
    let mut lon_meas: Vec<Option<f64>> = vec![None; times.len()];
    for fix in fixes {
        if fix.original_index >= start && fix.original_index - start < times.len() {
            lat_meas[fix.original_index - start] = Some(fix.lat);
            lon_meas[fix.original_index - start] = Some(fix.lon);
        }
    }

    // Metre-configured variances applied to degree-valued axes
    let ref_lat = fixes[0].lat;
    let lat_scale = meters_per_deg_lat;
    let lon_scale = meters_per_deg_lat * ref_lat.to_radians().cos();
    let (r_lat, q_lat) = (cfg.r / (lat_scale * lat_scale), cfg.q / (lat_scale * lat_scale));
    let (r_lon, q_lon) = (cfg.r / (lon_scale * lon_scale), cfg.q / (lon_scale * lon_scale));

    let lats = smooth_axis(&times, &lat_meas, q_lat, r_lat, cfg.initial_p);
    let lons = smooth_axis(&times, &lon_meas, q_lon, r_lon, cfg.initial_p);

    times
        .iter()
        .zip(lats.iter().zip(lons.iter()))
        .map(|(&t, (&lat, &lon))| PositionalFix { timestamp: t, lat, lon })
        .collect()
}
