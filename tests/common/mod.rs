//! Shared synthetic-track generators for the integration suites.
//!
//! The circular track has fully known kinematics, so every channel
//! (position, bearing, lateral G, yaw rate) can be produced in the
//! recorder's sign conventions and used as bit-exact ground truth.

#![allow(dead_code)]

use std::f64::consts::PI;

use lap_replay_rs::config::Config;
use lap_replay_rs::types::TelemetryPoint;

pub const K: f64 = 111_320.0;
pub const G: f64 = 9.81;
pub const LAT0: f64 = 44.35;
pub const LON0: f64 = 11.71;

/// Constant-speed clockwise circular lap. Lateral acceleration and
/// yaw rate are emitted inverted, the way the reference recorder
/// writes them.
pub fn circular_lap(lap: u32, hz: usize, duration_s: f64, speed: f64) -> Vec<TelemetryPoint> {
    let radius = speed * duration_s / (2.0 * PI);
    let omega = 2.0 * PI / duration_s;
    let k_lon = K * LAT0.to_radians().cos();
    (0..(duration_s * hz as f64) as usize)
        .map(|i| {
            let t = i as f64 / hz as f64;
            let theta = omega * t;
            TelemetryPoint {
                timestamp: t,
                lat: LAT0 + radius * (theta.cos() - 1.0) / K,
                lon: LON0 + radius * theta.sin() / k_lon,
                speed,
                bearing: (90.0 + theta.to_degrees()).rem_euclid(360.0),
                accuracy: 5.0,
                lap,
                lateral_acc: -(speed * omega) / G,
                longitudinal_acc: 0.0,
                yaw_rate: -omega.to_degrees(),
            }
        })
        .collect()
}

/// Straight eastward lap with all inertial channels at zero.
pub fn straight_lap(hz: usize, duration_s: f64, speed: f64) -> Vec<TelemetryPoint> {
    let k_lon = K * LAT0.to_radians().cos();
    (0..(duration_s * hz as f64) as usize)
        .map(|i| {
            let t = i as f64 / hz as f64;
            TelemetryPoint {
                timestamp: t,
                lat: LAT0,
                lon: LON0 + speed * t / k_lon,
                speed,
                bearing: 90.0,
                accuracy: 5.0,
                lap: 0,
                lateral_acc: 0.0,
                longitudinal_acc: 0.0,
                yaw_rate: 0.0,
            }
        })
        .collect()
}

/// Default config with the noisy path off and a fixed seed.
pub fn clean_config(seed: u64) -> Config {
    let mut cfg = Config::default();
    cfg.noise.enabled = false;
    cfg.noise.seed = Some(seed);
    cfg
}

/// Render samples into the tabular session format the reference
/// parser reads: 13 header lines, then 29 columns per row with the
/// telemetry fields in their documented positions.
pub fn session_record(samples: &[TelemetryPoint]) -> String {
    let mut out = String::new();
    out.push_str("Session export v2\n");
    out.push_str("Device: synthetic\n");
    for i in 2..13 {
        out.push_str(&format!("# header {i}\n"));
    }
    for p in samples {
        let mut cols = vec!["0".to_string(); 29];
        cols[0] = format!("{:.3}", p.timestamp);
        cols[2] = p.lap.to_string();
        cols[5] = format!("{:.1}", p.accuracy);
        cols[7] = format!("{:.3}", p.bearing);
        cols[11] = format!("{:.8}", p.lat);
        cols[12] = format!("{:.8}", p.lon);
        cols[14] = format!("{:.3}", p.speed);
        cols[17] = format!("{:.5}", p.lateral_acc);
        cols[19] = format!("{:.5}", p.longitudinal_acc);
        cols[28] = format!("{:.4}", p.yaw_rate);
        out.push_str(&cols.join(","));
        out.push('\n');
    }
    out
}
