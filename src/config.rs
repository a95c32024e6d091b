//! Pipeline configuration as an explicit value.
//!
//! Every stage receives the configuration by reference; the EKF
//! parameter sweep clones it per trial. Nothing in the crate reads
//! process-wide mutable state, so laps can be processed concurrently
//! with independent copies.

use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sampling: SamplingConfig,
    pub noise: NoiseConfig,
    pub kalman: KalmanConfig,
    pub ekf: EkfConfig,
    pub outlier: OutlierConfig,
    /// Standard gravity (m/s^2)
    #[serde(alias = "G")]
    pub g: f64,
    /// Flat-earth metres per degree of latitude
    pub meters_per_deg_lat: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sampling: SamplingConfig::default(),
            noise: NoiseConfig::default(),
            kalman: KalmanConfig::default(),
            ekf: EkfConfig::default(),
            outlier: OutlierConfig::default(),
            g: 9.81,
            meters_per_deg_lat: 111_320.0,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// High-rate output cadence (inertial stream)
    pub imu_hz: f64,
    /// Positional fix cadence after downsampling
    pub gps_hz: f64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self { imu_hz: 25.0, gps_hz: 1.0 }
    }
}

impl SamplingConfig {
    /// Downsampling stride, at least 1.
    pub fn stride(&self) -> usize {
        ((self.imu_hz / self.gps_hz).round() as usize).max(1)
    }
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct NoiseConfig {
    /// Gate for the noisy-path simulation
    pub enabled: bool,
    /// Half-width bounds of the uniform pre-average; the injected
    /// stddev is their mean
    pub min_meters: f64,
    pub max_meters: f64,
    /// RNG seed for reproducible runs; None draws from entropy
    pub seed: Option<u64>,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_meters: 1.0,
            max_meters: 3.0,
            seed: None,
        }
    }
}

impl NoiseConfig {
    pub fn stddev_meters(&self) -> f64 {
        0.5 * (self.min_meters + self.max_meters)
    }
}

/// Per-axis constant-velocity smoother tuning (metres; converted to
/// degrees at the lap reference latitude before use).
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct KalmanConfig {
    /// Measurement variance (m^2)
    #[serde(alias = "R")]
    pub r: f64,
    /// Continuous process noise intensity (m^2/s^3)
    #[serde(alias = "Q")]
    pub q: f64,
    /// Initial diagonal covariance per axis
    #[serde(alias = "initial_P")]
    pub initial_p: f64,
}

impl Default for KalmanConfig {
    fn default() -> Self {
        Self { r: 0.01, q: 1.0, initial_p: 100.0 }
    }
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct EkfConfig {
    /// Accelerometer noise (m/s^2)
    pub sigma_accel: f64,
    /// Gyro noise (rad/s)
    pub sigma_gyro: f64,
    /// Bias random-walk intensity
    pub sigma_bias: f64,
    /// Default fix stddev when the fix carries no accuracy (m)
    pub gps_pos_noise: f64,
    /// Minimum reported speed for a trustworthy initial heading (m/s)
    pub min_speed_for_heading: f64,
}

impl Default for EkfConfig {
    fn default() -> Self {
        Self {
            sigma_accel: 0.5,
            sigma_gyro: 0.02,
            sigma_bias: 0.001,
            gps_pos_noise: 5.0,
            min_speed_for_heading: 2.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutlierMethod {
    Physics,
    Simple,
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct OutlierConfig {
    pub enabled: bool,
    pub method: OutlierMethod,
    /// Implied-acceleration threshold (G)
    pub max_accel_g: f64,
    /// GPS-vs-inertial yaw rate threshold (deg/s)
    pub max_yaw_rate_diff: f64,
    /// Implied-vs-reported speed threshold (m/s)
    pub max_speed_diff: f64,
    /// Expected-vs-measured lateral acceleration threshold (G)
    pub max_lat_acc_diff: f64,
    /// Weighted score above which a fix is rejected
    pub anomaly_threshold: f64,
    /// Gate for the triangle-window test
    pub use_temporal_check: bool,
    /// Triangle test: minimum perpendicular offset (m)
    pub min_perp_distance: f64,
    /// Triangle test: detour ratio threshold
    pub triangle_ratio: f64,
    /// Simple mode: maximum implied speed (m/s)
    pub simple_max_speed: f64,
    /// Simple mode: maximum jump distance (m)
    pub simple_max_jump: f64,
}

impl Default for OutlierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            method: OutlierMethod::Physics,
            max_accel_g: 2.0,
            max_yaw_rate_diff: 45.0,
            max_speed_diff: 15.0,
            max_lat_acc_diff: 0.8,
            anomaly_threshold: 4.0,
            use_temporal_check: true,
            min_perp_distance: 15.0,
            triangle_ratio: 2.5,
            simple_max_speed: 100.0,
            simple_max_jump: 200.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_table() {
        let cfg = Config::default();
        assert_eq!(cfg.sampling.imu_hz, 25.0);
        assert_eq!(cfg.sampling.gps_hz, 1.0);
        assert_eq!(cfg.sampling.stride(), 25);
        assert!(cfg.noise.enabled);
        assert_eq!(cfg.noise.stddev_meters(), 2.0);
        assert_eq!(cfg.kalman.r, 0.01);
        assert_eq!(cfg.kalman.q, 1.0);
        assert_eq!(cfg.kalman.initial_p, 100.0);
        assert_eq!(cfg.ekf.sigma_accel, 0.5);
        assert_eq!(cfg.ekf.gps_pos_noise, 5.0);
        assert_eq!(cfg.outlier.method, OutlierMethod::Physics);
        assert_eq!(cfg.outlier.anomaly_threshold, 4.0);
        assert_eq!(cfg.g, 9.81);
        assert_eq!(cfg.meters_per_deg_lat, 111_320.0);
    }

    #[test]
    fn test_partial_json_overlays_defaults() {
        let cfg: Config = serde_json::from_str(
            r#"{
                "noise": { "enabled": false, "min_meters": 3.0, "max_meters": 8.0 },
                "outlier": { "method": "simple" }
            }"#,
        )
        .unwrap();
        assert!(!cfg.noise.enabled);
        assert_eq!(cfg.noise.stddev_meters(), 5.5);
        assert_eq!(cfg.outlier.method, OutlierMethod::Simple);
        // Untouched sections keep their defaults
        assert_eq!(cfg.kalman.q, 1.0);
        assert_eq!(cfg.sampling.stride(), 25);
    }

    #[test]
    fn test_documented_key_spellings_accepted() {
        let cfg: Config = serde_json::from_str(
            r#"{
                "kalman": { "R": 0.05, "Q": 2.0, "initial_P": 50.0 },
                "G": 9.80665
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.kalman.r, 0.05);
        assert_eq!(cfg.kalman.q, 2.0);
        assert_eq!(cfg.kalman.initial_p, 50.0);
        assert_eq!(cfg.g, 9.80665);
    }
}
