//! Seven-state Extended Kalman Filter fusing positional fixes with
//! body-frame inertial measurements.
//!
//! State vector (7D):
//! [0-1]: Position (east, north) in local frame relative to the
//!        reference fix (meters)
//! [2-3]: Velocity (east, north) in world frame (m/s)
//! [4]:   Heading psi, radians clockwise from north, kept in (-pi, pi]
//! [5-6]: Accelerometer bias (lateral, longitudinal) in body frame
//!        (m/s^2), modelled as a random walk
//!
//! The input adapter owns the recorder's sign conventions: lateral
//! acceleration and yaw rate arrive inverted, so
//! `a_lat = -lateral_acc * g - b_ax`, `a_lon = longitudinal_acc * g - b_ay`
//! and `omega_z = -yaw_rate * pi / 180`. These negations are part of
//! the filter's contract with the record format.

use ndarray::{arr1, arr2, Array1, Array2};

use crate::config::EkfConfig;
use crate::geo::{gps_to_local, local_to_gps, normalize_angle};
use crate::linalg::{det_2x2, invert_2x2, symmetrize};
use crate::types::{DownsampledFix, EnrichedPoint, PositionalFix};

const N: usize = 7;

pub struct Ekf7d {
    state: Array1<f64>,
    covariance: Array2<f64>,
    cfg: EkfConfig,
    g: f64,
    meters_per_deg_lat: f64,
    /// Reference point of the local frame (lat, lon)
    origin: (f64, f64),
    /// Position updates skipped because the innovation covariance
    /// went singular
    skipped_updates: u64,
}

impl Ekf7d {
    /// Initialise from the first fix whose reported speed clears the
    /// heading-validity threshold. The fix becomes the local-frame
    /// origin; its bearing seeds the heading and velocity split.
    pub fn init(
        lat: f64,
        lon: f64,
        speed: f64,
        bearing_deg: f64,
        cfg: &EkfConfig,
        g: f64,
        meters_per_deg_lat: f64,
    ) -> Self {
        let psi = normalize_angle(bearing_deg.to_radians());
        let state = arr1(&[
            0.0,
            0.0,
            speed * psi.sin(),
            speed * psi.cos(),
            psi,
            0.0,
            0.0,
        ]);
        Self {
            state,
            covariance: Self::initial_covariance(),
            cfg: *cfg,
            g,
            meters_per_deg_lat,
            origin: (lat, lon),
            skipped_updates: 0,
        }
    }

    fn initial_covariance() -> Array2<f64> {
        let mut p = Array2::<f64>::zeros((N, N));
        let diag = [10.0, 10.0, 1.0, 1.0, 0.1, 0.1, 0.1];
        for (i, v) in diag.iter().enumerate() {
            p[[i, i]] = *v;
        }
        p
    }

    fn process_noise(&self, dt: f64) -> Array2<f64> {
        let sa2 = self.cfg.sigma_accel * self.cfg.sigma_accel;
        let sg2 = self.cfg.sigma_gyro * self.cfg.sigma_gyro;
        let sb2 = self.cfg.sigma_bias * self.cfg.sigma_bias;
        let q_pos = sa2 * dt.powi(4) / 4.0;
        let q_vel = sa2 * dt * dt;
        let q_psi = sg2 * dt * dt;
        let q_bias = sb2 * dt;
        let mut q = Array2::<f64>::zeros((N, N));
        for (i, v) in [q_pos, q_pos, q_vel, q_vel, q_psi, q_bias, q_bias]
            .iter()
            .enumerate()
        {
            q[[i, i]] = *v;
        }
        q
    }

    /// Propagate one IMU sample. Inputs are in the recorder's
    /// convention (G units, deg/s); `dt <= 0` is a no-op.
    pub fn predict(&mut self, lateral_acc_g: f64, longitudinal_acc_g: f64, yaw_rate_degs: f64, dt: f64) {
        if dt <= 0.0 {
            return;
        }

        let psi = self.state[4];
        let (sin_psi, cos_psi) = psi.sin_cos();

        // Bias-corrected body-frame inputs, signs flipped per contract
        let a_lat = -lateral_acc_g * self.g - self.state[5];
        let a_lon = longitudinal_acc_g * self.g - self.state[6];
        let omega_z = -yaw_rate_degs.to_radians();

        // World frame: heading clockwise from north, east = +x
        let ax_w = a_lat * cos_psi + a_lon * sin_psi;
        let ay_w = -a_lat * sin_psi + a_lon * cos_psi;

        let dt2 = dt * dt;
        self.state[0] += self.state[2] * dt + 0.5 * ax_w * dt2;
        self.state[1] += self.state[3] * dt + 0.5 * ay_w * dt2;
        self.state[2] += ax_w * dt;
        self.state[3] += ay_w * dt;
        self.state[4] = normalize_angle(psi + omega_z * dt);

        // Jacobian of the transition around the current state. The
        // acceleration partials are closed form:
        //   d(ax_w)/d(psi) = ay_w        d(ay_w)/d(psi) = -ax_w
        //   d(ax_w)/d(bax) = -cos(psi)   d(ax_w)/d(bay) = -sin(psi)
        //   d(ay_w)/d(bax) =  sin(psi)   d(ay_w)/d(bay) = -cos(psi)
        let half_dt2 = 0.5 * dt2;
        let f = arr2(&[
            [1.0, 0.0, dt, 0.0, half_dt2 * ay_w, -half_dt2 * cos_psi, -half_dt2 * sin_psi],
            [0.0, 1.0, 0.0, dt, -half_dt2 * ax_w, half_dt2 * sin_psi, -half_dt2 * cos_psi],
            [0.0, 0.0, 1.0, 0.0, dt * ay_w, -dt * cos_psi, -dt * sin_psi],
            [0.0, 0.0, 0.0, 1.0, -dt * ax_w, dt * sin_psi, -dt * cos_psi],
            [0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0],
        ]);

        self.covariance = f.dot(&self.covariance).dot(&f.t()) + self.process_noise(dt);
        symmetrize(&mut self.covariance);
    }

    /// Fold in a positional fix. `accuracy <= 0` falls back to the
    /// configured default fix noise. A singular innovation covariance
    /// skips the update instead of aborting the lap.
    pub fn update(&mut self, lat: f64, lon: f64, accuracy: f64) {
        let (zx, zy) = gps_to_local(lat, lon, self.origin.0, self.origin.1, self.meters_per_deg_lat);

        let r_std = if accuracy > 0.0 { accuracy } else { self.cfg.gps_pos_noise };
        let r = r_std * r_std;

        // H selects (px, py); S = H P H^T + R stays 2x2
        let p = &self.covariance;
        let s = arr2(&[
            [p[[0, 0]] + r, p[[0, 1]]],
            [p[[1, 0]], p[[1, 1]] + r],
        ]);
        if det_2x2(&s).abs() < crate::linalg::SINGULAR_EPS {
            self.skipped_updates += 1;
            log::warn!("ekf: singular innovation covariance, skipping position update");
            return;
        }
        let s_inv = invert_2x2(&s);

        // K = P H^T S^-1, built from the first two covariance columns
        let mut k = Array2::<f64>::zeros((N, 2));
        for row in 0..N {
            for col in 0..2 {
                k[[row, col]] = p[[row, 0]] * s_inv[[0, col]] + p[[row, 1]] * s_inv[[1, col]];
            }
        }

        let innovation = [zx - self.state[0], zy - self.state[1]];
        for row in 0..N {
            self.state[row] += k[[row, 0]] * innovation[0] + k[[row, 1]] * innovation[1];
        }
        self.state[4] = normalize_angle(self.state[4]);

        // P = (I - K H) P
        let mut i_kh = Array2::<f64>::eye(N);
        for row in 0..N {
            i_kh[[row, 0]] -= k[[row, 0]];
            i_kh[[row, 1]] -= k[[row, 1]];
        }
        self.covariance = i_kh.dot(&self.covariance);
        symmetrize(&mut self.covariance);
    }

    /// Current position mapped back to WGS-84.
    pub fn position_fix(&self, timestamp: f64) -> PositionalFix {
        let (lat, lon) = local_to_gps(
            self.state[0],
            self.state[1],
            self.origin.0,
            self.origin.1,
            self.meters_per_deg_lat,
        );
        PositionalFix { timestamp, lat, lon }
    }

    pub fn heading(&self) -> f64 {
        self.state[4]
    }

    pub fn biases(&self) -> (f64, f64) {
        (self.state[5], self.state[6])
    }

    pub fn skipped_updates(&self) -> u64 {
        self.skipped_updates
    }

    #[cfg(test)]
    pub(crate) fn covariance(&self) -> &Array2<f64> {
        &self.covariance
    }
}

/// Run the EKF over one lap: initialise at the first fix that clears
/// the heading-speed threshold, then emit exactly one positional fix
/// per IMU sample from that index onward, folding in each downsampled
/// fix as its timestamp comes due.
pub fn apply_ekf(
    fixes: &[DownsampledFix],
    stream: &[EnrichedPoint],
    cfg: &EkfConfig,
    g: f64,
    meters_per_deg_lat: f64,
) -> Vec<PositionalFix> {
    let init_fix_idx = fixes.iter().position(|f| {
        stream
            .get(f.original_index)
            .map(|p| p.point.speed > cfg.min_speed_for_heading)
            .unwrap_or(false)
    });
    let Some(init_fix_idx) = init_fix_idx else {
        log::warn!("ekf: no fix above heading speed threshold, skipping lap");
        return Vec::new();
    };

    let init_fix = &fixes[init_fix_idx];
    let start = init_fix.original_index;
    if start >= stream.len() {
        return Vec::new();
    }
    let init_sample = &stream[start].point;

    let mut ekf = Ekf7d::init(
        init_fix.lat,
        init_fix.lon,
        init_sample.speed,
        init_sample.bearing,
        cfg,
        g,
        meters_per_deg_lat,
    );

    let mut output = Vec::with_capacity(stream.len() - start);
    output.push(ekf.position_fix(stream[start].timestamp()));

    let mut cursor = init_fix_idx + 1;
    for i in start + 1..stream.len() {
        let sample = &stream[i].point;
        let dt = sample.timestamp - stream[i - 1].timestamp();
        ekf.predict(
            sample.lateral_acc,
            sample.longitudinal_acc,
            sample.yaw_rate,
            dt,
        );

        if cursor < fixes.len() && sample.timestamp >= fixes[cursor].timestamp {
            let fix = &fixes[cursor];
            let accuracy = stream
                .get(fix.original_index)
                .map(|p| p.point.accuracy)
                .unwrap_or(0.0);
            ekf.update(fix.lat, fix.lon, accuracy);
            cursor += 1;
        }

        output.push(ekf.position_fix(sample.timestamp));
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EkfConfig;
    use crate::enrich::enrich_lap;
    use crate::geo::haversine;
    use crate::types::TelemetryPoint;
    use std::f64::consts::PI;

    const K: f64 = 111_320.0;
    const G: f64 = 9.81;
    const LAT0_T: f64 = 44.35;

    /// Clockwise circular track sampled at `hz`, recorder sign
    /// conventions (lateral acceleration and yaw rate inverted).
    fn circular_lap(hz: usize, duration_s: f64, speed: f64) -> Vec<TelemetryPoint> {
        let lat0: f64 = 44.35;
        let lon0 = 11.71;
        let circumference = speed * duration_s;
        let radius = circumference / (2.0 * PI);
        let omega = 2.0 * PI / duration_s; // rad/s, clockwise
        let n = (duration_s * hz as f64) as usize;
        let k_lon = K * lat0.to_radians().cos();

        (0..n)
            .map(|i| {
                let t = i as f64 / hz as f64;
                let theta = omega * t;
                let east = radius * theta.sin();
                let north = radius * (theta.cos() - 1.0);
                TelemetryPoint {
                    timestamp: t,
                    lat: lat0 + north / K,
                    lon: lon0 + east / k_lon,
                    speed,
                    bearing: (90.0 + theta.to_degrees()).rem_euclid(360.0),
                    accuracy: 5.0,
                    lap: 0,
                    lateral_acc: -(speed * omega) / G,
                    longitudinal_acc: 0.0,
                    yaw_rate: -omega.to_degrees(),
                }
            })
            .collect()
    }

    fn downsample(stream: &[EnrichedPoint], stride: usize) -> Vec<DownsampledFix> {
        stream
            .iter()
            .enumerate()
            .step_by(stride)
            .map(|(i, p)| DownsampledFix {
                timestamp: p.timestamp(),
                lat: p.point.lat,
                lon: p.point.lon,
                original_index: i,
            })
            .collect()
    }

    #[test]
    fn test_ekf_tracks_circular_lap() {
        let stream = enrich_lap(&circular_lap(25, 60.0, 20.0));
        let fixes = downsample(&stream, 25);
        let out = apply_ekf(&fixes, &stream, &EkfConfig::default(), G, K);
        assert_eq!(out.len(), stream.len());

        let mut worst = 0.0f64;
        for (est, truth) in out.iter().zip(stream.iter()) {
            let err = haversine(est.lat, est.lon, truth.point.lat, truth.point.lon);
            worst = worst.max(err);
        }
        assert!(worst < 5.0, "worst-case error {worst} m");
    }

    #[test]
    fn test_ekf_heading_stays_normalized() {
        let stream = enrich_lap(&circular_lap(25, 60.0, 20.0));
        let fixes = downsample(&stream, 25);
        let init = &stream[0].point;
        let mut ekf = Ekf7d::init(
            init.lat,
            init.lon,
            init.speed,
            init.bearing,
            &EkfConfig::default(),
            G,
            K,
        );
        let mut cursor = 1usize;
        for i in 1..stream.len() {
            let s = &stream[i].point;
            ekf.predict(s.lateral_acc, s.longitudinal_acc, s.yaw_rate, 0.04);
            if cursor < fixes.len() && s.timestamp >= fixes[cursor].timestamp {
                ekf.update(fixes[cursor].lat, fixes[cursor].lon, 5.0);
                cursor += 1;
            }
            let psi = ekf.heading();
            assert!(psi > -PI && psi <= PI, "psi out of range: {psi}");
        }
    }

    #[test]
    fn test_ekf_covariance_symmetric() {
        let stream = enrich_lap(&circular_lap(25, 20.0, 15.0));
        let fixes = downsample(&stream, 25);
        let init = &stream[0].point;
        let mut ekf = Ekf7d::init(
            init.lat,
            init.lon,
            init.speed,
            init.bearing,
            &EkfConfig::default(),
            G,
            K,
        );
        let mut cursor = 1usize;
        for i in 1..stream.len() {
            let s = &stream[i].point;
            ekf.predict(s.lateral_acc, s.longitudinal_acc, s.yaw_rate, 0.04);
            if cursor < fixes.len() && s.timestamp >= fixes[cursor].timestamp {
                ekf.update(fixes[cursor].lat, fixes[cursor].lon, 5.0);
                cursor += 1;
            }
            let p = ekf.covariance();
            for r in 0..7 {
                for c in 0..7 {
                    assert!(
                        (p[[r, c]] - p[[c, r]]).abs() < 1e-9,
                        "asymmetry at ({r},{c})"
                    );
                }
            }
        }
    }

    #[test]
    fn test_ekf_zero_imu_dead_reckons() {
        // No inertial signal and perfect 1 Hz fixes: the filter
        // degrades to constant-velocity dead reckoning
        let lat0: f64 = 44.35;
        let lon0 = 11.71;
        let k_lon = K * lat0.to_radians().cos();
        let points: Vec<TelemetryPoint> = (0..500)
            .map(|i| {
                let t = i as f64 * 0.04;
                TelemetryPoint {
                    timestamp: t,
                    lat: lat0,
                    lon: lon0 + 15.0 * t / k_lon,
                    speed: 15.0,
                    bearing: 90.0,
                    accuracy: 5.0,
                    lap: 0,
                    lateral_acc: 0.0,
                    longitudinal_acc: 0.0,
                    yaw_rate: 0.0,
                }
            })
            .collect();
        let stream = enrich_lap(&points);
        let fixes = downsample(&stream, 25);
        let out = apply_ekf(&fixes, &stream, &EkfConfig::default(), G, K);
        let mut sq_sum = 0.0;
        for (est, truth) in out.iter().zip(stream.iter()) {
            sq_sum += haversine(est.lat, est.lon, truth.point.lat, truth.point.lon).powi(2);
        }
        let rmse = (sq_sum / out.len() as f64).sqrt();
        assert!(rmse < 3.0, "rmse {rmse}");
    }

    #[test]
    fn test_ekf_duplicate_timestamp_is_no_op() {
        let mut points = circular_lap(25, 10.0, 10.0);
        // Duplicate one interior timestamp
        points[100].timestamp = points[99].timestamp;
        let stream = enrich_lap(&points);
        let fixes = downsample(&stream, 25);
        let out = apply_ekf(&fixes, &stream, &EkfConfig::default(), G, K);
        assert!((out[100].lat - out[99].lat).abs() < 1e-12);
        assert!((out[100].lon - out[99].lon).abs() < 1e-12);
    }

    #[test]
    fn test_ekf_skips_slow_start() {
        // Standing start: the first fix with speed above threshold
        // becomes the origin, earlier samples produce no output
        let mut points = circular_lap(25, 20.0, 15.0);
        for p in points.iter_mut().take(50) {
            p.speed = 0.0;
        }
        let stream = enrich_lap(&points);
        let fixes = downsample(&stream, 25);
        let out = apply_ekf(&fixes, &stream, &EkfConfig::default(), G, K);
        // First two fixes (indices 0 and 25) are below threshold
        assert_eq!(out.len(), stream.len() - 50);
        assert_eq!(out[0].timestamp, stream[50].timestamp());
    }

    #[test]
    fn test_init_splits_velocity_by_bearing() {
        let cfg = EkfConfig::default();
        // Heading 90 degrees: all speed goes east
        let ekf = Ekf7d::init(LAT0_T, 11.71, 20.0, 90.0, &cfg, G, K);
        let fix = ekf.position_fix(0.0);
        assert!((fix.lat - LAT0_T).abs() < 1e-12);
        assert!((ekf.heading() - std::f64::consts::FRAC_PI_2).abs() < 1e-12);

        // Heading 0: all speed goes north; state starts at the origin
        let ekf = Ekf7d::init(LAT0_T, 11.71, 20.0, 0.0, &cfg, G, K);
        assert!(ekf.heading().abs() < 1e-12);
        assert_eq!(ekf.biases(), (0.0, 0.0));
    }

    #[test]
    fn test_predict_zero_dt_is_no_op() {
        let cfg = EkfConfig::default();
        let mut ekf = Ekf7d::init(LAT0_T, 11.71, 20.0, 90.0, &cfg, G, K);
        let before = ekf.position_fix(0.0);
        ekf.predict(-0.2, 0.1, -6.0, 0.0);
        ekf.predict(-0.2, 0.1, -6.0, -0.5);
        let after = ekf.position_fix(0.0);
        assert_eq!(before.lat, after.lat);
        assert_eq!(before.lon, after.lon);
        assert_eq!(ekf.skipped_updates(), 0);
    }

    #[test]
    fn test_update_pulls_position_toward_measurement() {
        let cfg = EkfConfig::default();
        let mut ekf = Ekf7d::init(LAT0_T, 11.71, 10.0, 90.0, &cfg, G, K);
        // Drift the state east for one second, then measure the origin
        ekf.predict(0.0, 0.0, 0.0, 1.0);
        let drifted = ekf.position_fix(1.0);
        assert!(drifted.lon > 11.71);
        ekf.update(LAT0_T, 11.71, 2.0);
        let corrected = ekf.position_fix(1.0);
        assert!(corrected.lon < drifted.lon);
    }

    #[test]
    fn test_ekf_no_valid_init_returns_empty() {
        let mut points = circular_lap(25, 5.0, 10.0);
        for p in points.iter_mut() {
            p.speed = 0.5;
        }
        let stream = enrich_lap(&points);
        let fixes = downsample(&stream, 25);
        assert!(apply_ekf(&fixes, &stream, &EkfConfig::default(), G, K).is_empty());
    }
}
