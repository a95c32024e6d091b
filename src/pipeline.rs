//! Per-lap reconstruction pipeline.
//!
//! Pure computation layer: samples and a configuration in, per-lap
//! results out. Nothing here touches the filesystem, the network or
//! global state, so a caller can replay recorded sessions, feed
//! synthetic tracks from tests, or fan laps out across threads with
//! per-thread configuration copies.
//!
//! Per lap the orchestrator enriches the raw samples, downsamples the
//! positional channel to the GPS cadence, optionally injects Gaussian
//! position noise, filters outliers, runs every reconstructor against
//! the high-rate timebase and scores each against the enriched ground
//! truth.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::Config;
use crate::enrich::{enrich_lap, total_distance};
use crate::extrema::{detect_speed_extrema, ExtremaParams, SpeedExtremum};
use crate::filters::ekf_7d::apply_ekf;
use crate::filters::rts_smoother::apply_kalman_rts;
use crate::geo::gaussian;
use crate::interp::{apply_linear, apply_spline};
use crate::metrics::compute_accuracy;
use crate::outlier::filter_fixes;
use crate::types::{
    AccuracyMetrics, ChartData, DownsampledFix, EnrichedPoint, OutlierVerdict, PositionalFix,
    TelemetryPoint,
};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// One EKF noise tuning of the design-time sweep grid.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct EkfTuning {
    pub sigma_accel: f64,
    pub sigma_gyro: f64,
    pub sigma_bias: f64,
    pub gps_pos_noise: f64,
}

/// Enumerated sweep grid: half, nominal and doubled accelerometer
/// noise against nominal and loose GPS noise. Design-time list, no
/// adaptive search.
pub const EKF_SWEEP: [EkfTuning; 6] = [
    EkfTuning { sigma_accel: 0.25, sigma_gyro: 0.02, sigma_bias: 0.001, gps_pos_noise: 5.0 },
    EkfTuning { sigma_accel: 0.5, sigma_gyro: 0.02, sigma_bias: 0.001, gps_pos_noise: 5.0 },
    EkfTuning { sigma_accel: 1.0, sigma_gyro: 0.02, sigma_bias: 0.001, gps_pos_noise: 5.0 },
    EkfTuning { sigma_accel: 0.5, sigma_gyro: 0.01, sigma_bias: 0.0005, gps_pos_noise: 5.0 },
    EkfTuning { sigma_accel: 0.5, sigma_gyro: 0.05, sigma_bias: 0.005, gps_pos_noise: 10.0 },
    EkfTuning { sigma_accel: 1.0, sigma_gyro: 0.02, sigma_bias: 0.001, gps_pos_noise: 10.0 },
];

/// A fix the outlier filter removed, with its verdict.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RejectedFix {
    pub fix: DownsampledFix,
    pub verdict: OutlierVerdict,
}

/// Output sequences of every reconstructor for one fix path.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Reconstructions {
    pub linear: Vec<PositionalFix>,
    pub spline: Vec<PositionalFix>,
    pub kalman_rts: Vec<PositionalFix>,
    pub ekf_raw: Vec<PositionalFix>,
    pub ekf_smooth: Vec<PositionalFix>,
    pub ekf_best: Vec<PositionalFix>,
    pub ekf_best_tuning: EkfTuning,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ReconstructionMetrics {
    pub linear: AccuracyMetrics,
    pub spline: AccuracyMetrics,
    pub kalman_rts: AccuracyMetrics,
    pub ekf_raw: AccuracyMetrics,
    pub ekf_smooth: AccuracyMetrics,
    pub ekf_best: AccuracyMetrics,
}

/// One path (clean or noisy) through the lap: surviving fixes,
/// rejects, reconstructions and their scores.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PathEvaluation {
    pub fixes: Vec<DownsampledFix>,
    pub rejected: Vec<RejectedFix>,
    pub outputs: Reconstructions,
    pub metrics: ReconstructionMetrics,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct OutlierCounts {
    pub clean: usize,
    pub noisy: usize,
    pub total: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LapResult {
    pub lap: u32,
    pub ground_truth: Vec<EnrichedPoint>,
    pub clean: PathEvaluation,
    pub noisy: Option<PathEvaluation>,
    pub outlier_counts: OutlierCounts,
    /// Lap wall time (s)
    pub duration: f64,
    /// Along-path length (m)
    pub total_distance: f64,
    pub chart_data: ChartData,
    pub speed_extrema: Vec<SpeedExtremum>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessResult {
    pub laps: Vec<u32>,
    pub selected_lap: u32,
    pub per_lap: BTreeMap<u32, LapResult>,
}

/// Run the whole session. The only error surfaced to callers is
/// invalid input; every numeric anomaly inside a lap is absorbed
/// locally and shows up in the diagnostic counts instead.
pub fn process(samples: &[TelemetryPoint], config: &Config) -> Result<ProcessResult, PipelineError> {
    if samples.is_empty() {
        return Err(PipelineError::InvalidInput("no valid samples".into()));
    }

    let mut by_lap: BTreeMap<u32, Vec<TelemetryPoint>> = BTreeMap::new();
    for s in samples {
        by_lap.entry(s.lap).or_default().push(s.clone());
    }

    let mut rng = match config.noise.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut per_lap = BTreeMap::new();
    for (lap, points) in &by_lap {
        if points.len() < 2 {
            continue;
        }
        if let Some(result) = process_lap(*lap, points, config, &mut rng) {
            per_lap.insert(*lap, result);
        }
    }

    if per_lap.is_empty() {
        return Err(PipelineError::InvalidInput("no laps found".into()));
    }

    let selected_lap = per_lap
        .values()
        .min_by(|a, b| a.duration.total_cmp(&b.duration))
        .map(|r| r.lap)
        .unwrap_or(0);

    Ok(ProcessResult {
        laps: per_lap.keys().copied().collect(),
        selected_lap,
        per_lap,
    })
}

fn process_lap(
    lap: u32,
    points: &[TelemetryPoint],
    config: &Config,
    rng: &mut StdRng,
) -> Option<LapResult> {
    let stream = enrich_lap(points);
    let stride = config.sampling.stride();

    let downsampled: Vec<DownsampledFix> = stream
        .iter()
        .enumerate()
        .step_by(stride)
        .map(|(i, p)| DownsampledFix {
            timestamp: p.timestamp(),
            lat: p.point.lat,
            lon: p.point.lon,
            original_index: i,
        })
        .collect();
    if downsampled.len() < 2 {
        log::debug!("lap {lap}: too few fixes after downsampling, skipping");
        return None;
    }

    let clean = evaluate_path(&downsampled, &stream, config);
    let noisy = if config.noise.enabled {
        let noisy_fixes = inject_noise(&downsampled, config, rng);
        Some(evaluate_path(&noisy_fixes, &stream, config))
    } else {
        None
    };

    let outlier_counts = OutlierCounts {
        clean: clean.rejected.len(),
        noisy: noisy.as_ref().map(|n| n.rejected.len()).unwrap_or(0),
        total: clean.rejected.len() + noisy.as_ref().map(|n| n.rejected.len()).unwrap_or(0),
    };

    let duration = stream.last()?.timestamp() - stream.first()?.timestamp();
    log::debug!(
        "lap {lap}: {} samples, {} fixes, duration {duration:.1}s, {} outliers",
        stream.len(),
        downsampled.len(),
        outlier_counts.total
    );

    Some(LapResult {
        lap,
        chart_data: chart_data(&stream, config),
        speed_extrema: detect_speed_extrema(&stream, &ExtremaParams::default()),
        total_distance: total_distance(&stream),
        duration,
        clean,
        noisy,
        outlier_counts,
        ground_truth: stream,
    })
}

/// Displace each downsampled fix with zero-mean Gaussian noise whose
/// stddev is the mean of the configured bounds, converting metres to
/// degrees at the fix's own latitude.
fn inject_noise(fixes: &[DownsampledFix], config: &Config, rng: &mut StdRng) -> Vec<DownsampledFix> {
    let stddev = config.noise.stddev_meters();
    let k = config.meters_per_deg_lat;
    fixes
        .iter()
        .map(|fix| {
            let noise_north = gaussian(rng, 0.0, stddev);
            let noise_east = gaussian(rng, 0.0, stddev);
            DownsampledFix {
                lat: fix.lat + noise_north / k,
                lon: fix.lon + noise_east / (k * fix.lat.to_radians().cos()),
                ..*fix
            }
        })
        .collect()
}

fn evaluate_path(fixes: &[DownsampledFix], stream: &[EnrichedPoint], config: &Config) -> PathEvaluation {
    let partition = filter_fixes(fixes, stream, &config.outlier, config.g, config.meters_per_deg_lat);
    let kept = partition.kept;
    let rejected: Vec<RejectedFix> = partition
        .rejected
        .into_iter()
        .map(|(fix, verdict)| RejectedFix { fix, verdict })
        .collect();

    let timebase: Vec<f64> = stream.iter().map(|p| p.timestamp()).collect();
    let control: Vec<PositionalFix> = kept.iter().map(|f| f.as_fix()).collect();

    let linear = apply_linear(&control, &timebase);
    let spline = apply_spline(&control, &timebase);
    let kalman_rts = apply_kalman_rts(&kept, stream, &config.kalman, config.meters_per_deg_lat);
    let ekf_raw = apply_ekf(&kept, stream, &config.ekf, config.g, config.meters_per_deg_lat);
    let ekf_smooth = smooth_ekf_output(&ekf_raw, config.sampling.stride());

    // Parameter sweep: each trial runs on its own configuration copy
    let mut best: Option<(Vec<PositionalFix>, EkfTuning, AccuracyMetrics)> = None;
    for tuning in EKF_SWEEP {
        let mut trial_cfg = config.ekf;
        trial_cfg.sigma_accel = tuning.sigma_accel;
        trial_cfg.sigma_gyro = tuning.sigma_gyro;
        trial_cfg.sigma_bias = tuning.sigma_bias;
        trial_cfg.gps_pos_noise = tuning.gps_pos_noise;
        let out = apply_ekf(&kept, stream, &trial_cfg, config.g, config.meters_per_deg_lat);
        let m = compute_accuracy(stream, &out);
        let better = best
            .as_ref()
            .map(|(_, _, cur)| m.rmse < cur.rmse)
            .unwrap_or(true);
        if better {
            best = Some((out, tuning, m));
        }
    }
    let (ekf_best, ekf_best_tuning, ekf_best_metrics) = match best {
        Some((out, tuning, m)) => (out, tuning, m),
        None => (Vec::new(), EKF_SWEEP[0], AccuracyMetrics::empty()),
    };

    let metrics = ReconstructionMetrics {
        linear: compute_accuracy(stream, &linear),
        spline: compute_accuracy(stream, &spline),
        kalman_rts: compute_accuracy(stream, &kalman_rts),
        ekf_raw: compute_accuracy(stream, &ekf_raw),
        ekf_smooth: compute_accuracy(stream, &ekf_smooth),
        ekf_best: ekf_best_metrics,
    };

    PathEvaluation {
        fixes: kept,
        rejected,
        outputs: Reconstructions {
            linear,
            spline,
            kalman_rts,
            ekf_raw,
            ekf_smooth,
            ekf_best,
            ekf_best_tuning,
        },
        metrics,
    }
}

/// Spline-smooth the EKF track: decimate the raw output back to the
/// fix cadence and fit the Catmull-Rom through it over the EKF's own
/// timebase.
fn smooth_ekf_output(ekf_raw: &[PositionalFix], stride: usize) -> Vec<PositionalFix> {
    if ekf_raw.len() < 3 {
        return ekf_raw.to_vec();
    }
    let mut control: Vec<PositionalFix> = ekf_raw.iter().copied().step_by(stride.max(1)).collect();
    let last = ekf_raw[ekf_raw.len() - 1];
    if control.last().map(|c| c.timestamp < last.timestamp).unwrap_or(true) {
        control.push(last);
    }
    let timebase: Vec<f64> = ekf_raw.iter().map(|f| f.timestamp).collect();
    apply_spline(&control, &timebase)
}

/// Decimate the enriched channels to roughly 2 Hz for front ends.
fn chart_data(stream: &[EnrichedPoint], config: &Config) -> ChartData {
    let stride = ((config.sampling.imu_hz / 2.0).round() as usize).max(1);
    let mut data = ChartData::default();
    for p in stream.iter().step_by(stride) {
        data.timestamps.push(p.timestamp());
        data.speed.push(p.point.speed);
        data.lateral_acc.push(p.point.lateral_acc);
        data.longitudinal_acc.push(p.point.longitudinal_acc);
        data.distance.push(p.distance);
        data.lap_position.push(p.lap_position);
        data.bearing.push(p.point.bearing);
    }
    data
}
