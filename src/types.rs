use serde::{Deserialize, Serialize};

/// One fused sensor sample as read from a session record.
///
/// `timestamp` is seconds, non-decreasing within a lap. `lat`/`lon` are
/// WGS-84 degrees. Accelerations are proper acceleration in units of
/// standard gravity, body frame. `yaw_rate` is deg/s about the body
/// vertical axis.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TelemetryPoint {
    pub timestamp: f64,
    pub lat: f64,
    pub lon: f64,
    /// Reported speed over ground (m/s)
    pub speed: f64,
    /// Course over ground, degrees clockwise from true north, [0, 360)
    pub bearing: f64,
    /// Reported horizontal accuracy (m), 5.0 when the source omits it
    pub accuracy: f64,
    /// Lap tag partitioning the session
    pub lap: u32,
    pub lateral_acc: f64,
    pub longitudinal_acc: f64,
    pub yaw_rate: f64,
}

/// Telemetry sample with per-lap derived fields.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnrichedPoint {
    pub point: TelemetryPoint,
    /// Metres along path from lap start (cumulative great-circle)
    pub distance: f64,
    /// distance / total lap distance, in [0, 1]
    pub lap_position: f64,
    /// Seconds since lap start
    pub lap_time: f64,
}

impl EnrichedPoint {
    pub fn timestamp(&self) -> f64 {
        self.point.timestamp
    }
}

/// Positional-only triple. Every reconstructor emits sequences of these.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionalFix {
    pub timestamp: f64,
    pub lat: f64,
    pub lon: f64,
}

/// Downsampled positional fix that remembers where in the enriched
/// stream it came from, so filters can line measurements back up with
/// the high-rate timebase.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct DownsampledFix {
    pub timestamp: f64,
    pub lat: f64,
    pub lon: f64,
    pub original_index: usize,
}

impl DownsampledFix {
    pub fn as_fix(&self) -> PositionalFix {
        PositionalFix {
            timestamp: self.timestamp,
            lat: self.lat,
            lon: self.lon,
        }
    }
}

/// Per-criterion anomaly scores from the physics outlier check.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct AnomalyScores {
    pub accel: f64,
    pub yaw: f64,
    pub speed: f64,
    pub lat_acc: f64,
}

impl AnomalyScores {
    /// Weighted total used by the decision rule.
    pub fn total(&self) -> f64 {
        2.0 * self.accel + 1.5 * self.yaw + 1.0 * self.speed + 1.0 * self.lat_acc
    }
}

/// Outcome of the outlier check for a single fix.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum OutlierVerdict {
    Kept,
    Rejected {
        reason: String,
        scores: AnomalyScores,
        total_score: f64,
    },
}

/// Positional error statistics of one reconstruction against ground
/// truth, metres. Holds `mae <= rmse <= max_error`; all three are
/// +inf when no timestamps matched.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct AccuracyMetrics {
    pub rmse: f64,
    pub mae: f64,
    pub max_error: f64,
    pub count: usize,
}

impl AccuracyMetrics {
    pub fn empty() -> Self {
        Self {
            rmse: f64::INFINITY,
            mae: f64::INFINITY,
            max_error: f64::INFINITY,
            count: 0,
        }
    }
}

/// Decimated per-lap channel summary (about 2 Hz) for front ends.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChartData {
    pub timestamps: Vec<f64>,
    pub speed: Vec<f64>,
    pub lateral_acc: Vec<f64>,
    pub longitudinal_acc: Vec<f64>,
    pub distance: Vec<f64>,
    pub lap_position: Vec<f64>,
    pub bearing: Vec<f64>,
}
