//! Reference parser for tabular session records.
//!
//! The format is a 13-line free-text header followed by one row per
//! sample. Columns are positional: timestamp=0, lap=2, accuracy=5,
//! bearing=7, lat=11, lon=12, speed=14 (m/s), lateral_acc=17 (G),
//! longitudinal_acc=19 (G), yaw_rate=28 (deg/s). Rows whose timestamp
//! or position fail to parse are skipped; a missing accuracy defaults
//! to 5 m.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::types::TelemetryPoint;

pub const HEADER_LINES: usize = 13;
pub const DEFAULT_ACCURACY_M: f64 = 5.0;

const COL_TIMESTAMP: usize = 0;
const COL_LAP: usize = 2;
const COL_ACCURACY: usize = 5;
const COL_BEARING: usize = 7;
const COL_LAT: usize = 11;
const COL_LON: usize = 12;
const COL_SPEED: usize = 14;
const COL_LATERAL_ACC: usize = 17;
const COL_LONGITUDINAL_ACC: usize = 19;
const COL_YAW_RATE: usize = 28;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("failed to read session file: {0}")]
    Io(#[from] std::io::Error),
    #[error("session file contains no parsable rows")]
    Empty,
}

fn field(cols: &[&str], idx: usize) -> Option<f64> {
    cols.get(idx).and_then(|s| s.trim().parse::<f64>().ok())
}

fn parse_row(line: &str) -> Option<TelemetryPoint> {
    let cols: Vec<&str> = if line.contains(',') {
        line.split(',').collect()
    } else {
        line.split_whitespace().collect()
    };

    let timestamp = field(&cols, COL_TIMESTAMP)?;
    let lat = field(&cols, COL_LAT)?;
    let lon = field(&cols, COL_LON)?;

    let accuracy = match field(&cols, COL_ACCURACY) {
        Some(a) if a > 0.0 => a,
        _ => DEFAULT_ACCURACY_M,
    };

    Some(TelemetryPoint {
        timestamp,
        lat,
        lon,
        speed: field(&cols, COL_SPEED).unwrap_or(0.0),
        bearing: field(&cols, COL_BEARING).unwrap_or(0.0).rem_euclid(360.0),
        accuracy,
        lap: field(&cols, COL_LAP).map(|l| l.max(0.0) as u32).unwrap_or(0),
        lateral_acc: field(&cols, COL_LATERAL_ACC).unwrap_or(0.0),
        longitudinal_acc: field(&cols, COL_LONGITUDINAL_ACC).unwrap_or(0.0),
        yaw_rate: field(&cols, COL_YAW_RATE).unwrap_or(0.0),
    })
}

/// Parse a whole session file into telemetry samples.
pub fn parse_session(path: &Path) -> Result<Vec<TelemetryPoint>, RecordError> {
    let content = fs::read_to_string(path)?;
    let points = parse_rows(&content);
    if points.is_empty() {
        return Err(RecordError::Empty);
    }
    Ok(points)
}

/// Parse session content that is already in memory.
pub fn parse_rows(content: &str) -> Vec<TelemetryPoint> {
    let mut skipped = 0usize;
    let points: Vec<TelemetryPoint> = content
        .lines()
        .skip(HEADER_LINES)
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let row = parse_row(line);
            if row.is_none() {
                skipped += 1;
            }
            row
        })
        .collect();
    if skipped > 0 {
        log::debug!("record parser skipped {skipped} unparsable rows");
    }
    points
}
