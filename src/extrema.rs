//! Speed extrema detection for lap annotation.
//!
//! The speed series is smoothed with a centred moving average, strict
//! local minima and maxima above a floor are collected, consecutive
//! same-type extrema are merged keeping the stronger one, and adjacent
//! opposite-type pairs that differ by less than a configurable delta
//! are dropped until a full pass changes nothing.

use serde::{Deserialize, Serialize};

use crate::types::EnrichedPoint;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtremumKind {
    Minimum,
    Maximum,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SpeedExtremum {
    pub kind: ExtremumKind,
    /// Index into the enriched stream
    pub index: usize,
    pub timestamp: f64,
    pub distance: f64,
    pub lap_position: f64,
    pub speed_ms: f64,
    pub speed_kmh: f64,
}

#[derive(Clone, Copy, Debug)]
pub struct ExtremaParams {
    /// Half-width of the centred moving average, in samples
    pub window_size: usize,
    /// Extrema below this smoothed speed are ignored (m/s)
    pub min_speed_threshold: f64,
    /// Adjacent min/max pairs closer than this are dropped (km/h)
    pub min_delta_kmh: f64,
}

impl Default for ExtremaParams {
    fn default() -> Self {
        Self {
            window_size: 25,
            min_speed_threshold: 5.0,
            min_delta_kmh: 20.0,
        }
    }
}

/// Centred moving average with half-width `w`, window clipped at the
/// series ends.
fn moving_average(values: &[f64], w: usize) -> Vec<f64> {
    let n = values.len();
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let lo = i.saturating_sub(w);
        let hi = (i + w).min(n - 1);
        let slice = &values[lo..=hi];
        out.push(slice.iter().sum::<f64>() / slice.len() as f64);
    }
    out
}

#[derive(Clone, Copy)]
struct Candidate {
    index: usize,
    kind: ExtremumKind,
    value: f64,
}

/// Collapse runs of same-type extrema, keeping the smaller minimum and
/// the larger maximum.
fn merge_same_type(list: &mut Vec<Candidate>) {
    let mut merged: Vec<Candidate> = Vec::with_capacity(list.len());
    for c in list.iter() {
        match merged.last_mut() {
            Some(last) if last.kind == c.kind => {
                let stronger = match c.kind {
                    ExtremumKind::Minimum => c.value < last.value,
                    ExtremumKind::Maximum => c.value > last.value,
                };
                if stronger {
                    *last = *c;
                }
            }
            _ => merged.push(*c),
        }
    }
    *list = merged;
}

/// Detect annotated speed extrema along one enriched lap.
pub fn detect_speed_extrema(stream: &[EnrichedPoint], params: &ExtremaParams) -> Vec<SpeedExtremum> {
    if stream.len() < 3 {
        return Vec::new();
    }

    let speeds: Vec<f64> = stream.iter().map(|p| p.point.speed).collect();
    let smoothed = moving_average(&speeds, params.window_size);

    let mut candidates: Vec<Candidate> = Vec::new();
    for i in 1..smoothed.len() - 1 {
        let (prev, cur, next) = (smoothed[i - 1], smoothed[i], smoothed[i + 1]);
        let kind = if cur > prev && cur > next {
            Some(ExtremumKind::Maximum)
        } else if cur < prev && cur < next {
            Some(ExtremumKind::Minimum)
        } else {
            None
        };
        if let Some(kind) = kind {
            if cur > params.min_speed_threshold {
                candidates.push(Candidate { index: i, kind, value: cur });
            }
        }
    }

    merge_same_type(&mut candidates);

    // Drop weak opposite-type pairs, re-merging after every removal,
    // until a full pass leaves the list unchanged
    let min_delta_ms = params.min_delta_kmh / 3.6;
    loop {
        let mut removed = false;
        let mut i = 0;
        while i + 1 < candidates.len() {
            let (a, b) = (candidates[i], candidates[i + 1]);
            if a.kind != b.kind && (a.value - b.value).abs() < min_delta_ms {
                candidates.drain(i..=i + 1);
                merge_same_type(&mut candidates);
                removed = true;
            } else {
                i += 1;
            }
        }
        if !removed {
            break;
        }
    }

    candidates
        .iter()
        .map(|c| {
            let p = &stream[c.index];
            SpeedExtremum {
                kind: c.kind,
                index: c.index,
                timestamp: p.timestamp(),
                distance: p.distance,
                lap_position: p.lap_position,
                speed_ms: c.value,
                speed_kmh: c.value * 3.6,
            }
        })
        .collect()
}
