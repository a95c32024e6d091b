//! Trajectory enrichment: cumulative along-path distance, normalised
//! lap position and lap-relative time for one lap of samples.

use crate::geo::haversine;
use crate::types::{EnrichedPoint, TelemetryPoint};

/// Enrich one lap of samples. The first point gets distance 0 and
/// lap_position 0; the last gets lap_position 1 whenever the lap
/// covered any distance at all.
pub fn enrich_lap(points: &[TelemetryPoint]) -> Vec<EnrichedPoint> {
    if points.is_empty() {
        return Vec::new();
    }

    let start_time = points[0].timestamp;
    let mut cumulative = vec![0.0; points.len()];
    for i in 1..points.len() {
        let step = haversine(
            points[i - 1].lat,
            points[i - 1].lon,
            points[i].lat,
            points[i].lon,
        );
        cumulative[i] = cumulative[i - 1] + step;
    }

    let total = cumulative[points.len() - 1];
    points
        .iter()
        .enumerate()
        .map(|(i, p)| EnrichedPoint {
            point: p.clone(),
            distance: cumulative[i],
            lap_position: if total > 0.0 { cumulative[i] / total } else { 0.0 },
            lap_time: p.timestamp - start_time,
        })
        .collect()
}

/// Total along-path distance of an enriched lap, metres.
pub fn total_distance(stream: &[EnrichedPoint]) -> f64 {
    stream.last().map(|p| p.distance).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(timestamp: f64, lat: f64, lon: f64) -> TelemetryPoint {
        TelemetryPoint {
            timestamp,
            lat,
            lon,
            speed: 10.0,
            bearing: 0.0,
            accuracy: 5.0,
            lap: 0,
            lateral_acc: 0.0,
            longitudinal_acc: 0.0,
            yaw_rate: 0.0,
        }
    }

    #[test]
    fn test_enrich_endpoints() {
        let points = vec![
            sample(100.0, 44.3500, 11.7100),
            sample(101.0, 44.3501, 11.7100),
            sample(102.0, 44.3503, 11.7100),
        ];
        let enriched = enrich_lap(&points);
        assert_eq!(enriched.len(), 3);
        assert_eq!(enriched[0].distance, 0.0);
        assert_eq!(enriched[0].lap_position, 0.0);
        assert_eq!(enriched[0].lap_time, 0.0);
        assert!((enriched[2].lap_position - 1.0).abs() < 1e-12);
        assert!((enriched[2].lap_time - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_lap_position_monotone() {
        let points: Vec<TelemetryPoint> = (0..50)
            .map(|i| sample(i as f64 * 0.04, 44.35 + i as f64 * 1e-5, 11.71))
            .collect();
        let enriched = enrich_lap(&points);
        for w in enriched.windows(2) {
            assert!(w[1].lap_position >= w[0].lap_position);
        }
        for p in &enriched {
            assert!(p.lap_position >= 0.0 && p.lap_position <= 1.0);
        }
    }

    #[test]
    fn test_stationary_lap_keeps_zero_positions() {
        let points = vec![sample(0.0, 44.35, 11.71), sample(1.0, 44.35, 11.71)];
        let enriched = enrich_lap(&points);
        assert_eq!(enriched[1].distance, 0.0);
        assert_eq!(enriched[1].lap_position, 0.0);
    }
}
