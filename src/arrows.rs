//! Wind arrow features for the viewport grid.

use serde::Serialize;

use crate::grid::GridPoint;
use crate::{ArrowConfig, Coordinate};

/// A wind arrow icon placement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ArrowFeature {
    pub position: Coordinate,
    /// Icon rotation, degrees clockwise from north. Arrows point where the
    /// wind is going, i.e. the "from" direction plus 180°.
    pub rotation: f64,
    /// Icon scale
    pub size: f64,
    pub speed_kmh: f64,
    /// Meteorological "from" direction, degrees
    pub direction_from: u16,
}

/// Project a resolved wind grid into arrows for `hour_index`.
///
/// Points without a forecast for that hour are skipped rather than drawn
/// as calm.
pub fn project_arrows(grid: &[GridPoint], hour_index: usize, config: &ArrowConfig) -> Vec<ArrowFeature> {
    grid.iter()
        .filter_map(|point| {
            let entry = point.wind_at(hour_index)?;
            Some(ArrowFeature {
                position: Coordinate::new(point.longitude, point.latitude),
                rotation: (entry.direction_deg as f64 + 180.0).rem_euclid(360.0),
                size: arrow_size(entry.speed_kmh, config),
                speed_kmh: entry.speed_kmh,
                direction_from: entry.direction_deg,
            })
        })
        .collect()
}

/// Icon scale for a wind speed, linear between the configured bounds.
pub fn arrow_size(speed_kmh: f64, config: &ArrowConfig) -> f64 {
    if !(config.full_size_speed_kmh > 0.0) {
        return config.max_size;
    }
    let t = (speed_kmh / config.full_size_speed_kmh).clamp(0.0, 1.0);
    config.min_size + (config.max_size - config.min_size) * t
}
