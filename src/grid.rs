//! Wind sampling locations: even-index samples along a route and a regular
//! lattice across the viewport.

use std::sync::Arc;

use crate::wind::HourlyWindEntry;
use crate::{Bounds, Coordinate, SamplePoint};

/// One lattice point of the viewport wind grid.
#[derive(Debug, Clone, PartialEq)]
pub struct GridPoint {
    pub latitude: f64,
    pub longitude: f64,
    /// Hourly forecast once resolved
    pub wind: Option<Arc<Vec<HourlyWindEntry>>>,
}

impl GridPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            wind: None,
        }
    }

    /// Forecast entry at `hour_index`, if resolved and present.
    pub fn wind_at(&self, hour_index: usize) -> Option<&HourlyWindEntry> {
        self.wind.as_deref().and_then(|series| series.get(hour_index))
    }
}

/// Pick up to `count` route points at evenly spaced indices.
///
/// Endpoints are always included when `count > 1`. A route with no more
/// than `count` points is returned whole.
pub fn sample_points(route: &[Coordinate], count: usize) -> Vec<SamplePoint> {
    if route.is_empty() || count == 0 {
        return Vec::new();
    }
    if route.len() <= count {
        return route.iter().map(SamplePoint::from).collect();
    }
    if count == 1 {
        return vec![SamplePoint::from(&route[0])];
    }

    let last = route.len() - 1;
    (0..count)
        .map(|i| {
            let idx = ((i * last) as f64 / (count - 1) as f64).round() as usize;
            SamplePoint::from(&route[idx.min(last)])
        })
        .collect()
}

/// Regular `cols × rows` lattice over `bounds`, both edges included.
///
/// Points are ordered row by row from the southern edge, west to east
/// within a row. A single row or column sits on the center line.
pub fn build_grid(bounds: &Bounds, cols: usize, rows: usize) -> Vec<GridPoint> {
    if cols == 0 || rows == 0 {
        return Vec::new();
    }

    let lat_at = |r: usize| lerp(bounds.min_lat, bounds.max_lat, r, rows);
    let lng_at = |c: usize| lerp(bounds.min_lng, bounds.max_lng, c, cols);

    let mut points = Vec::with_capacity(cols * rows);
    for r in 0..rows {
        let lat = lat_at(r);
        for c in 0..cols {
            points.push(GridPoint::new(lat, lng_at(c)));
        }
    }
    points
}

fn lerp(min: f64, max: f64, i: usize, n: usize) -> f64 {
    if n == 1 {
        return (min + max) / 2.0;
    }
    min + (max - min) * i as f64 / (n - 1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn straight_route(n: usize) -> Vec<Coordinate> {
        (0..n)
            .map(|i| Coordinate::new(-79.40, 43.65 + i as f64 * 0.001))
            .collect()
    }

    #[test]
    fn test_sample_points_includes_endpoints() {
        let route = straight_route(100);
        let samples = sample_points(&route, 10);
        assert_eq!(samples.len(), 10);
        assert_eq!(samples[0], SamplePoint::from(&route[0]));
        assert_eq!(samples[9], SamplePoint::from(&route[99]));
        for pair in samples.windows(2) {
            assert!(pair[1].latitude > pair[0].latitude);
        }
    }

    #[test]
    fn test_sample_points_short_route() {
        let route = straight_route(3);
        assert_eq!(sample_points(&route, 10).len(), 3);
        assert!(sample_points(&[], 10).is_empty());
        assert!(sample_points(&route, 0).is_empty());
        assert_eq!(sample_points(&straight_route(5), 1).len(), 1);
    }

    #[test]
    fn test_build_grid_covers_edges() {
        let bounds = Bounds::new(43.0, 44.0, -80.0, -79.0);
        let grid = build_grid(&bounds, 5, 3);
        assert_eq!(grid.len(), 15);

        assert_eq!(grid[0].latitude, 43.0);
        assert_eq!(grid[0].longitude, -80.0);
        assert_eq!(grid[14].latitude, 44.0);
        assert_eq!(grid[14].longitude, -79.0);
        assert!((grid[1].longitude - -79.75).abs() < 1e-12);
        assert!((grid[5].latitude - 43.5).abs() < 1e-12);
        assert!(grid.iter().all(|p| p.wind.is_none()));
    }

    #[test]
    fn test_build_grid_deterministic_and_degenerate() {
        let bounds = Bounds::new(10.0, 12.0, 20.0, 22.0);
        assert_eq!(build_grid(&bounds, 4, 4), build_grid(&bounds, 4, 4));

        let single = build_grid(&bounds, 1, 1);
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].latitude, 11.0);
        assert_eq!(single[0].longitude, 21.0);

        assert!(build_grid(&bounds, 0, 4).is_empty());
    }
}
