//! # Route Suffer
//!
//! Wind and climb difficulty scoring for GPS routes.
//!
//! This library provides:
//! - Per-segment "suffer" scores from forecast headwind and terrain grade
//! - Deduplicated, bounded-concurrency wind forecast fetching
//! - Coordinate-keyed elevation caching
//! - Viewport wind grids projected into arrow features for rendering
//!
//! ## Features
//!
//! - **`http`** (default) - Open-Meteo providers for forecasts and elevation
//!
//! ## Quick Start
//!
//! ```rust
//! use route_suffer::{score_route, Coordinate, HourlyWindEntry, SamplePoint, ScoringConfig};
//!
//! let route = vec![Coordinate::new(-79.40, 43.65), Coordinate::new(-79.39, 43.66)];
//! let samples = vec![SamplePoint::new(43.655, -79.395)];
//! let series = vec![HourlyWindEntry::new("2030-01-01T12:00", 20.0, 45)];
//! let wind = vec![Some(series.as_slice())];
//!
//! let segments = score_route(&route, &samples, &wind, 0, &[], false, &ScoringConfig::default());
//! assert_eq!(segments.len(), 1);
//! assert_eq!(segments[0].stats.normalized_score, 1.0);
//! ```

use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{OptionExt, Result, SufferError};

// Configuration structs with defaults
pub mod config;
pub use config::{ArrowConfig, FetchConfig, GridConfig, ScoringConfig, SufferConfig};

// Geographic utilities (bearing, distance, offsets, cache keys)
pub mod geo_utils;
pub use geo_utils::{CoordKey, EdgeKey};

// Bounded-parallelism task runner
pub mod pool;
pub use pool::{PoolOutcome, PoolTask, TaskPool};

// Wind forecast cache with single-flight fetching
pub mod wind;
pub use wind::{
    ForecastHour, ForecastSeries, ForecastSource, HourlyWindEntry, SharedSeries, WindFetchService,
    WindStats,
};

// Elevation cache and terrain sources
pub mod elevation;
pub use elevation::{ElevationCache, ElevationSource, TerrainGrid};

// Route and viewport sampling
pub mod grid;
pub use grid::{build_grid, sample_points, GridPoint};

// Segment scoring
pub mod scoring;
pub use scoring::{score_route, summarize, RouteSummary, ScoredSegment, SegmentStats};

// Wind arrow features
pub mod arrows;
pub use arrows::{project_arrows, ArrowFeature};

// GeoJSON output for the rendering layer
pub mod geojson;

// Stateful controller wiring everything together
pub mod engine;
pub use engine::{EngineStats, SufferEngine};

// Open-Meteo HTTP providers
#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "http")]
pub use http::{OpenMeteoElevation, OpenMeteoForecast};

// ============================================================================
// Core Types
// ============================================================================

/// A route coordinate in WGS84 degrees, stored longitude first.
///
/// # Example
/// ```
/// use route_suffer::Coordinate;
/// let toronto = Coordinate::new(-79.3832, 43.6532);
/// assert_eq!(Coordinate::from([-79.3832, 43.6532]), toronto);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub longitude: f64,
    pub latitude: f64,
}

impl Coordinate {
    /// Create a coordinate from longitude and latitude.
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
        }
    }

    /// Check if the coordinate is finite and within WGS84 ranges.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }

    /// `[longitude, latitude]`, the GeoJSON position order.
    pub fn to_array(&self) -> [f64; 2] {
        [self.longitude, self.latitude]
    }
}

impl From<[f64; 2]> for Coordinate {
    fn from(lng_lat: [f64; 2]) -> Self {
        Self::new(lng_lat[0], lng_lat[1])
    }
}

/// Anchor point for a wind query, stored latitude first.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplePoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl SamplePoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

impl From<&Coordinate> for SamplePoint {
    fn from(coord: &Coordinate) -> Self {
        Self::new(coord.latitude, coord.longitude)
    }
}

/// Geographic bounding box, e.g. the visible map viewport.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    pub fn new(min_lat: f64, max_lat: f64, min_lng: f64, max_lng: f64) -> Self {
        Self {
            min_lat,
            max_lat,
            min_lng,
            max_lng,
        }
    }

    /// Create bounds enclosing the valid points of a route.
    ///
    /// Returns `None` when no point is valid.
    pub fn from_points(points: &[Coordinate]) -> Option<Self> {
        let mut valid = points.iter().filter(|p| p.is_valid()).peekable();
        valid.peek()?;

        let mut min_lat = f64::MAX;
        let mut max_lat = f64::MIN;
        let mut min_lng = f64::MAX;
        let mut max_lng = f64::MIN;

        for p in valid {
            min_lat = min_lat.min(p.latitude);
            max_lat = max_lat.max(p.latitude);
            min_lng = min_lng.min(p.longitude);
            max_lng = max_lng.max(p.longitude);
        }

        Some(Self {
            min_lat,
            max_lat,
            min_lng,
            max_lng,
        })
    }
}
