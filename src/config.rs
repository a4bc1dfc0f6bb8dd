//! Configuration for scoring, fetching, grid sampling and arrow rendering.
//!
//! Every struct has documented defaults and deserializes with missing fields
//! filled from `Default`, so hosts can supply partial JSON.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SufferError};

/// Configuration for the segment scoring model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Suffer points per unit of positive grade.
    /// Default: 80.0 (a 10% climb weighs like an 8 km/h headwind)
    pub climb_penalty_factor: f64,

    /// Absolute grade clamp, as a fraction.
    /// Default: 0.2 (±20%)
    pub max_grade: f64,

    /// Segments shorter than this (meters) get no grade.
    /// Default: 0.1
    pub min_segment_distance: f64,

    /// Lateral offset applied to edges the route traverses more than once (meters).
    /// Default: 5.0
    pub overlap_offset_m: f64,

    /// Floor for the normalization divisor.
    /// Default: 1e-6
    pub normalize_epsilon: f64,

    /// Decimal places used when building undirected edge keys.
    /// Default: 5 (~1 m)
    pub edge_key_precision: u32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            climb_penalty_factor: 80.0,
            max_grade: 0.2,
            min_segment_distance: 0.1,
            overlap_offset_m: 5.0,
            normalize_epsilon: 1e-6,
            edge_key_precision: 5,
        }
    }
}

/// Configuration for forecast and elevation acquisition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Hourly forecast endpoint.
    /// Default: Open-Meteo forecast API
    pub forecast_url: String,

    /// Point elevation endpoint.
    /// Default: Open-Meteo elevation API
    pub elevation_url: String,

    /// Maximum forecast requests in flight at once.
    /// Default: 6
    pub max_concurrency: usize,

    /// Per-request timeout in seconds.
    /// Default: 15
    pub request_timeout_secs: u64,

    /// Retries on 429 or transport errors before giving up.
    /// Default: 3
    pub max_retries: u32,

    /// Number of future hourly entries kept per coordinate.
    /// Default: 24
    pub max_forecast_hours: usize,

    /// Days of forecast requested from the provider.
    /// Default: 2
    pub forecast_days: u32,

    /// Decimal places for wind cache keys.
    /// Default: 4 (~11 m)
    pub wind_key_precision: u32,

    /// Decimal places for elevation cache keys.
    /// Default: 5 (~1 m)
    pub elevation_key_precision: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            forecast_url: "https://api.open-meteo.com/v1/forecast".to_string(),
            elevation_url: "https://api.open-meteo.com/v1/elevation".to_string(),
            max_concurrency: 6,
            request_timeout_secs: 15,
            max_retries: 3,
            max_forecast_hours: 24,
            forecast_days: 2,
            wind_key_precision: 4,
            elevation_key_precision: 5,
        }
    }
}

/// Configuration for wind sampling along the route and across the viewport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Viewport grid columns.
    /// Default: 8
    pub columns: usize,

    /// Viewport grid rows.
    /// Default: 6
    pub rows: usize,

    /// Wind sample points taken along a route.
    /// Default: 10
    pub route_sample_count: usize,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            columns: 8,
            rows: 6,
            route_sample_count: 10,
        }
    }
}

/// Configuration for wind arrow features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArrowConfig {
    /// Icon scale for calm wind.
    /// Default: 0.5
    pub min_size: f64,

    /// Icon scale at or above `full_size_speed_kmh`.
    /// Default: 1.5
    pub max_size: f64,

    /// Wind speed mapped to `max_size` (km/h).
    /// Default: 40.0
    pub full_size_speed_kmh: f64,
}

impl Default for ArrowConfig {
    fn default() -> Self {
        Self {
            min_size: 0.5,
            max_size: 1.5,
            full_size_speed_kmh: 40.0,
        }
    }
}

/// Complete configuration for a [`crate::SufferEngine`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SufferConfig {
    pub scoring: ScoringConfig,
    pub fetch: FetchConfig,
    pub grid: GridConfig,
    pub arrows: ArrowConfig,
}

impl SufferConfig {
    /// Parse a (possibly partial) JSON configuration and validate it.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: SufferConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the scoring and fetch layers cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.fetch.max_concurrency == 0 {
            return Err(SufferError::config("fetch.max_concurrency must be > 0"));
        }
        if self.fetch.max_forecast_hours == 0 {
            return Err(SufferError::config("fetch.max_forecast_hours must be > 0"));
        }
        if !(self.scoring.max_grade > 0.0) {
            return Err(SufferError::config("scoring.max_grade must be > 0"));
        }
        if !(self.scoring.normalize_epsilon > 0.0) {
            return Err(SufferError::config("scoring.normalize_epsilon must be > 0"));
        }
        if self.scoring.climb_penalty_factor < 0.0 {
            return Err(SufferError::config(
                "scoring.climb_penalty_factor must not be negative",
            ));
        }
        if self.arrows.max_size < self.arrows.min_size {
            return Err(SufferError::config("arrows.max_size must be >= min_size"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(SufferConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config = SufferConfig::from_json(r#"{"fetch": {"max_concurrency": 2}}"#).unwrap();
        assert_eq!(config.fetch.max_concurrency, 2);
        assert_eq!(config.fetch.max_forecast_hours, 24);
        assert_eq!(config.scoring, ScoringConfig::default());
    }

    #[test]
    fn test_invalid_json_rejected() {
        let err = SufferConfig::from_json(r#"{"fetch": {"max_concurrency": 0}}"#).unwrap_err();
        assert!(matches!(err, SufferError::Config { .. }));

        let err = SufferConfig::from_json("not json").unwrap_err();
        assert!(matches!(err, SufferError::Parse { .. }));
    }
}
