//! # Suffer Engine
//!
//! Stateful controller that owns the current route and view settings and
//! wires the fetch services, pool, scorer and projector together.
//!
//! ## Architecture
//!
//! The engine holds:
//! - The route and its wind sample points
//! - Selected forecast hour and the elevation toggle
//! - Terrain readiness and per-point route elevations
//! - Shared handles to the wind and elevation caches
//!
//! Nothing is recomputed implicitly. Callers change state with the
//! `set_*` methods, pull data with the `refresh_*` methods, and read
//! results with [`SufferEngine::score`] and [`SufferEngine::arrows`].
//! Scoring reads whatever the caches hold at that moment, so it can run
//! while fetches are still outstanding.

use std::sync::Arc;

use futures::FutureExt;
use log::{debug, info, warn};
use serde::Serialize;

use crate::elevation::{ElevationCache, ElevationSource};
use crate::geojson::{arrows_feature_collection, segments_feature_collection};
use crate::grid::{build_grid, sample_points, GridPoint};
use crate::pool::{PoolOutcome, PoolTask, TaskPool};
use crate::scoring::{score_route, summarize, RouteSummary, ScoredSegment};
use crate::wind::{ForecastSource, HourlyWindEntry, SharedSeries, WindFetchService, WindStats};
use crate::{project_arrows, ArrowFeature, Bounds, Coordinate, SamplePoint, SufferConfig};

/// Engine statistics for monitoring
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EngineStats {
    pub route_points: usize,
    pub sample_count: usize,
    pub cached_wind_keys: usize,
    pub cached_elevations: usize,
    pub elevation_queries: u64,
    pub wind: WindStats,
}

/// The route suffer controller.
pub struct SufferEngine {
    config: SufferConfig,
    wind: Arc<WindFetchService>,
    elevation: Arc<ElevationCache>,
    pool: TaskPool,

    route: Vec<Coordinate>,
    samples: Vec<SamplePoint>,
    elevations: Vec<f64>,

    hour_index: usize,
    include_elevation: bool,
    terrain_ready: bool,
}

impl SufferEngine {
    /// Create an engine over the given providers.
    pub fn new(
        forecasts: Arc<dyn ForecastSource>,
        elevations: Arc<dyn ElevationSource>,
        config: SufferConfig,
    ) -> Self {
        let wind = Arc::new(WindFetchService::with_config(forecasts, &config.fetch));
        let elevation = Arc::new(ElevationCache::with_precision(
            elevations,
            config.fetch.elevation_key_precision,
        ));
        Self::with_services(wind, elevation, config)
    }

    /// Create an engine over existing caches, e.g. shared with another view.
    pub fn with_services(
        wind: Arc<WindFetchService>,
        elevation: Arc<ElevationCache>,
        config: SufferConfig,
    ) -> Self {
        Self {
            pool: TaskPool::new(config.fetch.max_concurrency),
            config,
            wind,
            elevation,
            route: Vec::new(),
            samples: Vec::new(),
            elevations: Vec::new(),
            hour_index: 0,
            include_elevation: false,
            terrain_ready: false,
        }
    }

    /// Create an engine backed by the Open-Meteo HTTP providers.
    #[cfg(feature = "http")]
    pub fn open_meteo(config: SufferConfig) -> crate::Result<Self> {
        config.validate()?;
        let forecasts = Arc::new(crate::http::OpenMeteoForecast::new(&config.fetch)?);
        let elevations = Arc::new(crate::http::OpenMeteoElevation::new(&config.fetch)?);
        Ok(Self::new(forecasts, elevations, config))
    }

    // ========================================================================
    // State
    // ========================================================================

    /// Replace the route. Recomputes sample points and drops stale elevations.
    pub fn set_route(&mut self, route: Vec<Coordinate>) {
        let invalid = route.iter().filter(|c| !c.is_valid()).count();
        if invalid > 0 {
            warn!(
                "[SufferEngine] Route has {} invalid points; their segments score calm",
                invalid
            );
        }
        self.samples = sample_points(&route, self.config.grid.route_sample_count);
        self.route = route;
        self.elevations.clear();
        debug!(
            "[SufferEngine] Route set: {} points, {} samples",
            self.route.len(),
            self.samples.len()
        );
    }

    /// Replace the route from flat `[lng, lat, lng, lat, ...]` coordinates.
    pub fn set_route_flat(&mut self, flat_coords: &[f64]) {
        let route = flat_coords
            .chunks_exact(2)
            .map(|pair| Coordinate::new(pair[0], pair[1]))
            .collect();
        self.set_route(route);
    }

    pub fn clear_route(&mut self) {
        self.set_route(Vec::new());
    }

    pub fn route(&self) -> &[Coordinate] {
        &self.route
    }

    pub fn samples(&self) -> &[SamplePoint] {
        &self.samples
    }

    /// Bounds of the route's valid points.
    pub fn route_bounds(&self) -> Option<Bounds> {
        Bounds::from_points(&self.route)
    }

    pub fn set_hour(&mut self, hour_index: usize) {
        self.hour_index = hour_index;
    }

    pub fn hour_index(&self) -> usize {
        self.hour_index
    }

    pub fn set_include_elevation(&mut self, include: bool) {
        self.include_elevation = include;
    }

    pub fn include_elevation(&self) -> bool {
        self.include_elevation
    }

    /// Mark the terrain source usable. Elevations are only sampled and
    /// applied while this is set.
    pub fn set_terrain_ready(&mut self, ready: bool) {
        self.terrain_ready = ready;
    }

    pub fn terrain_ready(&self) -> bool {
        self.terrain_ready
    }

    pub fn config(&self) -> &SufferConfig {
        &self.config
    }

    pub fn wind_service(&self) -> &Arc<WindFetchService> {
        &self.wind
    }

    pub fn elevation_cache(&self) -> &Arc<ElevationCache> {
        &self.elevation
    }

    // ========================================================================
    // Fetching
    // ========================================================================

    /// Fetch forecasts for every route sample point through the pool.
    pub async fn refresh_route_wind(&self) -> PoolOutcome<()> {
        let points: Vec<(f64, f64)> = self
            .samples
            .iter()
            .map(|s| (s.latitude, s.longitude))
            .collect();
        let outcome = self.fetch_wind(&points).await;
        info!(
            "[SufferEngine] Route wind: {}/{} sample points fetched",
            outcome.succeeded,
            outcome.results.len()
        );
        outcome
    }

    /// Sample elevations for every route point.
    ///
    /// Returns false without sampling when terrain is not ready or the route
    /// is empty.
    pub async fn refresh_elevations(&mut self) -> bool {
        if !self.terrain_ready || self.route.is_empty() {
            debug!("[SufferEngine] Skipping elevation refresh (terrain not ready or no route)");
            return false;
        }
        let cache = Arc::clone(&self.elevation);
        self.elevations = cache.sample(&self.route).await;
        true
    }

    /// Build the viewport grid, fetch its forecasts, and return resolved points.
    ///
    /// Points whose fetch failed come back with `wind: None`.
    pub async fn refresh_grid(&self, bounds: &Bounds) -> Vec<GridPoint> {
        let mut grid = build_grid(bounds, self.config.grid.columns, self.config.grid.rows);
        let points: Vec<(f64, f64)> = grid.iter().map(|p| (p.latitude, p.longitude)).collect();
        let outcome = self.fetch_wind(&points).await;

        for point in &mut grid {
            point.wind = self.wind.cached(point.latitude, point.longitude);
        }
        info!(
            "[SufferEngine] Grid wind: {}/{} points resolved ({} failed fetches)",
            grid.iter().filter(|p| p.wind.is_some()).count(),
            grid.len(),
            outcome.failed
        );
        grid
    }

    /// Wind grid fitted to the route, empty when there is no valid route.
    pub async fn refresh_route_grid(&self) -> Vec<GridPoint> {
        match self.route_bounds() {
            Some(bounds) => self.refresh_grid(&bounds).await,
            None => Vec::new(),
        }
    }

    /// Run one fetch task per location, skipping ones already cached.
    async fn fetch_wind(&self, points: &[(f64, f64)]) -> PoolOutcome<()> {
        let tasks: Vec<PoolTask<()>> = points
            .iter()
            .filter(|(lat, lon)| self.wind.cached(*lat, *lon).is_none())
            .map(|&(lat, lon)| {
                let wind = Arc::clone(&self.wind);
                Box::new(move || async move { wind.fetch(lat, lon).await.map(|_| ()) }.boxed())
                    as PoolTask<()>
            })
            .collect();

        if tasks.len() < points.len() {
            debug!(
                "[SufferEngine] {} of {} locations already cached",
                points.len() - tasks.len(),
                points.len()
            );
        }
        self.pool.run(tasks).await
    }

    // ========================================================================
    // Results
    // ========================================================================

    fn sample_series(&self) -> Vec<Option<SharedSeries>> {
        self.samples
            .iter()
            .map(|s| self.wind.cached(s.latitude, s.longitude))
            .collect()
    }

    /// Score the route at the current hour from a snapshot of the caches.
    pub fn score(&self) -> Vec<ScoredSegment> {
        let series = self.sample_series();
        let wind: Vec<Option<&[HourlyWindEntry]>> = series
            .iter()
            .map(|s| s.as_deref().map(Vec::as_slice))
            .collect();

        let use_elevation = self.include_elevation && self.terrain_ready;
        let elevations: &[f64] = if use_elevation { &self.elevations } else { &[] };

        score_route(
            &self.route,
            &self.samples,
            &wind,
            self.hour_index,
            elevations,
            use_elevation,
            &self.config.scoring,
        )
    }

    pub fn summary(&self) -> RouteSummary {
        summarize(&self.score())
    }

    /// Project a resolved grid into arrows at the current hour.
    pub fn arrows(&self, grid: &[GridPoint]) -> Vec<ArrowFeature> {
        project_arrows(grid, self.hour_index, &self.config.arrows)
    }

    /// Longest forecast available across the route samples, for sizing an
    /// hour selector.
    pub fn hours_available(&self) -> usize {
        self.sample_series()
            .iter()
            .filter_map(|s| s.as_ref().map(|series| series.len()))
            .max()
            .unwrap_or(0)
    }

    /// Scored segments as a GeoJSON string.
    pub fn segments_geojson(&self) -> String {
        segments_feature_collection(&self.score()).to_string()
    }

    /// Arrows for `grid` as a GeoJSON string.
    pub fn arrows_geojson(&self, grid: &[GridPoint]) -> String {
        arrows_feature_collection(&self.arrows(grid)).to_string()
    }

    /// Route summary as JSON.
    pub fn summary_json(&self) -> String {
        serde_json::to_string(&self.summary()).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            route_points: self.route.len(),
            sample_count: self.samples.len(),
            cached_wind_keys: self.wind.cached_count(),
            cached_elevations: self.elevation.len(),
            elevation_queries: self.elevation.query_count(),
            wind: self.wind.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wind::{ForecastHour, ForecastSeries};
    use crate::Result;
    use chrono::NaiveDate;
    use futures::future::BoxFuture;

    struct SteadyWind {
        speed: f64,
        from: f64,
    }

    impl ForecastSource for SteadyWind {
        fn hourly_wind(&self, _lat: f64, _lon: f64) -> BoxFuture<'_, Result<ForecastSeries>> {
            let start = NaiveDate::from_ymd_opt(2099, 6, 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .unwrap();
            let hours = (0..30)
                .map(|h| ForecastHour {
                    time: start + chrono::Duration::hours(h),
                    speed_kmh: self.speed,
                    direction_deg: self.from,
                })
                .collect();
            async move {
                Ok(ForecastSeries {
                    utc_offset_seconds: 0,
                    hours,
                })
            }
            .boxed()
        }
    }

    struct Slope;

    impl ElevationSource for Slope {
        fn elevation(&self, lat: f64, _lon: f64) -> BoxFuture<'_, Result<Option<f64>>> {
            // 1 m per 0.0001° of latitude
            async move { Ok(Some((lat - 43.0) * 10_000.0)) }.boxed()
        }
    }

    fn engine() -> SufferEngine {
        SufferEngine::new(
            Arc::new(SteadyWind {
                speed: 20.0,
                from: 0.0,
            }),
            Arc::new(Slope),
            SufferConfig::default(),
        )
    }

    fn north_route() -> Vec<Coordinate> {
        (0..20)
            .map(|i| Coordinate::new(-79.40, 43.65 + i as f64 * 0.0005))
            .collect()
    }

    #[test]
    fn test_set_route_samples() {
        let mut engine = engine();
        engine.set_route(north_route());
        assert_eq!(engine.route().len(), 20);
        assert_eq!(engine.samples().len(), 10);

        engine.clear_route();
        assert!(engine.samples().is_empty());
        assert!(engine.score().is_empty());
    }

    #[test]
    fn test_set_route_flat() {
        let mut engine = engine();
        engine.set_route_flat(&[-79.40, 43.65, -79.40, 43.66, 1.0]);
        assert_eq!(engine.route(), &[
            Coordinate::new(-79.40, 43.65),
            Coordinate::new(-79.40, 43.66)
        ]);
    }

    #[test]
    fn test_score_before_fetch_is_calm() {
        let mut engine = engine();
        engine.set_route(north_route());
        let segments = engine.score();
        assert_eq!(segments.len(), 19);
        assert!(segments.iter().all(|s| s.stats.suffer_raw == 0.0));
    }

    #[tokio::test]
    async fn test_route_wind_then_score() {
        let mut engine = engine();
        engine.set_route(north_route());

        let outcome = engine.refresh_route_wind().await;
        assert!(outcome.is_complete());
        assert_eq!(engine.hours_available(), 24);

        // Riding north into a northerly: full headwind everywhere
        let segments = engine.score();
        for s in &segments {
            assert!((s.stats.headwind_raw - 20.0).abs() < 0.01);
            assert!((s.stats.normalized_score - 1.0).abs() < 1e-9);
        }

        // Second refresh is served from the cache
        let issued = engine.stats().wind.requests_issued;
        engine.refresh_route_wind().await;
        assert_eq!(engine.stats().wind.requests_issued, issued);
    }

    #[tokio::test]
    async fn test_elevation_requires_terrain_ready() {
        let mut engine = engine();
        engine.set_route(north_route());
        engine.set_include_elevation(true);

        assert!(!engine.refresh_elevations().await);
        assert_eq!(engine.stats().elevation_queries, 0);
        assert!(engine.score().iter().all(|s| s.stats.grade == 0.0));

        engine.set_terrain_ready(true);
        assert!(engine.refresh_elevations().await);
        let segments = engine.score();
        assert!(segments.iter().all(|s| s.stats.grade > 0.0));
        assert!(segments.iter().all(|s| s.stats.climb_penalty > 0.0));

        // Toggle off ignores elevations without dropping them
        engine.set_include_elevation(false);
        assert!(engine.score().iter().all(|s| s.stats.grade == 0.0));
    }

    #[tokio::test]
    async fn test_grid_and_arrows() {
        let engine = engine();
        let bounds = Bounds::new(43.0, 43.5, -80.0, -79.5);
        let grid = engine.refresh_grid(&bounds).await;

        assert_eq!(grid.len(), 48);
        assert!(grid.iter().all(|p| p.wind.is_some()));

        let arrows = engine.arrows(&grid);
        assert_eq!(arrows.len(), 48);
        assert!(arrows.iter().all(|a| a.rotation == 180.0));

        let json: serde_json::Value = serde_json::from_str(&engine.arrows_geojson(&grid)).unwrap();
        assert_eq!(json["features"].as_array().unwrap().len(), 48);
    }

    #[tokio::test]
    async fn test_route_grid_fits_route() {
        let mut engine = engine();
        assert!(engine.refresh_route_grid().await.is_empty());

        engine.set_route(north_route());
        let bounds = engine.route_bounds().unwrap();
        let grid = engine.refresh_route_grid().await;
        assert_eq!(grid.len(), 48);
        assert_eq!(grid[0].latitude, bounds.min_lat);
        assert!((grid[47].latitude - bounds.max_lat).abs() < 1e-9);
        assert!(grid.iter().all(|p| p.wind.is_some()));
    }

    #[tokio::test]
    async fn test_malformed_route_point_does_not_abort_scoring() {
        let mut engine = engine();
        let mut route = north_route();
        route[10] = Coordinate::new(f64::NAN, f64::NAN);
        engine.set_route(route);
        engine.set_include_elevation(true);
        engine.set_terrain_ready(true);

        engine.refresh_route_wind().await;
        assert!(engine.refresh_elevations().await);
        let segments = engine.score();

        assert_eq!(segments.len(), 19);
        assert_eq!(segments[9].stats.headwind_raw, 0.0);
        assert_eq!(segments[10].stats.headwind_raw, 0.0);
        assert!((segments[0].stats.headwind_raw - 20.0).abs() < 0.01);
        assert_eq!(engine.stats().route_points, 20);
    }

    #[tokio::test]
    async fn test_summary_json() {
        let mut engine = engine();
        engine.set_route(north_route());
        engine.refresh_route_wind().await;

        let summary: serde_json::Value = serde_json::from_str(&engine.summary_json()).unwrap();
        assert_eq!(summary["segment_count"], 19);
        assert!(summary["total_distance_m"].as_f64().unwrap() > 1000.0);
    }
}
