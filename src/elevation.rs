//! Elevation sampling with a coordinate-keyed cache.
//!
//! Each route point is looked up by its coordinate rounded to five decimals
//! (~1 m). Misses go to the [`ElevationSource`]; an unavailable result is
//! memoized as 0 m so wind-only scoring keeps working when terrain data is
//! missing. Provider errors also yield 0 m but are not memoized, so the point
//! is queried again on the next call.
//!
//! The cache does not track whether the terrain behind the source is ready;
//! callers should hold off sampling until it is.

use futures::future::BoxFuture;
use futures::FutureExt;
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{Result, SufferError};
use crate::geo_utils::CoordKey;
use crate::Coordinate;

/// Single-point elevation query.
pub trait ElevationSource: Send + Sync {
    /// Elevation in meters, or `None` when the terrain has no value here.
    fn elevation(&self, latitude: f64, longitude: f64) -> BoxFuture<'_, Result<Option<f64>>>;
}

/// Process-lifetime elevation cache over an [`ElevationSource`].
pub struct ElevationCache {
    source: Arc<dyn ElevationSource>,
    cache: Mutex<HashMap<CoordKey, f64>>,
    key_precision: u32,
    queries: AtomicU64,
}

impl ElevationCache {
    /// Create a cache keyed at five decimal places.
    pub fn new(source: Arc<dyn ElevationSource>) -> Self {
        Self::with_precision(source, 5)
    }

    pub fn with_precision(source: Arc<dyn ElevationSource>, key_precision: u32) -> Self {
        Self {
            source,
            cache: Mutex::new(HashMap::new()),
            key_precision,
            queries: AtomicU64::new(0),
        }
    }

    /// One elevation per route point, same length and order as `route`.
    pub async fn sample(&self, route: &[Coordinate]) -> Vec<f64> {
        let mut elevations = Vec::with_capacity(route.len());
        for coord in route {
            elevations.push(self.sample_point(coord).await);
        }
        elevations
    }

    /// Elevation for a single coordinate, querying the source on a miss.
    ///
    /// Invalid coordinates read as 0 m without a query.
    pub async fn sample_point(&self, coord: &Coordinate) -> f64 {
        if !coord.is_valid() {
            debug!("[Elevation] Skipping invalid coordinate {:?}", coord);
            return 0.0;
        }
        let key = CoordKey::from_coordinate(coord, self.key_precision);
        let cached = self.lock().get(&key).copied();
        if let Some(meters) = cached {
            return meters;
        }

        self.queries.fetch_add(1, Ordering::Relaxed);
        match self.source.elevation(key.latitude(), key.longitude()).await {
            Ok(value) => {
                let meters = value.filter(|v| v.is_finite()).unwrap_or(0.0);
                if value.is_none() {
                    debug!("[Elevation] No terrain value at {}, using 0 m", key);
                }
                // First write wins; a concurrent sampler may have filled it already
                *self.lock().entry(key).or_insert(meters)
            }
            Err(e) => {
                warn!("[Elevation] Query failed at {}: {}", key, e);
                0.0
            }
        }
    }

    /// Cached elevation for a coordinate without querying.
    pub fn cached(&self, coord: &Coordinate) -> Option<f64> {
        let key = CoordKey::from_coordinate(coord, self.key_precision);
        self.lock().get(&key).copied()
    }

    /// Number of cached coordinate keys.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Source queries issued so far.
    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CoordKey, f64>> {
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// In-memory digital elevation model on a regular lat/lon lattice.
///
/// Values are bilinearly interpolated. Points outside the lattice have no
/// elevation.
#[derive(Debug, Clone)]
pub struct TerrainGrid {
    min_lat: f64,
    min_lng: f64,
    lat_step_deg: f64,
    lng_step_deg: f64,
    rows: usize,
    cols: usize,
    elevations_m: Vec<f64>,
}

impl TerrainGrid {
    /// Build a grid from row-major elevations, row 0 at `min_lat`.
    pub fn new(
        min_lat: f64,
        min_lng: f64,
        lat_step_deg: f64,
        lng_step_deg: f64,
        rows: usize,
        cols: usize,
        elevations_m: Vec<f64>,
    ) -> Result<Self> {
        if rows < 2 || cols < 2 {
            return Err(SufferError::config("terrain grid needs at least 2x2 samples"));
        }
        if elevations_m.len() != rows * cols {
            return Err(SufferError::config(format!(
                "terrain grid expects {} samples, got {}",
                rows * cols,
                elevations_m.len()
            )));
        }
        if !(lat_step_deg > 0.0 && lng_step_deg > 0.0) {
            return Err(SufferError::config("terrain grid steps must be positive"));
        }
        Ok(Self {
            min_lat,
            min_lng,
            lat_step_deg,
            lng_step_deg,
            rows,
            cols,
            elevations_m,
        })
    }

    /// Interpolated elevation, or `None` outside the grid.
    pub fn sample(&self, lat: f64, lng: f64) -> Option<f64> {
        let y = (lat - self.min_lat) / self.lat_step_deg;
        let x = (lng - self.min_lng) / self.lng_step_deg;
        let max_y = (self.rows - 1) as f64;
        let max_x = (self.cols - 1) as f64;
        if !(0.0..=max_y).contains(&y) || !(0.0..=max_x).contains(&x) {
            return None;
        }

        let y0 = y.floor() as usize;
        let x0 = x.floor() as usize;
        let y1 = (y0 + 1).min(self.rows - 1);
        let x1 = (x0 + 1).min(self.cols - 1);
        let dy = y - y0 as f64;
        let dx = x - x0 as f64;

        let v00 = self.value_at(y0, x0);
        let v10 = self.value_at(y0, x1);
        let v01 = self.value_at(y1, x0);
        let v11 = self.value_at(y1, x1);

        let v0 = v00 + (v10 - v00) * dx;
        let v1 = v01 + (v11 - v01) * dx;
        Some(v0 + (v1 - v0) * dy)
    }

    fn value_at(&self, row: usize, col: usize) -> f64 {
        self.elevations_m[row * self.cols + col]
    }
}

impl ElevationSource for TerrainGrid {
    fn elevation(&self, latitude: f64, longitude: f64) -> BoxFuture<'_, Result<Option<f64>>> {
        let value = self.sample(latitude, longitude);
        async move { Ok(value) }.boxed()
    }
}
