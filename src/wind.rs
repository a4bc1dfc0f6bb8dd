//! Wind forecast cache with single-flight fetching.
//!
//! Forecasts are cached per coordinate rounded to four decimals. The first
//! caller for a key issues the provider request; every caller that arrives
//! while it is in flight subscribes to the same broadcast and receives the
//! same result, success or failure. Successful series are written once and
//! never refreshed. Failed keys stay retryable.
//!
//! ```text
//! fetch(a) ─┐                    ┌─► cache[key] = series
//! fetch(b) ─┼─► in_flight[key] ──┤
//! fetch(c) ─┘   (one request)    └─► broadcast to a, b, c
//! ```

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use futures::future::BoxFuture;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

use crate::error::{Result, SufferError};
use crate::geo_utils::CoordKey;
use crate::FetchConfig;

/// Timestamp format used for location-local forecast hours.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M";

/// One hour of provider output before filtering and rounding.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastHour {
    /// Location-local wall-clock time
    pub time: NaiveDateTime,
    pub speed_kmh: f64,
    /// Direction the wind blows from, degrees
    pub direction_deg: f64,
}

/// Raw hourly forecast for one location.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ForecastSeries {
    /// Offset of the local times from UTC
    pub utc_offset_seconds: i32,
    pub hours: Vec<ForecastHour>,
}

/// A single cached forecast hour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyWindEntry {
    /// Location-local time, `YYYY-MM-DDTHH:MM`
    pub timestamp: String,
    /// km/h, one decimal
    pub speed_kmh: f64,
    /// Meteorological "from" direction, whole degrees in [0, 360)
    pub direction_deg: u16,
}

impl HourlyWindEntry {
    pub fn new(timestamp: impl Into<String>, speed_kmh: f64, direction_deg: u16) -> Self {
        Self {
            timestamp: timestamp.into(),
            speed_kmh,
            direction_deg: direction_deg % 360,
        }
    }

    fn from_hour(hour: &ForecastHour) -> Self {
        Self {
            timestamp: hour.time.format(TIMESTAMP_FORMAT).to_string(),
            speed_kmh: (hour.speed_kmh * 10.0).round() / 10.0,
            direction_deg: (hour.direction_deg.round() as i64).rem_euclid(360) as u16,
        }
    }
}

/// Provider of hourly wind forecasts.
pub trait ForecastSource: Send + Sync {
    /// Fetch the hourly wind series for a location.
    fn hourly_wind(&self, latitude: f64, longitude: f64) -> BoxFuture<'_, Result<ForecastSeries>>;
}

/// Keep hours at or after `now`, rounded, capped at `max_hours`.
///
/// Hours with non-finite speed or direction are dropped.
pub fn future_entries(
    series: &ForecastSeries,
    now: DateTime<Utc>,
    max_hours: usize,
) -> Vec<HourlyWindEntry> {
    let offset = TimeDelta::seconds(series.utc_offset_seconds as i64);
    series
        .hours
        .iter()
        .filter(|h| h.speed_kmh.is_finite() && h.direction_deg.is_finite())
        .filter(|h| (h.time - offset).and_utc() >= now)
        .take(max_hours)
        .map(HourlyWindEntry::from_hour)
        .collect()
}

/// Immutable forecast series shared between the cache and callers.
pub type SharedSeries = Arc<Vec<HourlyWindEntry>>;
type FetchOutcome = std::result::Result<SharedSeries, SufferError>;

#[derive(Default)]
struct WindState {
    cache: HashMap<CoordKey, SharedSeries>,
    in_flight: HashMap<CoordKey, broadcast::Sender<FetchOutcome>>,
}

enum Claim {
    Cached(SharedSeries),
    Wait(broadcast::Receiver<FetchOutcome>),
    Lead(broadcast::Sender<FetchOutcome>),
}

/// Counters for monitoring cache and coalescing effectiveness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WindStats {
    /// Provider requests actually issued
    pub requests_issued: u64,
    /// Calls that waited on another caller's request
    pub coalesced: u64,
    /// Calls answered from the cache
    pub cache_hits: u64,
    /// Provider requests that failed
    pub failures: u64,
}

/// Process-lifetime wind forecast cache over a [`ForecastSource`].
pub struct WindFetchService {
    source: Arc<dyn ForecastSource>,
    state: Mutex<WindState>,
    key_precision: u32,
    max_hours: usize,
    requests_issued: AtomicU64,
    coalesced: AtomicU64,
    cache_hits: AtomicU64,
    failures: AtomicU64,
}

impl WindFetchService {
    /// Create a service with default precision (4 decimals) and 24 kept hours.
    pub fn new(source: Arc<dyn ForecastSource>) -> Self {
        Self::with_config(source, &FetchConfig::default())
    }

    pub fn with_config(source: Arc<dyn ForecastSource>, config: &FetchConfig) -> Self {
        Self {
            source,
            state: Mutex::new(WindState::default()),
            key_precision: config.wind_key_precision,
            max_hours: config.max_forecast_hours,
            requests_issued: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Cache key for a location.
    pub fn key(&self, latitude: f64, longitude: f64) -> CoordKey {
        CoordKey::new(latitude, longitude, self.key_precision)
    }

    /// Fetch the future hourly series for a location.
    ///
    /// Concurrent calls that round to the same key share one provider request.
    /// Non-finite coordinates are rejected without touching the provider.
    pub async fn fetch(&self, latitude: f64, longitude: f64) -> Result<SharedSeries> {
        let key = self.key(latitude, longitude);
        if !key.is_finite() {
            return Err(SufferError::InvalidCoordinate {
                latitude,
                longitude,
            });
        }

        match self.claim(key) {
            Claim::Cached(series) => Ok(series),
            Claim::Wait(mut rx) => match rx.recv().await {
                Ok(outcome) => outcome,
                Err(_) => Err(SufferError::Abandoned {
                    key: key.to_string(),
                }),
            },
            Claim::Lead(tx) => {
                let mut flight = InFlight {
                    service: self,
                    key,
                    sender: Some(tx),
                };
                self.requests_issued.fetch_add(1, Ordering::Relaxed);

                let outcome = self
                    .source
                    .hourly_wind(key.latitude(), key.longitude())
                    .await
                    .map(|series| Arc::new(future_entries(&series, Utc::now(), self.max_hours)));

                flight.complete(outcome.clone());
                outcome
            }
        }
    }

    /// Cached series for a location without fetching.
    pub fn cached(&self, latitude: f64, longitude: f64) -> Option<SharedSeries> {
        let key = self.key(latitude, longitude);
        self.lock().cache.get(&key).cloned()
    }

    /// Number of cached coordinate keys.
    pub fn cached_count(&self) -> usize {
        self.lock().cache.len()
    }

    /// Number of requests currently in flight.
    pub fn in_flight_count(&self) -> usize {
        self.lock().in_flight.len()
    }

    pub fn stats(&self) -> WindStats {
        WindStats {
            requests_issued: self.requests_issued.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WindState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn claim(&self, key: CoordKey) -> Claim {
        let mut state = self.lock();

        if let Some(series) = state.cache.get(&key) {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Claim::Cached(Arc::clone(series));
        }

        if let Some(tx) = state.in_flight.get(&key) {
            self.coalesced.fetch_add(1, Ordering::Relaxed);
            debug!("[WindFetch] Coalescing {} onto in-flight request", key);
            return Claim::Wait(tx.subscribe());
        }

        let (tx, _rx) = broadcast::channel(1);
        state.in_flight.insert(key, tx.clone());
        debug!(
            "[WindFetch] New request for {} ({} in flight)",
            key,
            state.in_flight.len()
        );
        Claim::Lead(tx)
    }
}

/// Leader's handle on an in-flight key.
///
/// Dropped without completing (the leader's future was cancelled) it clears
/// the key, which closes the channel and releases every waiter.
struct InFlight<'a> {
    service: &'a WindFetchService,
    key: CoordKey,
    sender: Option<broadcast::Sender<FetchOutcome>>,
}

impl InFlight<'_> {
    fn complete(&mut self, outcome: FetchOutcome) {
        let Some(tx) = self.sender.take() else {
            return;
        };

        {
            let mut state = self.service.lock();
            match &outcome {
                Ok(series) => {
                    state.cache.insert(self.key, Arc::clone(series));
                    debug!(
                        "[WindFetch] Cached {} hours for {}",
                        series.len(),
                        self.key
                    );
                }
                Err(e) => {
                    self.service.failures.fetch_add(1, Ordering::Relaxed);
                    warn!("[WindFetch] Fetch failed for {}: {}", self.key, e);
                }
            }
            state.in_flight.remove(&self.key);
        }

        // No receivers is fine: nobody else asked for this key
        let _ = tx.send(outcome);
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.sender.take().is_some() {
            warn!("[WindFetch] Request for {} abandoned", self.key);
            self.service.lock().in_flight.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::Duration;

    struct MockSource {
        calls: AtomicUsize,
        fail: AtomicBool,
        delay: Duration,
    }

    impl MockSource {
        fn new(delay_ms: u64) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                delay: Duration::from_millis(delay_ms),
            })
        }
    }

    fn far_future_series(hours: usize) -> ForecastSeries {
        let start = NaiveDateTime::parse_from_str("2099-06-01T00:00", TIMESTAMP_FORMAT).unwrap();
        ForecastSeries {
            utc_offset_seconds: 0,
            hours: (0..hours)
                .map(|h| ForecastHour {
                    time: start + TimeDelta::hours(h as i64),
                    speed_kmh: 12.34,
                    direction_deg: 359.6,
                })
                .collect(),
        }
    }

    impl ForecastSource for MockSource {
        fn hourly_wind(&self, _lat: f64, _lon: f64) -> BoxFuture<'_, Result<ForecastSeries>> {
            async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(self.delay).await;
                if self.fail.load(Ordering::SeqCst) {
                    Err(SufferError::http("unavailable", Some(503)))
                } else {
                    Ok(far_future_series(48))
                }
            }
            .boxed()
        }
    }

    #[test]
    fn test_future_entries_filters_and_truncates() {
        let now = NaiveDateTime::parse_from_str("2024-05-01T10:30", TIMESTAMP_FORMAT)
            .unwrap()
            .and_utc();
        let start = NaiveDateTime::parse_from_str("2024-05-01T00:00", TIMESTAMP_FORMAT).unwrap();
        let series = ForecastSeries {
            utc_offset_seconds: 0,
            hours: (0..48)
                .map(|h| ForecastHour {
                    time: start + TimeDelta::hours(h),
                    speed_kmh: 10.06,
                    direction_deg: 90.4,
                })
                .collect(),
        };

        let entries = future_entries(&series, now, 24);
        assert_eq!(entries.len(), 24);
        assert_eq!(entries[0].timestamp, "2024-05-01T11:00");
        assert_eq!(entries[0].speed_kmh, 10.1);
        assert_eq!(entries[0].direction_deg, 90);
    }

    #[test]
    fn test_future_entries_respects_utc_offset() {
        // 12:00 local at UTC-4 is 16:00 UTC
        let now = NaiveDateTime::parse_from_str("2024-05-01T15:30", TIMESTAMP_FORMAT)
            .unwrap()
            .and_utc();
        let series = ForecastSeries {
            utc_offset_seconds: -4 * 3600,
            hours: vec![
                ForecastHour {
                    time: NaiveDateTime::parse_from_str("2024-05-01T11:00", TIMESTAMP_FORMAT)
                        .unwrap(),
                    speed_kmh: 5.0,
                    direction_deg: 0.0,
                },
                ForecastHour {
                    time: NaiveDateTime::parse_from_str("2024-05-01T12:00", TIMESTAMP_FORMAT)
                        .unwrap(),
                    speed_kmh: 6.0,
                    direction_deg: 0.0,
                },
            ],
        };

        let entries = future_entries(&series, now, 24);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].timestamp, "2024-05-01T12:00");
    }

    #[test]
    fn test_direction_wraps_to_zero() {
        let entries = future_entries(&far_future_series(1), Utc::now(), 24);
        assert_eq!(entries[0].direction_deg, 0);
        assert_eq!(entries[0].speed_kmh, 12.3);
    }

    #[tokio::test]
    async fn test_concurrent_same_key_single_request() {
        let source = MockSource::new(20);
        let service = WindFetchService::new(source.clone());

        // Both round to 43.6500,-79.4000
        let (a, b) = tokio::join!(
            service.fetch(43.650_01, -79.400_04),
            service.fetch(43.649_99, -79.399_96)
        );

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        let a = a.unwrap();
        let b = b.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.len(), 24);
        assert_eq!(service.stats().coalesced, 1);
        assert_eq!(service.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_cached_series_is_reused() {
        let source = MockSource::new(1);
        let service = WindFetchService::new(source.clone());

        let first = service.fetch(43.65, -79.40).await.unwrap();
        let second = service.fetch(43.65, -79.40).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(service.stats().cache_hits, 1);
        assert!(service.cached(43.650_02, -79.4).is_some());
        assert!(service.cached(44.0, -79.4).is_none());
    }

    #[tokio::test]
    async fn test_non_finite_location_is_rejected() {
        let source = MockSource::new(1);
        let service = WindFetchService::new(source.clone());
        service.fetch(0.0, 0.0).await.unwrap();

        let result = service.fetch(f64::NAN, f64::NAN).await;
        assert!(matches!(result, Err(SufferError::InvalidCoordinate { .. })));
        assert!(service.cached(f64::NAN, f64::NAN).is_none());
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(service.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_failure_reaches_all_waiters_and_allows_retry() {
        let source = MockSource::new(20);
        source.fail.store(true, Ordering::SeqCst);
        let service = WindFetchService::new(source.clone());

        let (a, b) = tokio::join!(service.fetch(10.0, 10.0), service.fetch(10.0, 10.0));
        assert!(matches!(a, Err(SufferError::Http { status_code: Some(503), .. })));
        assert!(matches!(b, Err(SufferError::Http { status_code: Some(503), .. })));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(service.cached_count(), 0);
        assert_eq!(service.in_flight_count(), 0);

        source.fail.store(false, Ordering::SeqCst);
        let retry = service.fetch(10.0, 10.0).await;
        assert!(retry.is_ok());
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(service.stats().failures, 1);
    }

    #[tokio::test]
    async fn test_abandoned_leader_releases_waiters() {
        let source = MockSource::new(500);
        let service = Arc::new(WindFetchService::new(source.clone()));

        let leader = {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.fetch(1.0, 1.0).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let waiter = {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.fetch(1.0, 1.0).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        leader.abort();
        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(SufferError::Abandoned { .. })));
        assert_eq!(service.in_flight_count(), 0);
    }
}
