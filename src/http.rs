//! HTTP providers for the Open-Meteo forecast and elevation APIs.
//!
//! Both clients share one request loop:
//! - Connection pooling across the many small per-point requests
//! - Per-request timeout
//! - Retry with exponential backoff on 429, 5xx and transport errors
//! - Any other non-2xx status fails immediately

use futures::future::BoxFuture;
use futures::FutureExt;
use log::{debug, warn};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

use crate::elevation::ElevationSource;
use crate::error::{OptionExt, Result, SufferError};
use crate::wind::{ForecastHour, ForecastSeries, ForecastSource, TIMESTAMP_FORMAT};
use crate::FetchConfig;
use chrono::NaiveDateTime;

/// API response for the hourly forecast endpoint
#[derive(Debug, Deserialize)]
struct ForecastResponse {
    #[serde(default)]
    utc_offset_seconds: i32,
    hourly: Option<HourlyBlock>,
}

#[derive(Debug, Deserialize)]
struct HourlyBlock {
    time: Vec<String>,
    wind_speed_10m: Vec<Option<f64>>,
    wind_direction_10m: Vec<Option<f64>>,
}

/// API response for the elevation endpoint
#[derive(Debug, Deserialize)]
struct ElevationResponse {
    elevation: Option<Vec<Option<f64>>>,
}

fn build_client(config: &FetchConfig) -> Result<Client> {
    Client::builder()
        .pool_max_idle_per_host(config.max_concurrency)
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .build()
        .map_err(|e| SufferError::config(format!("Failed to create HTTP client: {}", e)))
}

fn point_url(base: &str, latitude: f64, longitude: f64) -> String {
    let separator = if base.contains('?') { "&" } else { "?" };
    format!(
        "{}{}latitude={:.5}&longitude={:.5}",
        base, separator, latitude, longitude
    )
}

/// GET `url` and decode JSON, retrying errors that [`SufferError::is_retryable`]
/// accepts (429, 5xx and transport failures).
async fn get_json<T: DeserializeOwned>(client: &Client, url: &str, max_retries: u32) -> Result<T> {
    let mut retries = 0;

    loop {
        let error = match client.get(url).send().await {
            Ok(resp) if resp.status().is_success() => {
                return resp.json::<T>().await.map_err(|e| SufferError::Parse {
                    message: e.to_string(),
                });
            }
            Ok(resp) => {
                let status = resp.status();
                SufferError::http(format!("HTTP {}", status), Some(status.as_u16()))
            }
            Err(e) => SufferError::http(format!("Request error: {}", e), None),
        };

        if !error.is_retryable() {
            return Err(error);
        }
        retries += 1;
        if retries > max_retries {
            warn!("[OpenMeteo] Giving up on {} after {} retries", url, max_retries);
            return Err(error);
        }

        let backoff = retry_backoff(&error, retries);
        warn!(
            "[OpenMeteo] {} for {}, retry {} after {:?}",
            error, url, retries, backoff
        );
        tokio::time::sleep(backoff).await;
    }
}

/// Rate limits back off from 1s, everything else from 500ms, doubling each
/// retry up to 16x.
fn retry_backoff(error: &SufferError, retries: u32) -> Duration {
    let base_ms = match error {
        SufferError::Http {
            status_code: Some(429),
            ..
        } => 1000,
        _ => 500,
    };
    Duration::from_millis(base_ms * (1 << (retries - 1).min(4)))
}

/// Hourly 10 m wind forecasts from Open-Meteo.
pub struct OpenMeteoForecast {
    client: Client,
    base_url: String,
    forecast_days: u32,
    max_retries: u32,
}

impl OpenMeteoForecast {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config)?,
            base_url: config.forecast_url.clone(),
            forecast_days: config.forecast_days,
            max_retries: config.max_retries,
        })
    }

    fn url(&self, latitude: f64, longitude: f64) -> String {
        format!(
            "{}&hourly=wind_speed_10m,wind_direction_10m&wind_speed_unit=kmh&timezone=auto&forecast_days={}",
            point_url(&self.base_url, latitude, longitude),
            self.forecast_days
        )
    }

    async fn fetch_series(&self, latitude: f64, longitude: f64) -> Result<ForecastSeries> {
        let url = self.url(latitude, longitude);
        debug!("[OpenMeteo] Forecast request {}", url);
        let response: ForecastResponse = get_json(&self.client, &url, self.max_retries).await?;
        parse_forecast(response)
    }
}

fn parse_forecast(response: ForecastResponse) -> Result<ForecastSeries> {
    let hourly = response.hourly.ok_or_missing("hourly")?;

    let mut hours = Vec::with_capacity(hourly.time.len());
    for ((time, speed), direction) in hourly
        .time
        .iter()
        .zip(&hourly.wind_speed_10m)
        .zip(&hourly.wind_direction_10m)
    {
        // Provider leaves gaps as null; drop those hours
        let (Some(speed_kmh), Some(direction_deg)) = (*speed, *direction) else {
            continue;
        };
        let time = NaiveDateTime::parse_from_str(time, TIMESTAMP_FORMAT).map_err(|e| {
            SufferError::Parse {
                message: format!("bad forecast time '{}': {}", time, e),
            }
        })?;
        hours.push(ForecastHour {
            time,
            speed_kmh,
            direction_deg,
        });
    }

    Ok(ForecastSeries {
        utc_offset_seconds: response.utc_offset_seconds,
        hours,
    })
}

impl ForecastSource for OpenMeteoForecast {
    fn hourly_wind(&self, latitude: f64, longitude: f64) -> BoxFuture<'_, Result<ForecastSeries>> {
        self.fetch_series(latitude, longitude).boxed()
    }
}

/// Point elevations from the Open-Meteo elevation API.
pub struct OpenMeteoElevation {
    client: Client,
    base_url: String,
    max_retries: u32,
}

impl OpenMeteoElevation {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config)?,
            base_url: config.elevation_url.clone(),
            max_retries: config.max_retries,
        })
    }

    async fn fetch_elevation(&self, latitude: f64, longitude: f64) -> Result<Option<f64>> {
        let url = point_url(&self.base_url, latitude, longitude);
        let response: ElevationResponse = get_json(&self.client, &url, self.max_retries).await?;
        Ok(response
            .elevation
            .and_then(|values| values.into_iter().next().flatten())
            .filter(|v| v.is_finite()))
    }
}

impl ElevationSource for OpenMeteoElevation {
    fn elevation(&self, latitude: f64, longitude: f64) -> BoxFuture<'_, Result<Option<f64>>> {
        self.fetch_elevation(latitude, longitude).boxed()
    }
}
