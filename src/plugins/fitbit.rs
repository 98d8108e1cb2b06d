use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate, TimeDelta};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;

use crate::{
    bus::BusClient,
    collector::{
        cadence::{CadenceTable, Rule},
        executor,
    },
    schema::Reading,
    util,
};

use super::{
    contract::{Collector, PluginInfo},
    error::PluginError,
    settings::SettingsStore,
};

const API_BASE: &str = "https://api.fitbit.com/1/user/-/";
const TOKEN_URL: &str = "https://api.fitbit.com/oauth2/token";

/// Days of history requested per run.
const LOOKBACK_DAYS: i64 = 7;

/// The API answers 429 without a usable retry-after; the hourly
/// quota resets on the hour.
const RATE_LIMIT_PAUSE_SECS: i64 = 3610;

/// (measurement, series) pairs fetched every run. The resource path
/// is `<measurement>/<series>`.
const SERIES: &[(&str, &str)] = &[
    ("activities", "distance"),
    ("activities", "elevation"),
    ("activities", "floors"),
    ("activities", "steps"),
];

/// Fitbit activity collector
///
/// SETTINGS (config.json):
/// - client_id      OAuth application id
/// - client_secret  OAuth application secret
/// - access_token   current bearer token
/// - refresh_token  current refresh token
///
/// ACCESS TOKENS:
/// - Expire after a few hours; a 401 triggers one refresh per request
/// - Fitbit rotates the refresh token on every refresh, so both
///   tokens are written back to the sidecar immediately. Losing the
///   new refresh token locks the collector out for good.
///
/// RATE LIMIT:
/// - On 429 the collector pauses itself for an hour (in memory only)
///
/// Every 15 minutes.
pub struct Fitbit {
    info: PluginInfo,
    settings: SettingsStore,
    /// Unix seconds before which jobs return without calling the API
    pause_until: AtomicI64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
}

impl Fitbit {
    pub fn build(dir: &Path) -> Result<Arc<dyn Collector>, PluginError> {
        Ok(Arc::new(Self::new(dir)?))
    }

    fn new(dir: &Path) -> Result<Self, PluginError> {
        Ok(Self {
            info: PluginInfo::new("fitbit", "1.0", "Fitbit Collector", "/health/fitbit"),
            settings: SettingsStore::load(dir)?,
            pause_until: AtomicI64::new(0),
        })
    }

    fn paused(&self, now: i64) -> bool {
        now < self.pause_until.load(Ordering::Relaxed)
    }

    /// GET with bearer auth, refreshing the tokens once on 401.
    ///
    /// Returns `None` when the rate limit was hit.
    async fn get_json(&self, client: &reqwest::Client, url: &str) -> Result<Option<Value>> {
        let mut refreshed = false;

        loop {
            let token = self.settings.require_str("access_token")?;
            let response = client
                .get(url)
                .bearer_auth(token)
                .send()
                .await
                .with_context(|| format!("Fitbit request to {url} failed"))?;

            match response.status() {
                StatusCode::UNAUTHORIZED if !refreshed => {
                    log::info!("Fitbit access token rejected, refreshing");
                    self.refresh_tokens(client).await?;
                    refreshed = true;
                }
                StatusCode::TOO_MANY_REQUESTS => {
                    let until = util::now_secs() + RATE_LIMIT_PAUSE_SECS;
                    self.pause_until.store(until, Ordering::Relaxed);
                    log::warn!("Fitbit API limit reached, pausing for {RATE_LIMIT_PAUSE_SECS}s");
                    return Ok(None);
                }
                _ => {
                    let body = response
                        .error_for_status()
                        .context("Fitbit returned an error status")?
                        .json()
                        .await
                        .context("invalid Fitbit payload")?;
                    return Ok(Some(body));
                }
            }
        }
    }

    async fn refresh_tokens(&self, client: &reqwest::Client) -> Result<()> {
        let client_id = self.settings.require_str("client_id")?;
        let client_secret = self.settings.require_str("client_secret")?;
        let refresh_token = self.settings.require_str("refresh_token")?;

        let tokens: TokenResponse = client
            .post(TOKEN_URL)
            .basic_auth(client_id, Some(client_secret))
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(format!("grant_type=refresh_token&refresh_token={refresh_token}"))
            .send()
            .await
            .context("Fitbit token refresh failed")?
            .error_for_status()
            .context("Fitbit refused the refresh token")?
            .json()
            .await
            .context("invalid Fitbit token response")?;

        self.store_tokens(&tokens)
    }

    /// Writes rotated tokens to the sidecar.
    fn store_tokens(&self, tokens: &TokenResponse) -> Result<()> {
        self.settings.set("access_token", tokens.access_token.as_str());
        self.settings.set("refresh_token", tokens.refresh_token.as_str());
        self.save_settings()
            .context("failed to persist refreshed Fitbit tokens")?;
        log::info!("Fitbit tokens refreshed");
        Ok(())
    }
}

#[async_trait::async_trait]
impl Collector for Fitbit {
    fn info(&self) -> &PluginInfo {
        &self.info
    }

    fn active(&self) -> bool {
        self.settings.get_bool("active").unwrap_or(true)
    }

    fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    fn scheduler(self: Arc<Self>) -> CadenceTable {
        CadenceTable::new().with(Rule::minutes(15), executor::detached(self))
    }

    async fn job(&self) -> Result<()> {
        if self.paused(util::now_secs()) {
            log::info!("Fitbit API paused, skipping this run");
            return Ok(());
        }
        self.settings.require_str("access_token")?;

        log::info!("retrieving data from Fitbit");
        let today = Local::now().date_naive();
        let start = today - TimeDelta::days(LOOKBACK_DAYS);
        let client = reqwest::Client::new();

        let mut readings = Vec::new();
        for (measurement, series) in SERIES {
            let url = format!("{API_BASE}{measurement}/{series}/date/{start}/{today}.json");
            let Some(body) = self.get_json(&client, &url).await? else {
                break;
            };
            readings.extend(to_readings(measurement, series, &body)?);
        }
        log::debug!("Fitbit returned {} readings", readings.len());
        if readings.is_empty() {
            return Ok(());
        }

        let mut bus = BusClient::connect(self.name()).await?;
        for reading in &readings {
            bus.publish(self.topic(), &[reading]).await?;
        }
        bus.close().await;
        Ok(())
    }
}

/// Time-series body: `{"activities-steps": [{"dateTime": "2024-03-01", "value": "8432"}]}`.
///
/// Each point becomes one reading at local midnight of its day.
/// Numeric strings are published as numbers, empty values as 0.
fn to_readings(measurement: &str, series: &str, body: &Value) -> Result<Vec<Reading>> {
    let points = body
        .as_object()
        .and_then(|o| o.values().next())
        .and_then(Value::as_array)
        .with_context(|| format!("unexpected Fitbit {measurement}/{series} payload"))?;

    let mut readings = Vec::with_capacity(points.len());
    for point in points {
        let day = point
            .get("dateTime")
            .and_then(Value::as_str)
            .context("Fitbit point without dateTime")?;
        let midnight = NaiveDate::parse_from_str(day, "%Y-%m-%d")
            .with_context(|| format!("invalid Fitbit date '{day}'"))?
            .and_time(chrono::NaiveTime::MIN);
        let Some(timestamp) = util::local_timestamp(&midnight) else {
            log::warn!("skipping Fitbit point at non-existent local time {midnight}");
            continue;
        };

        let value = match point.get("value") {
            None | Some(Value::Null) => Value::from(0.0),
            Some(Value::String(s)) if s.is_empty() => Value::from(0.0),
            Some(Value::String(s)) => s
                .parse::<f64>()
                .map(Value::from)
                .unwrap_or_else(|_| Value::from(s.as_str())),
            Some(other) => other.clone(),
        };

        readings.push(Reading::new(timestamp, measurement).field(series, value));
    }

    Ok(readings)
}
