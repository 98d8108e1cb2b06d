use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::DateTime;
use serde::Deserialize;

use crate::{
    bus::BusClient,
    collector::{
        cadence::{CadenceTable, Rule},
        executor,
    },
    schema::Reading,
};

use super::{
    contract::{Collector, PluginInfo},
    error::PluginError,
    settings::SettingsStore,
};

const URL_BASE: &str = "https://api.solcast.com.au/";

/// Settings key holding the newest period already published.
const CURSOR_KEY: &str = "last_period_end";

/// Solcast solar radiation collector
///
/// SETTINGS (config.json):
/// - api_key    Solcast API key
/// - latitude   site latitude
/// - longitude  site longitude
///
/// Fetches estimated actuals for the site every 30 minutes and
/// publishes one reading per period.
///
/// The API returns a sliding window of recent periods, so most of
/// every response was already published by the previous run. The
/// newest published `period_end` is written back to the sidecar and
/// older periods are skipped on the next run (and after a restart).
pub struct Solcast {
    info: PluginInfo,
    settings: SettingsStore,
}

#[derive(Debug, Deserialize)]
struct EstimatedActuals {
    estimated_actuals: Vec<Estimate>,
}

#[derive(Debug, Deserialize)]
struct Estimate {
    period_end: String,
    ghi: f64,
    dni: f64,
    dhi: f64,
    cloud_opacity: f64,
}

impl Solcast {
    pub fn build(dir: &Path) -> Result<Arc<dyn Collector>, PluginError> {
        Ok(Arc::new(Self {
            info: PluginInfo::new(
                "solcast",
                "1.0",
                "Solar Power Radiation Collector",
                "/power/solcast",
            ),
            settings: SettingsStore::load(dir)?,
        }))
    }

    async fn fetch(&self) -> Result<EstimatedActuals> {
        let api_key = self.settings.require_str("api_key")?;
        let latitude = self
            .settings
            .get_f64("latitude")
            .context("missing or invalid setting 'latitude'")?;
        let longitude = self
            .settings
            .get_f64("longitude")
            .context("missing or invalid setting 'longitude'")?;

        let url = format!(
            "{URL_BASE}world_radiation/estimated_actuals?latitude={latitude}&longitude={longitude}"
        );

        let response = reqwest::Client::new()
            .get(&url)
            .bearer_auth(api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .context("Solcast request failed")?
            .error_for_status()
            .context("Solcast returned an error status")?;

        response
            .json()
            .await
            .context("invalid Solcast payload")
    }
}

#[async_trait::async_trait]
impl Collector for Solcast {
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
        CadenceTable::new().with(Rule::minutes(30), executor::detached(self))
    }

    async fn job(&self) -> Result<()> {
        log::info!("retrieving data from Solcast");
        let payload = self.fetch().await?;

        let since = self
            .settings
            .get(CURSOR_KEY)
            .and_then(|v| v.as_i64());
        let readings = to_readings(&payload.estimated_actuals, since)?;
        if readings.is_empty() {
            log::debug!("no new Solcast periods");
            return Ok(());
        }

        let mut bus = BusClient::connect(self.name()).await?;
        for reading in &readings {
            bus.publish(self.topic(), &[reading]).await?;
        }
        bus.close().await;

        if let Some(newest) = readings.iter().map(|r| r.timestamp).max() {
            self.settings.set(CURSOR_KEY, newest);
            self.save_settings()?;
        }
        Ok(())
    }
}

/// Converts estimates into readings, skipping periods at or before
/// `since` (unix seconds).
fn to_readings(estimates: &[Estimate], since: Option<i64>) -> Result<Vec<Reading>> {
    let mut readings = Vec::with_capacity(estimates.len());

    for e in estimates {
        let timestamp = DateTime::parse_from_rfc3339(&e.period_end)
            .with_context(|| format!("invalid period_end '{}'", e.period_end))?
            .timestamp();
        if since.is_some_and(|s| timestamp <= s) {
            continue;
        }

        readings.push(
            Reading::new(timestamp, "solcast")
                .field("global_horizontal_irradiance", e.ghi)
                .field("direct_normal_irradiance", e.dni)
                .field("diffuse_horizontal_irradiance", e.dhi)
                .field("cloud_opacity", e.cloud_opacity),
        );
    }

    Ok(readings)
}
