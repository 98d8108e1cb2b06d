use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate, NaiveDateTime, TimeDelta};
use serde::Deserialize;
use serde_json::{json, Value};

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

const URL_BASE: &str = "https://enedisgateway.tech/api";

/// Days of load curve requested per run. The gateway publishes the
/// previous day with a delay, so a few days are re-read every morning.
const LOOKBACK_DAYS: i64 = 3;

/// Enedis power consumption collector
///
/// SETTINGS (config.json):
/// - pdl    usage point id (meter)
/// - token  gateway authorization token
///
/// Once a day at 06:00, requests the consumption load curve of the
/// last days and publishes it as a single batch.
pub struct Enedis {
    info: PluginInfo,
    settings: SettingsStore,
}

#[derive(Debug, Deserialize)]
struct LoadCurve {
    meter_reading: MeterReading,
}

#[derive(Debug, Deserialize)]
struct MeterReading {
    interval_reading: Vec<IntervalReading>,
}

#[derive(Debug, Deserialize)]
struct IntervalReading {
    date: String,
    value: Value,
}

impl Enedis {
    pub fn build(dir: &Path) -> Result<Arc<dyn Collector>, PluginError> {
        Ok(Arc::new(Self {
            info: PluginInfo::new(
                "enedis",
                "1.0",
                "Enedis Power Consumption Collector",
                "/power/enedis",
            ),
            settings: SettingsStore::load(dir)?,
        }))
    }
}

#[async_trait::async_trait]
impl Collector for Enedis {
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
        let rule = Rule::daily_at("06:00").unwrap_or(Rule::hours(24));
        CadenceTable::new().with(rule, executor::detached(self))
    }

    async fn job(&self) -> Result<()> {
        let pdl = self.settings.require_str("pdl")?;
        let token = self.settings.require_str("token")?;
        let payload = request_payload(&pdl, Local::now().date_naive());

        log::info!("retrieving data from Enedis");
        let response = reqwest::Client::new()
            .post(URL_BASE)
            .header(reqwest::header::AUTHORIZATION, token)
            .json(&payload)
            .send()
            .await
            .context("Enedis request failed")?
            .error_for_status()
            .context("Enedis returned an error status")?;

        let curve: LoadCurve = response.json().await.context("invalid Enedis payload")?;
        let data = to_readings(&curve.meter_reading.interval_reading, util::local_timestamp)?;
        log::debug!("Enedis returned {} readings", data.len());

        let mut bus = BusClient::connect(self.name()).await?;
        bus.publish(self.topic(), &data).await?;
        bus.close().await;
        Ok(())
    }
}

fn request_payload(pdl: &str, today: NaiveDate) -> Value {
    let before = today - TimeDelta::days(LOOKBACK_DAYS);

    json!({
        "type": "consumption_load_curve",
        "usage_point_id": pdl,
        "start": before.format("%Y-%m-%d").to_string(),
        "end": today.format("%Y-%m-%d").to_string(),
    })
}

/// Interval dates are local wall-clock times ("2024-03-01 10:30:00"),
/// turned into unix seconds by `resolve`. An interval whose local time
/// cannot be resolved is skipped; the rest of the batch is kept.
/// Values come as strings or numbers depending on the gateway version.
fn to_readings(
    intervals: &[IntervalReading],
    resolve: impl Fn(&NaiveDateTime) -> Option<i64>,
) -> Result<Vec<Reading>> {
    let mut readings = Vec::with_capacity(intervals.len());

    for m in intervals {
        let dt = NaiveDateTime::parse_from_str(&m.date, "%Y-%m-%d %H:%M:%S")
            .with_context(|| format!("invalid interval date '{}'", m.date))?;
        let Some(timestamp) = resolve(&dt) else {
            log::warn!("skipping Enedis interval at non-existent local time {}", m.date);
            continue;
        };
        let power = match &m.value {
            Value::String(s) => s
                .parse::<f64>()
                .with_context(|| format!("invalid interval value '{s}'"))?
                .into(),
            other => other.clone(),
        };

        readings.push(Reading::new(timestamp, "enedis").field("power", power));
    }

    Ok(readings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_covers_lookback_window() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let payload = request_payload("0123456789", today);

        assert_eq!(payload["type"], "consumption_load_curve");
        assert_eq!(payload["usage_point_id"], "0123456789");
        assert_eq!(payload["start"], "2024-02-27");
        assert_eq!(payload["end"], "2024-03-01");
    }

    #[test]
    fn intervals_become_power_readings() {
        let curve: LoadCurve = serde_json::from_value(json!({
            "meter_reading": {
                "interval_reading": [
                    {"date": "2024-03-01 10:00:00", "value": "512"},
                    {"date": "2024-03-01 10:30:00", "value": 498}
                ]
            }
        }))
        .unwrap();

        let readings =
            to_readings(&curve.meter_reading.interval_reading, util::local_timestamp).unwrap();

        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0].fields["power"], 512.0);
        assert_eq!(readings[1].fields["power"], 498);
        assert_eq!(readings[1].timestamp - readings[0].timestamp, 1800);
    }

    #[test]
    fn bad_date_is_reported() {
        let intervals = vec![IntervalReading {
            date: "yesterday".into(),
            value: json!(1),
        }];
        assert!(to_readings(&intervals, util::local_timestamp).is_err());
    }

    #[test]
    fn unresolvable_local_time_skips_only_that_interval() {
        let intervals = vec![
            IntervalReading {
                date: "2024-03-31 01:30:00".into(),
                value: json!(400),
            },
            IntervalReading {
                date: "2024-03-31 02:30:00".into(),
                value: json!(410),
            },
            IntervalReading {
                date: "2024-03-31 03:30:00".into(),
                value: json!(420),
            },
        ];
        // 02:30 falls in the spring-forward gap of this resolver
        let resolve = |dt: &NaiveDateTime| {
            (dt.format("%H").to_string() != "02").then(|| dt.and_utc().timestamp())
        };

        let readings = to_readings(&intervals, resolve).unwrap();

        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0].fields["power"], 400);
        assert_eq!(readings[1].fields["power"], 420);
    }

    #[test]
    fn runs_daily_at_six() {
        let dir = tempfile::tempdir().unwrap();
        let table = Enedis::build(dir.path()).unwrap().scheduler();

        assert_eq!(table.entries()[0].rule(), Rule::daily_at("06:00").unwrap());
    }
}
