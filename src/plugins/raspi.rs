use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

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

const THERMAL_ZONE: &str = "/sys/class/thermal/thermal_zone0/temp";
const LOADAVG: &str = "/proc/loadavg";
const HOSTNAME: &str = "/proc/sys/kernel/hostname";

/// Raspberry Pi system information collector
///
/// Reads local kernel files only:
/// - CPU temperature (thermal zone 0, millidegrees)
/// - 1/5/15 minute load averages
///
/// The measurement name is the host name, so several boards can
/// publish on the same topic.
///
/// Every 5 seconds.
pub struct RasPi {
    info: PluginInfo,
    settings: SettingsStore,
}

impl RasPi {
    pub fn build(dir: &Path) -> Result<Arc<dyn Collector>, PluginError> {
        Ok(Arc::new(Self {
            info: PluginInfo::new("raspi", "1.0", "RaspberryPi SysInfo", "/system/raspi"),
            settings: SettingsStore::load(dir)?,
        }))
    }

    fn read_reading(&self) -> Result<Reading> {
        let temp = read_file(THERMAL_ZONE)?;
        let load = read_file(LOADAVG)?;
        let host = read_file(HOSTNAME).unwrap_or_else(|_| "raspi".to_string());

        let cpu_temp = parse_cpu_temp(&temp)?;
        let [load_1m, load_5m, load_15m] = parse_loadavg(&load)?;

        Ok(Reading::new(util::now_secs(), util::measurement_name(&host))
            .field("cpu_temp", cpu_temp)
            .field("cpu_load_1m", load_1m)
            .field("cpu_load_5m", load_5m)
            .field("cpu_load_15m", load_15m))
    }
}

#[async_trait::async_trait]
impl Collector for RasPi {
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
        CadenceTable::new().with(Rule::seconds(5), executor::detached(self))
    }

    async fn job(&self) -> Result<()> {
        log::info!("retrieving data from raspberry pi");

        let data = vec![self.read_reading()?];
        log::debug!("{}", serde_json::to_string(&data)?);

        let mut bus = BusClient::connect(self.name()).await?;
        bus.publish(self.topic(), &data).await?;
        bus.close().await;
        Ok(())
    }
}

fn read_file(path: &str) -> Result<String> {
    let data = fs::read_to_string(path).with_context(|| format!("failed to read {path}"))?;
    Ok(data.trim().to_string())
}

/// Thermal zone value is in millidegrees Celsius.
fn parse_cpu_temp(raw: &str) -> Result<f64> {
    let milli: f64 = raw
        .trim()
        .parse()
        .with_context(|| format!("invalid thermal zone value '{raw}'"))?;
    Ok(milli / 1000.0)
}

/// `/proc/loadavg`: "0.52 0.58 0.59 1/467 12345"
fn parse_loadavg(raw: &str) -> Result<[f64; 3]> {
    let mut parts = raw.split_whitespace();
    let mut next = || -> Result<f64> {
        let part = parts
            .next()
            .with_context(|| format!("truncated loadavg '{raw}'"))?;
        part.parse()
            .with_context(|| format!("invalid loadavg value '{part}'"))
    };
    Ok([next()?, next()?, next()?])
}
