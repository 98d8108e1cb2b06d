// ------------------------------------------------------------
// Module declarations
// ------------------------------------------------------------
//
// Each module represents a well-defined responsibility:
//
// - config:     Daemon configuration loaded from JSON
// - logging:    Log line format and filter setup
// - schema:     Common reading record published by collectors
// - util:       Shared helper utilities (time, naming)
// - bus:        Message-bus client used by collectors
// - plugins:    Collector contract, settings sidecars, registry
// - collector:  Scheduling runtime (cadence, dispatcher, executor)
// - metrics:    Global runtime counters
//
mod bus;
mod collector;
mod config;
mod logging;
mod metrics;
mod plugins;
mod schema;
mod util;

#[cfg(test)]
mod testing;

// ------------------------------------------------------------
// External dependencies
// ------------------------------------------------------------

use anyhow::Context;
use clap::Parser;
use rustls::crypto::{CryptoProvider, ring};

use collector::runner::Dispatcher;
use config::{Config, DEFAULT_CONFIG_PATH};
use metrics::METRICS;
use plugins::PluginCollection;

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Polls data sources on a schedule and republishes their readings.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Daemon configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Root directory of collector units (overrides the config file)
    #[arg(long)]
    plugins_dir: Option<PathBuf>,

    /// Run this collector once, synchronously, instead of scheduling
    #[arg(short, long)]
    plugin: Option<String>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

// ------------------------------------------------------------
// Application entry point
// ------------------------------------------------------------
//
// Two modes:
// - Daemon (default): discover, list, schedule forever
// - Manual (--plugin NAME): discover NAME, run its job once
//
// Discovery errors end the process. Nothing a collector does at
// runtime can.
//
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let file_config = Config::read(&args.config)?;
    let from_file = file_config.is_some();
    let config = file_config.unwrap_or_default();

    logging::init(args.verbose || args.plugin.is_some() || config.debug_log());
    if !from_file {
        log::info!(
            "no configuration at {}, using defaults",
            args.config.display()
        );
    }

    // --------------------------------------------------------
    // rustls >= 0.23 requires an explicit CryptoProvider
    // installation, once, before any TLS connection (REST
    // collectors and the bus client).
    // --------------------------------------------------------
    CryptoProvider::install_default(ring::default_provider())
        .map_err(|_| anyhow::anyhow!("failed to install rustls CryptoProvider"))?;

    let plugins_dir = args.plugins_dir.unwrap_or_else(|| config.plugins_dir.clone());

    match args.plugin {
        Some(name) => run_manual(&plugins_dir, name).await,
        None => run_daemon(&config, &plugins_dir).await,
    }
}

/// Daemon mode: never returns unless discovery fails.
async fn run_daemon(config: &Config, plugins_dir: &Path) -> anyhow::Result<()> {
    let plugins = PluginCollection::discover(plugins_dir, None)
        .context("plugin discovery failed")?;
    plugins.list();

    if config.metrics_interval_secs > 0 {
        spawn_metrics_reporter(Duration::from_secs(config.metrics_interval_secs));
    }

    let mut dispatcher = Dispatcher::new(config.tick());
    dispatcher.register(plugins.plugins());
    if dispatcher.is_empty() {
        log::warn!("no active plugins, the scheduler will idle");
    } else {
        log::info!("{} plugin(s) scheduled", dispatcher.len());
    }
    dispatcher.run_forever().await;

    Ok(())
}

/// Manual test mode: run the named collector(s) once, in the
/// foreground, with no scheduling.
async fn run_manual(plugins_dir: &Path, name: String) -> anyhow::Result<()> {
    let filter = [name];
    let plugins = PluginCollection::discover(plugins_dir, Some(filter.as_slice()))
        .context("plugin discovery failed")?;

    if plugins.is_empty() {
        log::warn!("no plugin named '{}' under {}", filter[0], plugins_dir.display());
    }

    for plugin in plugins.plugins() {
        log::info!("running plugin {}/{}", plugin.name(), plugin.version());
        plugin
            .job()
            .await
            .with_context(|| format!("plugin {} failed", plugin.name()))?;
    }

    Ok(())
}

/// Periodic, low-noise metrics summary.
fn spawn_metrics_reporter(period: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // first tick is immediate, nothing to report yet
        interval.tick().await;

        loop {
            interval.tick().await;
            log::info!("[METRICS] {}", METRICS.summary());
        }
    });
}
