use std::sync::Arc;

use crate::collector::cadence::CadenceTable;

use super::error::PluginError;
use super::settings::SettingsStore;

/// Static identity of a collector.
#[derive(Debug, Clone)]
pub struct PluginInfo {
    /// Short stable identifier, also used as bus client id
    pub name: String,

    pub version: String,

    /// Human readable description, shown by `PluginCollection::list`
    pub description: String,

    /// Bus topic the readings are published on
    pub topic: String,
}

impl PluginInfo {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: description.into(),
            topic: topic.into(),
        }
    }
}

/// Collector is the contract between:
/// - The generic discovery / scheduling runtime
/// - Source-specific collection code
///
/// Each collector implementation must:
/// - Describe itself (`info`, `active`)
/// - Declare its cadence (`scheduler`)
/// - Perform one collection cycle (`job`)
///
/// DESIGN GOALS:
/// - Zero source-specific logic outside collectors
/// - One collector type per data source
/// - Uniform reading format on the bus
///
/// THREAD SAFETY:
/// - Must be Send + Sync
/// - Instances are shared across detached job tasks
///
#[async_trait::async_trait]
pub trait Collector: Send + Sync + 'static {
    /// Returns the static identity of this collector.
    fn info(&self) -> &PluginInfo;

    fn name(&self) -> &str {
        &self.info().name
    }

    fn version(&self) -> &str {
        &self.info().version
    }

    fn description(&self) -> &str {
        &self.info().description
    }

    fn topic(&self) -> &str {
        &self.info().topic
    }

    /// Whether the dispatcher should schedule this collector.
    ///
    /// An inactive collector is still discovered (and listed, and can
    /// be run manually) but never gets a cadence table.
    fn active(&self) -> bool;

    /// Settings sidecar of this collector, loaded at construction.
    fn settings(&self) -> &SettingsStore;

    /// Re-reads the sidecar.
    fn load_settings(&self) -> Result<(), PluginError> {
        self.settings().reload()
    }

    /// Persists the current settings map, e.g. after a token refresh.
    fn save_settings(&self) -> Result<(), PluginError> {
        self.settings().save()
    }

    /// Builds the cadence table of this collector.
    ///
    /// Every rule is usually bound to `executor::detached(self)`, so a
    /// firing only launches the job and returns.
    fn scheduler(self: Arc<Self>) -> CadenceTable;

    /// Executes one full collection cycle: fetch, transform, publish.
    ///
    /// CONCURRENCY:
    /// - May run concurrently with another invocation of itself; the
    ///   runtime provides no per-collector serialization.
    ///
    /// ERRORS:
    /// - Returned errors are logged by the detached wrapper only.
    ///
    async fn job(&self) -> anyhow::Result<()>;
}
