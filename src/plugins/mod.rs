//! Collector registry and discovery
//!
//! This module provides:
//! - Central registration of all built-in collectors (the catalog)
//! - Discovery of collector units under a plugins directory
//!
//! All source-specific logic must live in dedicated collector modules.
//! The rest of the application must interact exclusively through
//! the `Collector` trait.

pub mod contract;
pub mod error;
pub mod settings;
mod enedis;
mod fitbit;
mod raspi;
mod solcast;

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::metrics::METRICS;
use contract::Collector;
use error::PluginError;

/// Builds one collector from its unit directory.
///
/// The directory is where the collector's settings sidecar lives.
pub type Constructor = fn(&Path) -> Result<Arc<dyn Collector>, PluginError>;

/// One catalog row: unit directory name → constructor.
#[derive(Clone, Copy)]
pub struct PluginEntry {
    pub id: &'static str,
    pub build: Constructor,
}

impl std::fmt::Debug for PluginEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginEntry").field("id", &self.id).finish()
    }
}

const BUILTIN: &[PluginEntry] = &[
    PluginEntry { id: "enedis", build: enedis::Enedis::build },
    PluginEntry { id: "fitbit", build: fitbit::Fitbit::build },
    PluginEntry { id: "raspi", build: raspi::RasPi::build },
    PluginEntry { id: "solcast", build: solcast::Solcast::build },
];

/// Returns the catalog of built-in collectors.
///
/// This slice acts as the **central registry** for all collector
/// implementations compiled into the daemon.
///
/// CONTRACT:
/// - `id` MUST match the unit directory name under `plugins_dir`
/// - Ids must be lowercase and stable
///
/// Adding a collector = adding a module and one row here.
///
pub fn builtin_catalog() -> &'static [PluginEntry] {
    BUILTIN
}

/// The set of collectors discovered at startup.
///
/// DISCOVERY:
/// - Walks `root` recursively, each directory at most once
///   (canonical paths, so symlink cycles terminate)
/// - Every directory named after a catalog id is a unit and yields
///   exactly one collector instance
/// - Units can be nested anywhere below `root`
/// - Entries are visited in sorted order (stable listing only)
///
/// FAILURE:
/// - Any unreadable directory or failing constructor aborts discovery
///
pub struct PluginCollection {
    plugins: Vec<Arc<dyn Collector>>,
    seen_paths: HashSet<PathBuf>,
}

impl PluginCollection {
    /// Discovers built-in collectors under `root`.
    pub fn discover(root: &Path, filter: Option<&[String]>) -> Result<Self, PluginError> {
        Self::discover_with(builtin_catalog(), root, filter)
    }

    /// Discovers collectors from an explicit catalog.
    ///
    /// With a `filter`, only collectors whose name is in it are kept.
    /// An empty result is not an error.
    pub fn discover_with(
        catalog: &[PluginEntry],
        root: &Path,
        filter: Option<&[String]>,
    ) -> Result<Self, PluginError> {
        log::info!("looking for plugins in {}", root.display());

        let mut collection = Self {
            plugins: Vec::new(),
            seen_paths: HashSet::new(),
        };
        collection.walk(catalog, root, true)?;

        if let Some(names) = filter {
            collection
                .plugins
                .retain(|p| names.iter().any(|n| n == p.name()));
        }

        log::debug!(
            "visited {} directories under {}",
            collection.seen_paths.len(),
            root.display()
        );
        METRICS
            .collectors_discovered
            .store(collection.plugins.len(), Ordering::Relaxed);
        Ok(collection)
    }

    fn walk(
        &mut self,
        catalog: &[PluginEntry],
        dir: &Path,
        is_root: bool,
    ) -> Result<(), PluginError> {
        let walk_err = |source| PluginError::Walk {
            path: dir.to_path_buf(),
            source,
        };

        let canonical = dir.canonicalize().map_err(walk_err)?;
        if !self.seen_paths.insert(canonical) {
            log::debug!("already visited {}", dir.display());
            return Ok(());
        }

        if !is_root {
            let name = dir.file_name().and_then(|n| n.to_str());
            if let Some(entry) = catalog.iter().find(|e| Some(e.id) == name) {
                log::debug!("found plugin unit '{}' at {}", entry.id, dir.display());
                let collector = (entry.build)(dir).inspect_err(|e| {
                    log::error!("failed to load plugin '{}': {}", entry.id, e);
                })?;
                self.plugins.push(collector);
            }
        }

        let mut children = Vec::new();
        for entry in fs::read_dir(dir).map_err(walk_err)? {
            let path = entry.map_err(walk_err)?.path();
            if path.is_dir() {
                children.push(path);
            }
        }
        children.sort();

        for child in children {
            self.walk(catalog, &child, false)?;
        }
        Ok(())
    }

    /// Logs the discovered collectors.
    pub fn list(&self) {
        log::info!("list of plugins ({}):", self.len());
        for plugin in &self.plugins {
            log::info!(
                "  * {} ({}/{}){}",
                plugin.description(),
                plugin.name(),
                plugin.version(),
                if plugin.active() { "" } else { " [inactive]" }
            );
        }
    }

    pub fn plugins(&self) -> &[Arc<dyn Collector>] {
        &self.plugins
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Canonical directories visited during discovery.
    pub fn seen_paths(&self) -> &HashSet<PathBuf> {
        &self.seen_paths
    }
}
