use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while discovering collectors or touching their
/// settings sidecar.
///
/// During discovery every one of these is fatal: a unit that cannot
/// be loaded is a deployment defect, not something to route around.
#[derive(Debug, Error)]
pub enum PluginError {
    /// A directory of the plugin tree could not be read.
    #[error("cannot read plugin directory {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The sidecar exists but could not be read or written.
    #[error("cannot access settings {path}: {source}")]
    SettingsIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The sidecar is not valid JSON, or could not be serialized.
    #[error("malformed settings {path}: {source}")]
    SettingsFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The sidecar is valid JSON but not an object.
    #[error("settings {path} must contain a JSON object")]
    SettingsShape { path: PathBuf },
}
