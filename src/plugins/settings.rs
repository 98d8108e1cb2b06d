use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde_json::{Map, Value};

use super::error::PluginError;

/// File name of the sidecar inside a collector unit directory.
pub const SETTINGS_FILE: &str = "config.json";

/// Per-collector key/value settings backed by a JSON sidecar.
///
/// The sidecar lives in the collector's own unit directory
/// (`<plugins_dir>/<id>/config.json`). Its schema belongs to the
/// collector; this store only knows "a JSON object".
///
/// CONCURRENCY:
/// - The in-memory map is guarded by a lock.
/// - `save` is NOT serialized against other `save` calls: two
///   overlapping job invocations writing back at the same time race
///   on the file and the last writer wins.
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    values: RwLock<Map<String, Value>>,
}

impl SettingsStore {
    /// Loads `<dir>/config.json`.
    ///
    /// A missing file yields an empty map. An unreadable file, invalid
    /// JSON or a non-object document is an error.
    pub fn load(dir: &Path) -> Result<Self, PluginError> {
        let path = dir.join(SETTINGS_FILE);
        let values = read_sidecar(&path)?;
        log::debug!("loaded {} settings from {}", values.len(), path.display());

        Ok(Self {
            path,
            values: RwLock::new(values),
        })
    }

    /// Re-reads the sidecar, replacing the in-memory map.
    pub fn reload(&self) -> Result<(), PluginError> {
        let values = read_sidecar(&self.path)?;
        *self.values.write() = values;
        Ok(())
    }

    /// Writes the current map back to the sidecar.
    pub fn save(&self) -> Result<(), PluginError> {
        let data = serde_json::to_string_pretty(&self.snapshot()).map_err(|source| {
            PluginError::SettingsFormat {
                path: self.path.clone(),
                source,
            }
        })?;

        fs::write(&self.path, data).map_err(|source| PluginError::SettingsIo {
            path: self.path.clone(),
            source,
        })?;
        log::debug!("saved settings to {}", self.path.display());
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.read().get(key).cloned()
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.values
            .read()
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_owned)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.values.read().get(key).and_then(Value::as_bool)
    }

    /// Numeric lookup; numeric strings are accepted too since
    /// hand-edited sidecars often quote coordinates.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        match self.values.read().get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// String lookup for settings a job cannot run without.
    pub fn require_str(&self, key: &str) -> anyhow::Result<String> {
        self.get_str(key).ok_or_else(|| {
            anyhow::anyhow!("missing setting '{}' in {}", key, self.path().display())
        })
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.write().insert(key.into(), value.into());
    }

    /// Copy of the whole map.
    pub fn snapshot(&self) -> Map<String, Value> {
        self.values.read().clone()
    }
}

fn read_sidecar(path: &Path) -> Result<Map<String, Value>, PluginError> {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Map::new()),
        Err(source) => {
            return Err(PluginError::SettingsIo {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let value: Value =
        serde_json::from_str(&data).map_err(|source| PluginError::SettingsFormat {
            path: path.to_path_buf(),
            source,
        })?;

    match value {
        Value::Object(map) => Ok(map),
        _ => Err(PluginError::SettingsShape {
            path: path.to_path_buf(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_sidecar_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::load(dir.path()).unwrap();

        assert!(store.snapshot().is_empty());
        assert_eq!(store.path(), dir.path().join(SETTINGS_FILE));
    }

    #[test]
    fn save_then_load_returns_same_map() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::load(dir.path()).unwrap();
        store.set("token", "abc");
        store.save().unwrap();

        let reloaded = SettingsStore::load(dir.path()).unwrap();
        assert_eq!(reloaded.snapshot(), store.snapshot());
        assert_eq!(reloaded.get("token"), Some(json!("abc")));
    }

    #[test]
    fn reload_picks_up_external_edits() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::load(dir.path()).unwrap();
        fs::write(dir.path().join(SETTINGS_FILE), r#"{"active": false}"#).unwrap();

        assert_eq!(store.get_bool("active"), None);
        store.reload().unwrap();
        assert_eq!(store.get_bool("active"), Some(false));
    }

    #[test]
    fn malformed_sidecar_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(SETTINGS_FILE), "{ broken").unwrap();

        let err = SettingsStore::load(dir.path()).unwrap_err();
        assert!(matches!(err, PluginError::SettingsFormat { .. }));
    }

    #[test]
    fn non_object_sidecar_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(SETTINGS_FILE), "[1, 2]").unwrap();

        let err = SettingsStore::load(dir.path()).unwrap_err();
        assert!(matches!(err, PluginError::SettingsShape { .. }));
    }

    #[test]
    fn typed_getters() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(SETTINGS_FILE),
            r#"{"lat": "45.5", "lon": 4.8, "key": "k", "flag": true}"#,
        )
        .unwrap();
        let store = SettingsStore::load(dir.path()).unwrap();

        assert_eq!(store.get_f64("lat"), Some(45.5));
        assert_eq!(store.get_f64("lon"), Some(4.8));
        assert_eq!(store.get_f64("key"), None);
        assert_eq!(store.get_bool("flag"), Some(true));
        assert_eq!(store.require_str("key").unwrap(), "k");

        let err = store.require_str("secret").unwrap_err();
        assert!(err.to_string().contains("missing setting 'secret'"));
    }
}
