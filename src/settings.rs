//! Per-device settings persistence.
//!
//! The protocol engine never touches the filesystem itself; controllers are
//! handed a [`SettingsStore`] and go through `load`/`save`.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSettings {
    #[serde(rename = "friendlyName")]
    pub friendly_name: String,
    pub visible: bool,
}

pub trait SettingsStore: Send + Sync {
    fn load(&self, key: &str) -> Option<DeviceSettings>;
    fn save(&self, key: &str, settings: &DeviceSettings) -> Result<(), ConfigError>;
}

/// Keeps everything in memory. Used when no settings file is configured.
#[derive(Default)]
pub struct MemorySettingsStore {
    entries: Mutex<HashMap<String, DeviceSettings>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self, key: &str) -> Option<DeviceSettings> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    fn save(&self, key: &str, settings: &DeviceSettings) -> Result<(), ConfigError> {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_string(), settings.clone());
        }
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SettingsFile {
    #[serde(default)]
    devices: BTreeMap<String, DeviceSettings>,
}

/// One TOML file, one `[devices."<key>"]` table per device.
pub struct TomlSettingsStore {
    path: PathBuf,
    // serializes read-modify-write of the file
    lock: Mutex<()>,
}

impl TomlSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn read(&self) -> Result<SettingsFile, ConfigError> {
        match std::fs::read_to_string(&self.path) {
            Ok(s) => toml::from_str(&s).map_err(|e| ConfigError::Parse {
                path: self.path.clone(),
                source: e,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SettingsFile::default()),
            Err(e) => Err(ConfigError::Io {
                path: self.path.clone(),
                source: e,
            }),
        }
    }
}

impl SettingsStore for TomlSettingsStore {
    fn load(&self, key: &str) -> Option<DeviceSettings> {
        let _guard = self.lock.lock().ok()?;
        match self.read() {
            Ok(mut file) => file.devices.remove(key),
            Err(e) => {
                tracing::warn!("failed to load settings for {}: {}", key, e);
                None
            }
        }
    }

    fn save(&self, key: &str, settings: &DeviceSettings) -> Result<(), ConfigError> {
        let _guard = self.lock.lock().map_err(|_| ConfigError::Poisoned)?;
        let mut file = self.read()?;
        file.devices.insert(key.to_string(), settings.clone());
        let text = toml::to_string(&file).map_err(ConfigError::Serialize)?;
        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir).map_err(|e| ConfigError::Io {
                path: dir.to_path_buf(),
                source: e,
            })?;
        }
        std::fs::write(&self.path, text).map_err(|e| ConfigError::Io {
            path: self.path.clone(),
            source: e,
        })
    }
}
