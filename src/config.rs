//! TOML configuration.
//!
//! ```toml
//! settings_path = "devices.toml"
//!
//! [serial]
//! baud = 115200
//! probe_timeout_ms = 100
//! resync_interval_ms = 30000
//!
//! [[devices]]
//! kind = "display"
//! key = "DISPLAY1"
//! name = "Main"
//! value = 40
//! hdr = true
//! ```
//!
//! Every field has a default; a missing file is the same as an empty one.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::probe::Handshake;
use crate::proto::{DEFAULT_RX_CAPACITY, NameWidth};
use crate::transport::TransportSettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("serializing settings: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("settings lock poisoned")]
    Poisoned,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub serial: SerialConfig,
    /// Where friendly names and visibility are persisted. In memory when unset.
    pub settings_path: Option<PathBuf>,
    pub devices: Vec<SimDeviceConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Skip probing and always use this port.
    pub port: Option<String>,
    pub baud: u32,
    pub handshake: String,
    pub expected_response: String,
    pub probe_timeout_ms: u64,
    pub inter_frame_delay_ms: u64,
    /// Wait after a port shows up before probing it.
    pub settle_delay_ms: u64,
    pub reconnect_interval_ms: u64,
    /// 0 disables periodic resync.
    pub resync_interval_ms: u64,
    pub name_width: usize,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud: 115_200,
            handshake: "HELLO_LUMIN".into(),
            expected_response: "LUMIN_ACK".into(),
            probe_timeout_ms: 100,
            inter_frame_delay_ms: 10,
            settle_delay_ms: 2000,
            reconnect_interval_ms: 5000,
            resync_interval_ms: 0,
            name_width: 32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimDeviceKind {
    Display,
    Audio,
}

/// A device served by the simulated backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimDeviceConfig {
    pub kind: SimDeviceKind,
    pub key: String,
    pub name: String,
    #[serde(default = "default_value")]
    pub value: u8,
    /// HDR status reported by a simulated display; absent means unknown.
    #[serde(default)]
    pub hdr: Option<bool>,
    #[serde(default)]
    pub muted: bool,
}

fn default_value() -> u8 {
    50
}

impl BridgeConfig {
    /// Load from `path`. `None` or a missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        };
        let config = Self::parse(&text).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse {
            path: PathBuf::new(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.serial;
        if s.baud == 0 {
            return Err(ConfigError::Invalid("baud must be non-zero".into()));
        }
        if s.handshake.is_empty() || s.handshake.contains('\n') {
            return Err(ConfigError::Invalid("handshake must be one non-empty line".into()));
        }
        if s.expected_response.trim().is_empty() {
            return Err(ConfigError::Invalid("expected_response is empty".into()));
        }
        if s.probe_timeout_ms == 0 {
            return Err(ConfigError::Invalid("probe_timeout_ms must be non-zero".into()));
        }
        NameWidth::from_bytes(s.name_width).ok_or_else(|| {
            ConfigError::Invalid(format!("name_width must be 16 or 32, got {}", s.name_width))
        })?;
        for d in &self.devices {
            if d.value > 100 {
                return Err(ConfigError::Invalid(format!(
                    "device {}: value {} is above 100",
                    d.key, d.value
                )));
            }
        }
        if let Some(dup) = self
            .devices
            .iter()
            .enumerate()
            .find(|(i, d)| self.devices[..*i].iter().any(|o| o.key == d.key))
        {
            return Err(ConfigError::Invalid(format!("duplicate device key {}", dup.1.key)));
        }
        Ok(())
    }

    pub fn handshake(&self) -> Handshake {
        Handshake {
            message: self.serial.handshake.clone(),
            expected: self.serial.expected_response.clone(),
            baud: self.serial.baud,
            timeout: Duration::from_millis(self.serial.probe_timeout_ms),
        }
    }

    pub fn transport_settings(&self) -> TransportSettings {
        TransportSettings {
            handshake: self.handshake(),
            inter_frame_delay: Duration::from_millis(self.serial.inter_frame_delay_ms),
            name_width: NameWidth::from_bytes(self.serial.name_width).unwrap_or_default(),
            rx_capacity: DEFAULT_RX_CAPACITY,
            port: self.serial.port.clone(),
        }
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.serial.settle_delay_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.serial.reconnect_interval_ms)
    }

    pub fn resync_interval(&self) -> Option<Duration> {
        match self.serial.resync_interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}
