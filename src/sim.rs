//! Stand-in OS backends.
//!
//! The real display and audio APIs are platform specific and live outside
//! this crate. These implementations log what would have been applied and
//! keep the last values, so the bridge can run against a panel with devices
//! declared in the config file.

use std::sync::{Arc, Mutex};

use crate::config::{SimDeviceConfig, SimDeviceKind};
use crate::controller::DeviceSource;
use crate::device::{
    AudioOutputDevice, BrightnessControl, ControllableDevice, DeviceError, DeviceIdentity, DisplayDevice,
    VolumeControl,
};
use crate::proto::DeviceType;

/// What a simulated backend was last told to do.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Applied {
    pub sdr_brightness: Option<u8>,
    pub hdr_white_level: Option<f64>,
    pub volume: Option<f32>,
    pub muted: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct SimBrightness {
    name: String,
    hdr: Option<bool>,
    applied: Arc<Mutex<Applied>>,
}

impl SimBrightness {
    pub fn new(name: &str, hdr: Option<bool>) -> Self {
        Self {
            name: name.to_string(),
            hdr,
            applied: Arc::default(),
        }
    }

    /// Shared view of the applied values, still readable after the backend
    /// has been moved into a device.
    pub fn applied(&self) -> Arc<Mutex<Applied>> {
        self.applied.clone()
    }

    fn record(&self, f: impl FnOnce(&mut Applied)) -> Result<(), DeviceError> {
        let mut applied = self
            .applied
            .lock()
            .map_err(|_| DeviceError::backend(self.name.as_str(), "state lock poisoned"))?;
        f(&mut applied);
        Ok(())
    }
}

impl BrightnessControl for SimBrightness {
    fn hdr_enabled(&self) -> Option<bool> {
        self.hdr
    }

    fn set_sdr_brightness(&mut self, percent: u8) -> Result<(), DeviceError> {
        tracing::info!("[sim] {} brightness -> {}%", self.name, percent);
        self.record(|a| a.sdr_brightness = Some(percent))
    }

    fn set_hdr_white_level(&mut self, level: f64) -> Result<(), DeviceError> {
        tracing::info!("[sim] {} HDR white level -> {:.2}", self.name, level);
        self.record(|a| a.hdr_white_level = Some(level))
    }
}

#[derive(Debug, Clone)]
pub struct SimVolume {
    name: String,
    applied: Arc<Mutex<Applied>>,
}

impl SimVolume {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            applied: Arc::default(),
        }
    }

    pub fn applied(&self) -> Arc<Mutex<Applied>> {
        self.applied.clone()
    }

    fn record(&self, f: impl FnOnce(&mut Applied)) -> Result<(), DeviceError> {
        let mut applied = self
            .applied
            .lock()
            .map_err(|_| DeviceError::backend(self.name.as_str(), "state lock poisoned"))?;
        f(&mut applied);
        Ok(())
    }
}

impl VolumeControl for SimVolume {
    fn set_volume(&mut self, scalar: f32) -> Result<(), DeviceError> {
        tracing::info!("[sim] {} volume -> {:.2}", self.name, scalar);
        self.record(|a| a.volume = Some(scalar))
    }

    fn set_mute(&mut self, muted: bool) -> Result<(), DeviceError> {
        tracing::info!("[sim] {} {}", self.name, if muted { "muted" } else { "unmuted" });
        self.record(|a| a.muted = Some(muted))
    }
}

/// Devices of one type declared under `[[devices]]`.
pub struct ConfigSource {
    device_type: DeviceType,
    devices: Vec<SimDeviceConfig>,
}

impl ConfigSource {
    pub fn new(device_type: DeviceType, devices: &[SimDeviceConfig]) -> Self {
        let kind = match device_type {
            DeviceType::Brightness => SimDeviceKind::Display,
            DeviceType::Volume => SimDeviceKind::Audio,
        };
        Self {
            device_type,
            devices: devices.iter().filter(|d| d.kind == kind).cloned().collect(),
        }
    }
}

impl DeviceSource for ConfigSource {
    fn device_type(&self) -> DeviceType {
        self.device_type
    }

    fn enumerate(&self) -> Result<Vec<Box<dyn ControllableDevice>>, DeviceError> {
        Ok(self
            .devices
            .iter()
            .map(|d| -> Box<dyn ControllableDevice> {
                let identity = DeviceIdentity::new(d.key.as_str(), d.name.as_str());
                match d.kind {
                    SimDeviceKind::Display => Box::new(DisplayDevice::new(
                        identity,
                        d.value,
                        Box::new(SimBrightness::new(&d.name, d.hdr)),
                    )),
                    SimDeviceKind::Audio => Box::new(AudioOutputDevice::new(
                        identity,
                        d.value,
                        d.muted,
                        Box::new(SimVolume::new(&d.name)),
                    )),
                }
            })
            .collect())
    }
}
