//! Host-side controllable devices.
//!
//! A device pairs an identity (settings key, friendly name, panel id,
//! visibility) with a capability object that talks to the OS. The OS side is
//! out of this crate's hands; it is reached only through [`BrightnessControl`]
//! and [`VolumeControl`].

use thiserror::Error;

use crate::proto::{DeviceDescriptor, DeviceType};

/// Upper end of the HDR SDR-white-level scale the compositor accepts.
pub const HDR_WHITE_LEVEL_MAX: f64 = 6.0;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("{device}: {message}")]
    Backend { device: String, message: String },
    #[error("{0} is not available")]
    Unavailable(String),
    #[error("controller for {expected} got a {got} device")]
    TypeMismatch { expected: DeviceType, got: DeviceType },
}

impl DeviceError {
    pub fn backend(device: impl Into<String>, message: impl ToString) -> Self {
        DeviceError::Backend {
            device: device.into(),
            message: message.to_string(),
        }
    }
}

/// Apply a panel value to a display.
pub trait BrightnessControl: Send {
    /// Whether HDR is on. `None` when the status cannot be determined.
    fn hdr_enabled(&self) -> Option<bool>;
    fn set_sdr_brightness(&mut self, percent: u8) -> Result<(), DeviceError>;
    fn set_hdr_white_level(&mut self, level: f64) -> Result<(), DeviceError>;
}

/// Apply a panel value to an audio endpoint.
pub trait VolumeControl: Send {
    /// `scalar` is in `0.0..=1.0`.
    fn set_volume(&mut self, scalar: f32) -> Result<(), DeviceError>;
    fn set_mute(&mut self, muted: bool) -> Result<(), DeviceError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Stable key for the settings store (monitor device path, endpoint id).
    pub key: String,
    pub friendly_name: String,
    /// Panel slot id, assigned at enumeration. Unique per device type.
    pub id: u8,
    pub visible: bool,
}

impl DeviceIdentity {
    pub fn new(key: impl Into<String>, friendly_name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            friendly_name: friendly_name.into(),
            id: 0,
            visible: true,
        }
    }
}

/// Owned snapshot of a device, safe to hand to another thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceState {
    pub key: String,
    pub name: String,
    pub id: u8,
    pub value: u8,
    pub device_type: DeviceType,
    pub visible: bool,
}

impl DeviceState {
    pub fn descriptor(&self) -> DeviceDescriptor {
        DeviceDescriptor {
            name: self.name.clone(),
            id: self.id,
            value: self.value,
            device_type: self.device_type,
        }
    }
}

pub trait ControllableDevice: Send {
    fn identity(&self) -> &DeviceIdentity;
    fn identity_mut(&mut self) -> &mut DeviceIdentity;
    fn device_type(&self) -> DeviceType;

    /// Current value as sent to the panel (0..=100).
    fn value(&self) -> u8;

    /// Push a panel-driven value through to the OS.
    fn apply_value(&mut self, value: u8) -> Result<(), DeviceError>;

    /// Record a value the OS reported on its own. Returns `false` when it
    /// matches what the device already holds.
    fn observe_value(&mut self, value: u8) -> bool;

    fn state(&self) -> DeviceState {
        let id = self.identity();
        DeviceState {
            key: id.key.clone(),
            name: id.friendly_name.clone(),
            id: id.id,
            value: self.value(),
            device_type: self.device_type(),
            visible: id.visible,
        }
    }
}

pub fn percent_to_white_level(percent: u8) -> f64 {
    f64::from(percent.min(100)) / 100.0 * HDR_WHITE_LEVEL_MAX
}

pub fn white_level_to_percent(level: f64) -> u8 {
    (level * 100.0 / HDR_WHITE_LEVEL_MAX).round().clamp(0.0, 100.0) as u8
}

// ── Display ──────────────────────────────────────────────────────────────────

pub struct DisplayDevice {
    identity: DeviceIdentity,
    brightness: u8,
    hdr_enabled: bool,
    control: Box<dyn BrightnessControl>,
}

impl DisplayDevice {
    pub fn new(identity: DeviceIdentity, brightness: u8, control: Box<dyn BrightnessControl>) -> Self {
        let hdr_enabled = control.hdr_enabled().unwrap_or(false);
        Self {
            identity,
            brightness: brightness.min(100),
            hdr_enabled,
            control,
        }
    }

    pub fn hdr_enabled(&self) -> bool {
        self.hdr_enabled
    }
}

impl ControllableDevice for DisplayDevice {
    fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    fn identity_mut(&mut self) -> &mut DeviceIdentity {
        &mut self.identity
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::Brightness
    }

    fn value(&self) -> u8 {
        self.brightness
    }

    fn apply_value(&mut self, value: u8) -> Result<(), DeviceError> {
        let percent = value.min(100);
        // unknown HDR status degrades to plain SDR brightness
        self.hdr_enabled = self.control.hdr_enabled().unwrap_or_else(|| {
            tracing::debug!(display = %self.identity.friendly_name, "HDR status unknown, assuming SDR");
            false
        });
        if self.hdr_enabled {
            let level = percent_to_white_level(percent);
            self.control.set_hdr_white_level(level)?;
            tracing::debug!(
                display = %self.identity.friendly_name,
                "HDR white level {:.2} ({}%)",
                level,
                white_level_to_percent(level)
            );
        } else {
            self.control.set_sdr_brightness(percent)?;
        }
        self.brightness = percent;
        Ok(())
    }

    fn observe_value(&mut self, value: u8) -> bool {
        let value = value.min(100);
        if value == self.brightness {
            return false;
        }
        self.brightness = value;
        true
    }
}

// ── Audio output ─────────────────────────────────────────────────────────────

pub struct AudioOutputDevice {
    identity: DeviceIdentity,
    volume: u8,
    muted: bool,
    control: Box<dyn VolumeControl>,
}

impl AudioOutputDevice {
    pub fn new(
        identity: DeviceIdentity,
        volume: u8,
        muted: bool,
        control: Box<dyn VolumeControl>,
    ) -> Self {
        Self {
            identity,
            volume: volume.min(100),
            muted,
            control,
        }
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }
}

impl ControllableDevice for AudioOutputDevice {
    fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    fn identity_mut(&mut self) -> &mut DeviceIdentity {
        &mut self.identity
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::Volume
    }

    fn value(&self) -> u8 {
        if self.muted { 0 } else { self.volume }
    }

    /// Zero mutes; anything else unmutes and sets the level.
    fn apply_value(&mut self, value: u8) -> Result<(), DeviceError> {
        let value = value.min(100);
        if value == 0 {
            self.control.set_mute(true)?;
            self.muted = true;
            return Ok(());
        }
        if self.muted {
            self.control.set_mute(false)?;
            self.muted = false;
        }
        self.control.set_volume(f32::from(value) / 100.0)?;
        self.volume = value;
        Ok(())
    }

    fn observe_value(&mut self, value: u8) -> bool {
        let value = value.min(100);
        if value == self.value() {
            return false;
        }
        if value == 0 {
            self.muted = true;
        } else {
            self.muted = false;
            self.volume = value;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Sdr(u8),
        Hdr(f64),
        Volume(f32),
        Mute(bool),
    }

    #[derive(Clone, Default)]
    struct Recorder {
        calls: Arc<Mutex<Vec<Call>>>,
        hdr: Option<bool>,
    }

    impl Recorder {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl BrightnessControl for Recorder {
        fn hdr_enabled(&self) -> Option<bool> {
            self.hdr
        }
        fn set_sdr_brightness(&mut self, percent: u8) -> Result<(), DeviceError> {
            self.calls.lock().unwrap().push(Call::Sdr(percent));
            Ok(())
        }
        fn set_hdr_white_level(&mut self, level: f64) -> Result<(), DeviceError> {
            self.calls.lock().unwrap().push(Call::Hdr(level));
            Ok(())
        }
    }

    impl VolumeControl for Recorder {
        fn set_volume(&mut self, scalar: f32) -> Result<(), DeviceError> {
            self.calls.lock().unwrap().push(Call::Volume(scalar));
            Ok(())
        }
        fn set_mute(&mut self, muted: bool) -> Result<(), DeviceError> {
            self.calls.lock().unwrap().push(Call::Mute(muted));
            Ok(())
        }
    }

    struct Broken;

    impl VolumeControl for Broken {
        fn set_volume(&mut self, _: f32) -> Result<(), DeviceError> {
            Err(DeviceError::backend("Speakers", "endpoint gone"))
        }
        fn set_mute(&mut self, _: bool) -> Result<(), DeviceError> {
            Ok(())
        }
    }

    fn display(hdr: Option<bool>) -> (DisplayDevice, Recorder) {
        let rec = Recorder {
            hdr,
            ..Default::default()
        };
        let dev = DisplayDevice::new(DeviceIdentity::new("DISPLAY1", "Main"), 30, Box::new(rec.clone()));
        (dev, rec)
    }

    fn speakers() -> (AudioOutputDevice, Recorder) {
        let rec = Recorder::default();
        let dev = AudioOutputDevice::new(
            DeviceIdentity::new("{0.0.0.00000000}.{speakers}", "Speakers"),
            40,
            false,
            Box::new(rec.clone()),
        );
        (dev, rec)
    }

    #[test]
    fn sdr_display_clamps_to_percent() {
        let (mut dev, rec) = display(Some(false));
        dev.apply_value(180).unwrap();
        assert_eq!(rec.calls(), vec![Call::Sdr(100)]);
        assert_eq!(dev.value(), 100);
    }

    #[test]
    fn hdr_display_uses_white_level() {
        let (mut dev, rec) = display(Some(true));
        dev.apply_value(50).unwrap();
        assert_eq!(rec.calls(), vec![Call::Hdr(3.0)]);
        assert!(dev.hdr_enabled());
    }

    #[test]
    fn unknown_hdr_status_falls_back_to_sdr() {
        let (mut dev, rec) = display(None);
        dev.apply_value(20).unwrap();
        assert_eq!(rec.calls(), vec![Call::Sdr(20)]);
    }

    #[test]
    fn white_level_conversion() {
        assert_eq!(percent_to_white_level(0), 0.0);
        assert_eq!(percent_to_white_level(100), 6.0);
        assert_eq!(white_level_to_percent(3.0), 50);
        assert_eq!(white_level_to_percent(9.0), 100);
    }

    #[test]
    fn zero_volume_mutes_and_reports_zero() {
        let (mut dev, rec) = speakers();
        dev.apply_value(0).unwrap();
        assert!(dev.is_muted());
        assert_eq!(dev.value(), 0);
        dev.apply_value(25).unwrap();
        assert_eq!(
            rec.calls(),
            vec![Call::Mute(true), Call::Mute(false), Call::Volume(0.25)]
        );
        assert_eq!(dev.value(), 25);
    }

    #[test]
    fn failed_apply_keeps_old_value() {
        let mut dev = AudioOutputDevice::new(
            DeviceIdentity::new("spk", "Speakers"),
            40,
            false,
            Box::new(Broken),
        );
        assert!(dev.apply_value(70).is_err());
        assert_eq!(dev.value(), 40);
    }

    #[test]
    fn observe_same_value_is_not_a_change() {
        let (mut dev, _) = speakers();
        dev.apply_value(55).unwrap();
        assert!(!dev.observe_value(55));
        assert!(dev.observe_value(60));
        assert_eq!(dev.value(), 60);
    }

    #[test]
    fn state_snapshot_carries_identity() {
        let (dev, _) = display(Some(false));
        let state = dev.state();
        assert_eq!(state.name, "Main");
        assert_eq!(state.value, 30);
        assert_eq!(state.device_type, DeviceType::Brightness);
        assert!(state.visible);
        assert_eq!(state.descriptor().name, "Main");
    }
}
