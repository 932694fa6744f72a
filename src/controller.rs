//! One controller per device type.
//!
//! A controller owns the devices its [`DeviceSource`] enumerated, assigns
//! their panel ids, and restores friendly names and visibility from the
//! [`SettingsStore`].

use std::sync::Arc;
use std::sync::mpsc::Sender;

use crate::device::{ControllableDevice, DeviceError, DeviceIdentity, DeviceState};
use crate::proto::{DeviceType, ValueReport};
use crate::settings::{DeviceSettings, SettingsStore};

/// Enumerates the OS devices of one type.
pub trait DeviceSource {
    fn device_type(&self) -> DeviceType;
    fn enumerate(&self) -> Result<Vec<Box<dyn ControllableDevice>>, DeviceError>;
}

/// A value the OS changed on its own (someone moved a slider in the
/// system tray, a hotkey, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalChange {
    pub device_type: DeviceType,
    pub id: u8,
    pub value: u8,
}

/// Handed to OS change callbacks. Cheap to clone and usable from any thread.
#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    device_type: DeviceType,
    tx: Sender<LocalChange>,
}

impl ChangeNotifier {
    pub fn value_changed(&self, id: u8, value: u8) {
        let change = LocalChange {
            device_type: self.device_type,
            id,
            value,
        };
        if self.tx.send(change).is_err() {
            tracing::debug!("change for {} {} dropped, dispatcher gone", self.device_type, id);
        }
    }
}

pub struct DeviceController {
    device_type: DeviceType,
    devices: Vec<Box<dyn ControllableDevice>>,
    store: Arc<dyn SettingsStore>,
    notify: Option<Sender<LocalChange>>,
}

impl DeviceController {
    pub fn from_source(source: &dyn DeviceSource, store: Arc<dyn SettingsStore>) -> Result<Self, DeviceError> {
        Self::new(source.device_type(), source.enumerate()?, store)
    }

    /// Ids are assigned in the order given, starting at 0.
    pub fn new(
        device_type: DeviceType,
        mut devices: Vec<Box<dyn ControllableDevice>>,
        store: Arc<dyn SettingsStore>,
    ) -> Result<Self, DeviceError> {
        if devices.len() > usize::from(u8::MAX) + 1 {
            return Err(DeviceError::Unavailable(format!(
                "{} {} devices exceed the panel's id space",
                devices.len(),
                device_type
            )));
        }
        for (id, device) in devices.iter_mut().enumerate() {
            if device.device_type() != device_type {
                return Err(DeviceError::TypeMismatch {
                    expected: device_type,
                    got: device.device_type(),
                });
            }
            let identity = device.identity_mut();
            identity.id = id as u8;
            if let Some(saved) = store.load(&identity.key) {
                identity.friendly_name = saved.friendly_name;
                identity.visible = saved.visible;
            }
            tracing::info!(
                "{} {}: {} ({})",
                device_type,
                identity.id,
                identity.friendly_name,
                if identity.visible { "visible" } else { "hidden" }
            );
        }
        Ok(Self {
            device_type,
            devices,
            store,
            notify: None,
        })
    }

    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn states(&self) -> Vec<DeviceState> {
        self.devices.iter().map(|d| d.state()).collect()
    }

    pub fn get(&self, id: u8) -> Option<&dyn ControllableDevice> {
        self.devices.get(usize::from(id)).map(|d| d.as_ref())
    }

    fn get_mut(&mut self, id: u8) -> Option<&mut Box<dyn ControllableDevice>> {
        self.devices.get_mut(usize::from(id))
    }

    /// Apply a panel value report if it addresses one of this controller's
    /// devices. `None` when it does not.
    pub fn claim(&mut self, report: &ValueReport) -> Option<Result<DeviceState, DeviceError>> {
        if report.device_type != self.device_type {
            return None;
        }
        let device = self.get_mut(report.id)?;
        Some(device.apply_value(report.value).map(|()| device.state()))
    }

    /// Start publishing local changes on `tx`.
    pub fn subscribe(&mut self, tx: Sender<LocalChange>) {
        self.notify = Some(tx);
    }

    /// `None` until the controller is subscribed.
    pub fn notifier(&self) -> Option<ChangeNotifier> {
        self.notify.as_ref().map(|tx| ChangeNotifier {
            device_type: self.device_type,
            tx: tx.clone(),
        })
    }

    /// Record an OS-side value. Returns the new state, or `None` when the
    /// device is unknown or already holds that value.
    pub fn observe(&mut self, id: u8, value: u8) -> Option<DeviceState> {
        let device = self.get_mut(id)?;
        device.observe_value(value).then(|| device.state())
    }

    pub fn set_visibility(&mut self, id: u8, visible: bool) -> Result<DeviceState, DeviceError> {
        self.update_identity(id, |identity| identity.visible = visible)
    }

    pub fn rename(&mut self, id: u8, name: &str) -> Result<DeviceState, DeviceError> {
        self.update_identity(id, |identity| identity.friendly_name = name.to_string())
    }

    fn update_identity(
        &mut self,
        id: u8,
        edit: impl FnOnce(&mut DeviceIdentity),
    ) -> Result<DeviceState, DeviceError> {
        let device_type = self.device_type;
        let store = self.store.clone();
        let device = self
            .get_mut(id)
            .ok_or_else(|| DeviceError::Unavailable(format!("{} {}", device_type, id)))?;
        edit(device.identity_mut());
        let identity = device.identity();
        let settings = DeviceSettings {
            friendly_name: identity.friendly_name.clone(),
            visible: identity.visible,
        };
        if let Err(e) = store.save(&identity.key, &settings) {
            tracing::warn!("could not save settings for {}: {}", identity.key, e);
        }
        Ok(device.state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{AudioOutputDevice, DeviceIdentity, DisplayDevice};
    use crate::settings::MemorySettingsStore;
    use crate::sim::{SimBrightness, SimVolume};
    use std::sync::mpsc;

    fn speakers(key: &str, name: &str, volume: u8) -> Box<dyn ControllableDevice> {
        Box::new(AudioOutputDevice::new(
            DeviceIdentity::new(key, name),
            volume,
            false,
            Box::new(SimVolume::new(name)),
        ))
    }

    #[test]
    fn ids_follow_enumeration_order() {
        let store = Arc::new(MemorySettingsStore::new());
        let ctl = DeviceController::new(
            DeviceType::Volume,
            vec![speakers("a", "Speakers", 10), speakers("b", "Headset", 20)],
            store,
        )
        .unwrap();
        let states = ctl.states();
        assert_eq!(states[0].id, 0);
        assert_eq!(states[1].id, 1);
        assert_eq!(states[1].name, "Headset");
    }

    #[test]
    fn saved_settings_are_restored() {
        let store = Arc::new(MemorySettingsStore::new());
        store
            .save(
                "b",
                &DeviceSettings {
                    friendly_name: "Desk headset".into(),
                    visible: false,
                },
            )
            .unwrap();
        let ctl = DeviceController::new(
            DeviceType::Volume,
            vec![speakers("a", "Speakers", 10), speakers("b", "Headset", 20)],
            store,
        )
        .unwrap();
        let b = ctl.get(1).unwrap().state();
        assert_eq!(b.name, "Desk headset");
        assert!(!b.visible);
        assert!(ctl.get(0).unwrap().state().visible);
    }

    #[test]
    fn wrong_device_type_is_rejected() {
        let display: Box<dyn ControllableDevice> = Box::new(DisplayDevice::new(
            DeviceIdentity::new("DISPLAY1", "Main"),
            40,
            Box::new(SimBrightness::new("Main", Some(false))),
        ));
        let err = DeviceController::new(DeviceType::Volume, vec![display], Arc::new(MemorySettingsStore::new()));
        assert!(matches!(err, Err(DeviceError::TypeMismatch { .. })));
    }

    #[test]
    fn claim_only_matching_type_and_id() {
        let mut ctl = DeviceController::new(
            DeviceType::Volume,
            vec![speakers("a", "Speakers", 10)],
            Arc::new(MemorySettingsStore::new()),
        )
        .unwrap();
        let other_type = ValueReport {
            id: 0,
            value: 60,
            device_type: DeviceType::Brightness,
        };
        assert!(ctl.claim(&other_type).is_none());
        let unknown_id = ValueReport {
            id: 4,
            value: 60,
            device_type: DeviceType::Volume,
        };
        assert!(ctl.claim(&unknown_id).is_none());
        let ok = ValueReport {
            id: 0,
            value: 60,
            device_type: DeviceType::Volume,
        };
        assert_eq!(ctl.claim(&ok).unwrap().unwrap().value, 60);
    }

    #[test]
    fn visibility_change_is_persisted() {
        let store = Arc::new(MemorySettingsStore::new());
        let mut ctl = DeviceController::new(DeviceType::Volume, vec![speakers("a", "Speakers", 10)], store.clone())
            .unwrap();
        let state = ctl.set_visibility(0, false).unwrap();
        assert!(!state.visible);
        ctl.rename(0, "Monitors").unwrap();
        assert_eq!(
            store.load("a"),
            Some(DeviceSettings {
                friendly_name: "Monitors".into(),
                visible: false,
            })
        );
        assert!(ctl.set_visibility(7, true).is_err());
    }

    #[test]
    fn notifier_tags_changes_with_type() {
        let mut ctl = DeviceController::new(
            DeviceType::Volume,
            vec![speakers("a", "Speakers", 10)],
            Arc::new(MemorySettingsStore::new()),
        )
        .unwrap();
        assert!(ctl.notifier().is_none());
        let (tx, rx) = mpsc::channel();
        ctl.subscribe(tx);
        ctl.notifier().unwrap().value_changed(0, 33);
        assert_eq!(
            rx.try_recv().unwrap(),
            LocalChange {
                device_type: DeviceType::Volume,
                id: 0,
                value: 33,
            }
        );
    }

    #[test]
    fn observe_suppresses_unchanged_values() {
        let mut ctl = DeviceController::new(
            DeviceType::Volume,
            vec![speakers("a", "Speakers", 10)],
            Arc::new(MemorySettingsStore::new()),
        )
        .unwrap();
        assert!(ctl.observe(0, 10).is_none());
        assert_eq!(ctl.observe(0, 11).unwrap().value, 11);
        assert!(ctl.observe(9, 11).is_none());
    }
}
