//! Routes panel value reports to devices and device changes to the panel.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::mpsc::{self, Receiver};

use crate::controller::{ChangeNotifier, DeviceController, LocalChange};
use crate::device::{DeviceError, DeviceState};
use crate::proto::{DeviceType, ValueReport};
use crate::transport::Transport;

pub struct Dispatcher {
    controllers: Vec<DeviceController>,
    // (type, id) -> index into `controllers`
    registry: HashMap<(DeviceType, u8), usize>,
    changes: Receiver<LocalChange>,
}

impl Dispatcher {
    /// Takes ownership of the controllers and subscribes each to local
    /// changes. Device order for syncs follows controller order.
    pub fn new(mut controllers: Vec<DeviceController>) -> Self {
        let (tx, changes) = mpsc::channel();
        let mut registry = HashMap::new();

        for (index, controller) in controllers.iter_mut().enumerate() {
            controller.subscribe(tx.clone());
            for state in controller.states() {
                match registry.entry((state.device_type, state.id)) {
                    Entry::Vacant(slot) => {
                        slot.insert(index);
                    }
                    Entry::Occupied(_) => {
                        tracing::warn!(
                            "{} {} ({}) is already registered, ignoring",
                            state.device_type,
                            state.id,
                            state.name
                        );
                    }
                }
            }
        }
        tracing::debug!("dispatcher registered {} device(s)", registry.len());

        Self {
            controllers,
            registry,
            changes,
        }
    }

    fn controller_for(&mut self, device_type: DeviceType, id: u8) -> Option<&mut DeviceController> {
        let index = *self.registry.get(&(device_type, id))?;
        self.controllers.get_mut(index)
    }

    /// Apply a value the panel reported.
    ///
    /// `Ok(None)` when nothing is registered under the report's type and id.
    pub fn handle_value_report(&mut self, report: &ValueReport) -> Result<Option<DeviceState>, DeviceError> {
        let Some(controller) = self.controller_for(report.device_type, report.id) else {
            tracing::debug!(
                "no {} device with id {}, dropping report",
                report.device_type,
                report.id
            );
            return Ok(None);
        };
        match controller.claim(report) {
            Some(Ok(state)) => {
                tracing::info!("{} {} set to {}", state.device_type, state.name, state.value);
                Ok(Some(state))
            }
            Some(Err(e)) => {
                tracing::warn!("applying {} {}: {}", report.device_type, report.id, e);
                Err(e)
            }
            None => Ok(None),
        }
    }

    /// Drain pending local changes and send a delta for every real change.
    ///
    /// Values equal to what a device already holds are the OS echoing a
    /// panel-driven apply and are dropped. While disconnected the new value
    /// is recorded but not sent; the next sync carries it. Returns the
    /// number of deltas sent.
    pub fn forward_local_changes(&mut self, transport: &Transport) -> usize {
        let pending: Vec<LocalChange> = self.changes.try_iter().collect();
        let mut sent = 0;
        for change in pending {
            let Some(controller) = self.controller_for(change.device_type, change.id) else {
                tracing::debug!("change for unknown {} {}", change.device_type, change.id);
                continue;
            };
            let Some(state) = controller.observe(change.id, change.value) else {
                tracing::trace!("echo of {} {} = {} suppressed", change.device_type, change.id, change.value);
                continue;
            };
            if !transport.is_connected() {
                tracing::debug!("{} {} changed while disconnected", state.device_type, state.name);
                continue;
            }
            match transport.send_delta(&state) {
                Ok(true) => sent += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!("delta for {} failed: {}", state.name, e),
            }
        }
        sent
    }

    pub fn notifier(&self, device_type: DeviceType) -> Option<ChangeNotifier> {
        self.controllers
            .iter()
            .find(|c| c.device_type() == device_type)
            .and_then(DeviceController::notifier)
    }

    /// Snapshot of every device, in sync order.
    pub fn devices(&self) -> Vec<DeviceState> {
        self.controllers.iter().flat_map(DeviceController::states).collect()
    }

    pub fn device(&self, device_type: DeviceType, id: u8) -> Option<DeviceState> {
        let index = *self.registry.get(&(device_type, id))?;
        Some(self.controllers.get(index)?.get(id)?.state())
    }

    pub fn set_visibility(&mut self, device_type: DeviceType, id: u8, visible: bool) -> Result<DeviceState, DeviceError> {
        self.controller_for(device_type, id)
            .ok_or_else(|| DeviceError::Unavailable(format!("{} {}", device_type, id)))?
            .set_visibility(id, visible)
    }

    pub fn rename(&mut self, device_type: DeviceType, id: u8, name: &str) -> Result<DeviceState, DeviceError> {
        self.controller_for(device_type, id)
            .ok_or_else(|| DeviceError::Unavailable(format!("{} {}", device_type, id)))?
            .rename(id, name)
    }
}
