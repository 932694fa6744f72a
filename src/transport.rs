//! The serial session with the panel.
//!
//! A [`Transport`] holds at most one open session. Each session has a reader
//! thread that owns a cloned handle, reassembles frames and publishes
//! [`BridgeEvent`]s on a channel; sends go through a mutex-guarded writer on
//! the caller's thread.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use thiserror::Error;

use crate::device::DeviceState;
use crate::port::{PortProvider, SESSION_READ_TIMEOUT, SerialLink};
use crate::probe::{Handshake, identify};
use crate::proto::{Codec, CodecError, DEFAULT_RX_CAPACITY, FrameReceiver, NameWidth, Packet, ValueReport};

#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub handshake: Handshake,
    /// Pause after every frame of a multi-frame update.
    pub inter_frame_delay: Duration,
    pub name_width: NameWidth,
    pub rx_capacity: usize,
    /// Fixed port; probing is skipped when set.
    pub port: Option<String>,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            handshake: Handshake::default(),
            inter_frame_delay: Duration::from_millis(10),
            name_width: NameWidth::default(),
            rx_capacity: DEFAULT_RX_CAPACITY,
            port: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    Connected { port: String },
    Disconnected { port: String },
    ValueReport(ValueReport),
    Error(String),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("not connected")]
    NotConnected,
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("write failed: {0}")]
    Write(io::Error),
    #[error("opening {port}: {source}")]
    Open { port: String, source: io::Error },
    #[error("listing ports: {0}")]
    Enumerate(io::Error),
    #[error("cancelled")]
    Cancelled,
}

struct Session {
    port: String,
    writer: Mutex<Box<dyn SerialLink>>,
    alive: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl Session {
    /// Flip to dead. Only the first caller gets `true`.
    fn mark_dead(&self) -> bool {
        self.alive.swap(false, Ordering::SeqCst)
    }
}

pub struct Transport {
    provider: Arc<dyn PortProvider>,
    settings: TransportSettings,
    codec: Codec,
    events: Sender<BridgeEvent>,
    session: Option<Session>,
}

impl Transport {
    pub fn new(provider: Arc<dyn PortProvider>, settings: TransportSettings, events: Sender<BridgeEvent>) -> Self {
        let codec = Codec::new(settings.name_width);
        Self {
            provider,
            settings,
            codec,
            events,
            session: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.alive.load(Ordering::SeqCst))
    }

    pub fn port_name(&self) -> Option<&str> {
        self.session
            .as_ref()
            .filter(|s| s.alive.load(Ordering::SeqCst))
            .map(|s| s.port.as_str())
    }

    /// Open `port` for steady-state traffic and start its reader.
    ///
    /// Any previous session is disposed first. On failure an
    /// [`BridgeEvent::Error`] is published and the transport stays
    /// disconnected.
    pub fn connect(&mut self, port: &str) -> Result<(), TransportError> {
        self.dispose();
        match self.open_session(port) {
            Ok(session) => {
                tracing::info!("connected to {}", port);
                self.session = Some(session);
                self.emit(BridgeEvent::Connected { port: port.to_string() });
                Ok(())
            }
            Err(e) => {
                tracing::error!("{}", e);
                self.emit(BridgeEvent::Error(e.to_string()));
                Err(e)
            }
        }
    }

    fn open_session(&self, port: &str) -> Result<Session, TransportError> {
        let open_err = |source| TransportError::Open {
            port: port.to_string(),
            source,
        };
        let mut link = self
            .provider
            .open(port, self.settings.handshake.baud, SESSION_READ_TIMEOUT)
            .map_err(open_err)?;
        link.clear_buffers().map_err(open_err)?;
        let reader_link = link.try_clone_link().map_err(open_err)?;

        let alive = Arc::new(AtomicBool::new(true));
        let stop = Arc::new(AtomicBool::new(false));
        let reader = {
            let ctx = ReaderContext {
                port: port.to_string(),
                codec: self.codec,
                capacity: self.settings.rx_capacity,
                alive: alive.clone(),
                stop: stop.clone(),
                events: self.events.clone(),
            };
            std::thread::Builder::new()
                .name(format!("lumin-rx-{}", port))
                .spawn(move || ctx.run(reader_link))
                .map_err(open_err)?
        };

        Ok(Session {
            port: port.to_string(),
            writer: Mutex::new(link),
            alive,
            stop,
            reader: Some(reader),
        })
    }

    /// Make sure the panel is connected and has the current device list.
    ///
    /// Returns `true` right away when already connected. Otherwise probes
    /// the available ports (or uses the configured one), connects, and sends
    /// a full update. Returns `false` when no panel was found or any step
    /// failed; a failed initial sync leaves the transport disconnected.
    pub fn connect_and_sync(&mut self, devices: &[DeviceState], cancel: &AtomicBool) -> bool {
        if self.is_connected() {
            return true;
        }
        // a session that died on its own still has a reader to join
        self.dispose();

        let port = match &self.settings.port {
            Some(port) => Some(port.clone()),
            None => {
                let candidates = match self.provider.available_ports() {
                    Ok(c) => c,
                    Err(e) => {
                        let e = TransportError::Enumerate(e);
                        tracing::error!("{}", e);
                        self.emit(BridgeEvent::Error(e.to_string()));
                        return false;
                    }
                };
                tracing::debug!("probing {} port(s)", candidates.len());
                identify(self.provider.as_ref(), &candidates, &self.settings.handshake, cancel)
            }
        };
        let Some(port) = port else {
            tracing::info!("panel not found");
            return false;
        };

        if self.connect(&port).is_err() {
            return false;
        }
        match self.send_update(devices, cancel) {
            Ok(n) => {
                tracing::info!("synced {} device(s) to {}", n, port);
                true
            }
            Err(e) => {
                tracing::warn!("initial sync failed: {}", e);
                // a half-synced panel must get a full reset next time
                self.dispose();
                false
            }
        }
    }

    /// Reset the panel's matrix and send every visible device, in order.
    ///
    /// `cancel` is checked between frames; a cancelled update returns
    /// [`TransportError::Cancelled`]. Returns the number of devices sent.
    pub fn send_update(&self, devices: &[DeviceState], cancel: &AtomicBool) -> Result<usize, TransportError> {
        self.write_packet(&Packet::ResetDeviceMatrix)?;
        self.pause();

        let mut sent = 0;
        for device in devices {
            if cancel.load(Ordering::Relaxed) {
                tracing::debug!("update cancelled after {} device(s)", sent);
                return Err(TransportError::Cancelled);
            }
            if !device.visible {
                tracing::debug!("not sending hidden {} {}", device.device_type, device.name);
                continue;
            }
            self.write_packet(&Packet::DeltaUpdate(device.descriptor()))?;
            self.pause();
            sent += 1;
        }
        Ok(sent)
    }

    /// Send one device. Returns `Ok(false)` for a hidden device.
    pub fn send_delta(&self, device: &DeviceState) -> Result<bool, TransportError> {
        if !device.visible {
            tracing::debug!("not sending hidden {} {}", device.device_type, device.name);
            return Ok(false);
        }
        if !self.is_connected() {
            self.emit(BridgeEvent::Error(format!(
                "cannot send {} {}: not connected",
                device.device_type, device.name
            )));
            return Err(TransportError::NotConnected);
        }
        self.write_packet(&Packet::DeltaUpdate(device.descriptor()))?;
        tracing::debug!("sent {} {} = {}", device.device_type, device.name, device.value);
        Ok(true)
    }

    /// All visible devices in a single `FullSync` frame.
    pub fn send_full_sync(&self, devices: &[DeviceState]) -> Result<(), TransportError> {
        let visible = devices
            .iter()
            .filter(|d| d.visible)
            .map(DeviceState::descriptor)
            .collect();
        self.write_packet(&Packet::FullSync(visible))
    }

    /// Stop the reader, join it and close the port. Safe to call any number
    /// of times.
    pub fn dispose(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        session.stop.store(true, Ordering::SeqCst);
        if session.mark_dead() {
            self.emit(BridgeEvent::Disconnected {
                port: session.port.clone(),
            });
        }
        if let Some(reader) = session.reader.take()
            && reader.join().is_err()
        {
            tracing::warn!("reader for {} panicked", session.port);
        }
        tracing::info!("closed {}", session.port);
    }

    fn write_packet(&self, packet: &Packet) -> Result<(), TransportError> {
        let session = self
            .session
            .as_ref()
            .filter(|s| s.alive.load(Ordering::SeqCst))
            .ok_or(TransportError::NotConnected)?;
        let bytes = self.codec.encode_frame(packet)?;

        let result = {
            let mut writer = session.writer.lock().unwrap_or_else(|e| e.into_inner());
            writer.write_all(&bytes).and_then(|_| writer.flush())
        };
        if let Err(e) = result {
            tracing::error!("write to {} failed: {}", session.port, e);
            if session.mark_dead() {
                self.emit(BridgeEvent::Error(format!("write to {} failed: {}", session.port, e)));
                self.emit(BridgeEvent::Disconnected {
                    port: session.port.clone(),
                });
            }
            return Err(TransportError::Write(e));
        }
        Ok(())
    }

    fn pause(&self) {
        if !self.settings.inter_frame_delay.is_zero() {
            std::thread::sleep(self.settings.inter_frame_delay);
        }
    }

    fn emit(&self, event: BridgeEvent) {
        // nobody listening is not an error
        let _ = self.events.send(event);
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.dispose();
    }
}

/* ---------- reader thread ---------- */

struct ReaderContext {
    port: String,
    codec: Codec,
    capacity: usize,
    alive: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    events: Sender<BridgeEvent>,
}

impl ReaderContext {
    fn run(self, mut link: Box<dyn SerialLink>) {
        let mut rx = FrameReceiver::with_capacity(self.capacity);
        let mut buf = [0u8; 64];
        tracing::debug!("reader for {} started", self.port);

        while !self.stop.load(Ordering::SeqCst) {
            match link.read(&mut buf) {
                Ok(0) => {}
                Ok(n) => rx.feed(&buf[..n], |payload| self.on_payload(payload)),
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut | io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
                    ) => {}
                Err(e) => {
                    if self.alive.swap(false, Ordering::SeqCst) {
                        tracing::error!("read from {} failed: {}", self.port, e);
                        let _ = self
                            .events
                            .send(BridgeEvent::Error(format!("read from {} failed: {}", self.port, e)));
                        let _ = self.events.send(BridgeEvent::Disconnected {
                            port: self.port.clone(),
                        });
                    }
                    break;
                }
            }
        }

        let stats = rx.stats();
        tracing::debug!(
            frames = stats.frames,
            oversized = stats.oversized,
            empty = stats.empty,
            "reader for {} stopped",
            self.port
        );
    }

    fn on_payload(&self, payload: &[u8]) {
        match self.codec.decode(payload) {
            Ok(Packet::ValueReport(report)) => {
                tracing::debug!(
                    "value report: {} {} = {}",
                    report.device_type,
                    report.id,
                    report.value
                );
                let _ = self.events.send(BridgeEvent::ValueReport(report));
            }
            Ok(other) => tracing::debug!("ignoring {:?} from panel", other.packet_type()),
            Err(CodecError::UnknownPacketType(t)) => {
                tracing::warn!("unknown packet type 0x{:02X} from panel", t)
            }
            Err(e) => tracing::warn!("dropping malformed frame: {}", e),
        }
    }
}
