//! The bridge service loop and its console commands.

use std::io::BufRead;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use thiserror::Error;

use crate::config::BridgeConfig;
use crate::controller::DeviceController;
use crate::dispatch::Dispatcher;
use crate::port::PortProvider;
use crate::proto::DeviceType;
use crate::settings::{MemorySettingsStore, SettingsStore, TomlSettingsStore};
use crate::sim::ConfigSource;
use crate::stats::BridgeStats;
use crate::transport::{BridgeEvent, Transport, TransportSettings};
use crate::watch::{PortChange, PortWatcher};

/* ---------- console commands ---------- */

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Pretend the OS changed a value (`vol:<id>:<value>`, `bri:<id>:<value>`).
    SetValue {
        device_type: DeviceType,
        id: u8,
        value: u8,
    },
    Show { device_type: DeviceType, id: u8 },
    Hide { device_type: DeviceType, id: u8 },
    Rename {
        device_type: DeviceType,
        id: u8,
        name: String,
    },
    Sync,
    FullSync,
    Status,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("empty line")]
    Empty,
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("invalid integer for {0}: {1}")]
    BadInt(&'static str, String),
    #[error("unknown device type: {0}")]
    BadType(String),
    #[error("value {0} is above 100")]
    OutOfRange(u8),
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        if line.is_empty() {
            return Err(CommandError::Empty);
        }
        let mut parts = line.splitn(4, ':');
        let tag = parts.next().unwrap_or_default().to_ascii_lowercase();

        match tag.as_str() {
            "vol" | "bri" => {
                let device_type = if tag == "vol" {
                    DeviceType::Volume
                } else {
                    DeviceType::Brightness
                };
                let id = int_field(parts.next(), "id")?;
                let value = int_field(parts.next(), "value")?;
                if value > 100 {
                    return Err(CommandError::OutOfRange(value));
                }
                Ok(Command::SetValue { device_type, id, value })
            }
            "show" | "hide" => {
                let device_type = type_field(parts.next())?;
                let id = int_field(parts.next(), "id")?;
                Ok(if tag == "show" {
                    Command::Show { device_type, id }
                } else {
                    Command::Hide { device_type, id }
                })
            }
            "name" => {
                let device_type = type_field(parts.next())?;
                let id = int_field(parts.next(), "id")?;
                let name = parts
                    .next()
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .ok_or(CommandError::MissingField("name"))?;
                Ok(Command::Rename {
                    device_type,
                    id,
                    name: name.to_string(),
                })
            }
            "sync" => Ok(Command::Sync),
            "fullsync" => Ok(Command::FullSync),
            "status" => Ok(Command::Status),
            "quit" | "exit" => Ok(Command::Quit),
            _ => Err(CommandError::UnknownCommand(tag)),
        }
    }
}

/* ---------- helpers ---------- */

fn int_field(raw: Option<&str>, name: &'static str) -> Result<u8, CommandError> {
    let raw = raw.map(str::trim).ok_or(CommandError::MissingField(name))?;
    raw.parse()
        .map_err(|_| CommandError::BadInt(name, raw.to_string()))
}

fn type_field(raw: Option<&str>) -> Result<DeviceType, CommandError> {
    let raw = raw.map(str::trim).ok_or(CommandError::MissingField("type"))?;
    raw.parse().map_err(CommandError::BadType)
}

/// Console commands, one per line, until `quit` or end of input. Either one
/// also sets `cancel` so a probe in flight stops too.
pub fn read_console(input: impl BufRead, tx: &Sender<Command>, cancel: &AtomicBool) {
    for line in input.lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        match line.parse::<Command>() {
            Ok(Command::Quit) => {
                cancel.store(true, Ordering::SeqCst);
                let _ = tx.send(Command::Quit);
                return;
            }
            Ok(cmd) => {
                if tx.send(cmd).is_err() {
                    return;
                }
            }
            Err(e) => tracing::warn!("{}: {}", line.trim(), e),
        }
    }
    tracing::debug!("console closed");
    cancel.store(true, Ordering::SeqCst);
}

/* ---------- service ---------- */

#[derive(Debug, Clone)]
pub struct ServiceOptions {
    /// Delay before the first connection attempt.
    pub initial_delay: Duration,
    /// Wait after a port appears (or the panel drops) before probing.
    pub settle_delay: Duration,
    /// Retry interval while no panel is found. Zero disables retries.
    pub reconnect_interval: Duration,
    pub resync_interval: Option<Duration>,
    pub port_poll_interval: Duration,
    pub stats_interval: Duration,
    /// How long one loop iteration waits for transport events.
    pub tick: Duration,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            settle_delay: Duration::from_secs(2),
            reconnect_interval: Duration::from_secs(5),
            resync_interval: None,
            port_poll_interval: Duration::from_millis(500),
            stats_interval: Duration::from_secs(60),
            tick: Duration::from_millis(50),
        }
    }
}

impl ServiceOptions {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            settle_delay: config.settle_delay(),
            reconnect_interval: config.reconnect_interval(),
            resync_interval: config.resync_interval(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Owns the dispatcher and the transport. Everything that touches a device
/// runs on the thread that drives this.
pub struct BridgeService {
    provider: Arc<dyn PortProvider>,
    transport: Transport,
    dispatcher: Dispatcher,
    events: Receiver<BridgeEvent>,
    watcher: PortWatcher,
    options: ServiceOptions,
    cancel: Arc<AtomicBool>,
    stats: BridgeStats,
    next_connect: Option<Instant>,
    next_resync: Option<Instant>,
    last_poll: Instant,
}

impl BridgeService {
    pub fn new(
        provider: Arc<dyn PortProvider>,
        settings: TransportSettings,
        dispatcher: Dispatcher,
        options: ServiceOptions,
    ) -> Self {
        let (tx, events) = mpsc::channel();
        let transport = Transport::new(provider.clone(), settings, tx);
        let watcher = PortWatcher::new(provider.available_ports().unwrap_or_default());
        let now = Instant::now();
        Self {
            provider,
            transport,
            dispatcher,
            events,
            watcher,
            next_connect: Some(now + options.initial_delay),
            next_resync: None,
            last_poll: now,
            options,
            cancel: Arc::new(AtomicBool::new(false)),
            stats: BridgeStats::new(),
        }
    }

    /// Devices come from `[[devices]]`, settings from `settings_path` if set.
    pub fn from_config(config: &BridgeConfig, provider: Arc<dyn PortProvider>) -> Result<Self> {
        let store: Arc<dyn SettingsStore> = match &config.settings_path {
            Some(path) => Arc::new(TomlSettingsStore::new(path)),
            None => Arc::new(MemorySettingsStore::new()),
        };
        // displays first; the panel lists devices in the order they are sent
        let controllers = [DeviceType::Brightness, DeviceType::Volume]
            .into_iter()
            .map(|t| {
                DeviceController::from_source(&ConfigSource::new(t, &config.devices), store.clone())
                    .with_context(|| format!("enumerating {} devices", t))
            })
            .collect::<Result<Vec<_>>>()?;
        if controllers.iter().all(DeviceController::is_empty) {
            tracing::warn!("no devices configured; the panel will stay empty");
        }
        Ok(Self::new(
            provider,
            config.transport_settings(),
            Dispatcher::new(controllers),
            ServiceOptions::from_config(config),
        ))
    }

    /// Setting this stops the loop and aborts any probe or sync in flight.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn stats(&self) -> &BridgeStats {
        &self.stats
    }

    pub fn run(&mut self, commands: Receiver<Command>) -> Result<()> {
        tracing::info!("bridge running");
        while !self.cancel.load(Ordering::Relaxed) {
            if self.step(&commands) == Flow::Quit {
                break;
            }
        }
        self.transport.dispose();
        self.stats.log();
        Ok(())
    }

    /// One loop iteration. Blocks for at most one tick waiting for events.
    pub fn step(&mut self, commands: &Receiver<Command>) -> Flow {
        let now = Instant::now();
        if self.next_connect.is_some_and(|at| now >= at) {
            self.try_connect();
        }

        match self.events.recv_timeout(self.options.tick) {
            Ok(ev) => {
                self.handle_event(ev);
                while let Ok(ev) = self.events.try_recv() {
                    self.handle_event(ev);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            // the transport holds a sender for as long as we do
            Err(RecvTimeoutError::Disconnected) => {}
        }

        loop {
            match commands.try_recv() {
                Ok(cmd) => {
                    if self.execute(cmd) == Flow::Quit {
                        return Flow::Quit;
                    }
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }

        let sent = self.dispatcher.forward_local_changes(&self.transport);
        self.stats.add_deltas(sent);

        if self.last_poll.elapsed() >= self.options.port_poll_interval {
            self.last_poll = Instant::now();
            self.watch_ports();
        }

        if self.transport.is_connected()
            && self.next_resync.is_some_and(|at| Instant::now() >= at)
        {
            tracing::debug!("periodic resync");
            self.resync();
        }

        self.stats.maybe_log(self.options.stats_interval);
        Flow::Continue
    }

    pub fn execute(&mut self, cmd: Command) -> Flow {
        match cmd {
            Command::SetValue { device_type, id, value } => match self.dispatcher.notifier(device_type) {
                Some(n) => n.value_changed(id, value),
                None => tracing::warn!("no {} devices", device_type),
            },
            Command::Show { device_type, id } => self.set_visibility(device_type, id, true),
            Command::Hide { device_type, id } => self.set_visibility(device_type, id, false),
            Command::Rename { device_type, id, name } => {
                match self.dispatcher.rename(device_type, id, &name) {
                    Ok(_) => self.resync(),
                    Err(e) => tracing::warn!("rename failed: {}", e),
                }
            }
            Command::Sync => {
                if self.transport.is_connected() {
                    self.resync();
                } else {
                    self.next_connect = Some(Instant::now());
                }
            }
            Command::FullSync => {
                if let Err(e) = self.transport.send_full_sync(&self.dispatcher.devices()) {
                    tracing::warn!("full sync failed: {}", e);
                }
            }
            Command::Status => self.log_status(),
            Command::Quit => {
                tracing::info!("quit requested");
                return Flow::Quit;
            }
        }
        Flow::Continue
    }

    fn set_visibility(&mut self, device_type: DeviceType, id: u8, visible: bool) {
        match self.dispatcher.set_visibility(device_type, id, visible) {
            // the panel can only drop a device through a full reset
            Ok(_) => self.resync(),
            Err(e) => tracing::warn!("visibility change failed: {}", e),
        }
    }

    fn handle_event(&mut self, ev: BridgeEvent) {
        match ev {
            BridgeEvent::Connected { port } => {
                tracing::debug!("session open on {}", port);
                self.stats.connects += 1;
            }
            BridgeEvent::Disconnected { port } => {
                tracing::warn!("panel on {} disconnected", port);
                self.stats.disconnects += 1;
                self.next_resync = None;
                if !self.cancel.load(Ordering::Relaxed) {
                    self.next_connect = Some(Instant::now() + self.options.settle_delay);
                }
            }
            BridgeEvent::ValueReport(report) => match self.dispatcher.handle_value_report(&report) {
                Ok(Some(_)) => self.stats.reports_applied += 1,
                Ok(None) => self.stats.reports_dropped += 1,
                Err(_) => self.stats.reports_failed += 1,
            },
            BridgeEvent::Error(msg) => tracing::debug!("transport error: {}", msg),
        }
    }

    fn try_connect(&mut self) {
        self.next_connect = None;
        let devices = self.dispatcher.devices();
        if self.transport.connect_and_sync(&devices, &self.cancel) {
            self.stats.inc_sync();
            self.schedule_resync();
        } else if !self.options.reconnect_interval.is_zero() {
            self.next_connect = Some(Instant::now() + self.options.reconnect_interval);
        }
    }

    fn watch_ports(&mut self) {
        for change in self.watcher.poll(self.provider.as_ref()) {
            match change {
                PortChange::Arrived(port) => {
                    if self.transport.is_connected() {
                        continue;
                    }
                    tracing::info!(
                        "{} appeared, probing in {:?}",
                        port,
                        self.options.settle_delay
                    );
                    self.next_connect = Some(Instant::now() + self.options.settle_delay);
                }
                PortChange::Removed(port) => {
                    if self.transport.port_name() == Some(port.as_str()) {
                        tracing::info!("{} went away", port);
                        self.transport.dispose();
                    }
                }
            }
        }
    }

    fn resync(&mut self) {
        if !self.transport.is_connected() {
            return;
        }
        match self.transport.send_update(&self.dispatcher.devices(), &self.cancel) {
            Ok(n) => {
                tracing::debug!("resynced {} device(s)", n);
                self.stats.inc_sync();
            }
            Err(e) => tracing::warn!("resync failed: {}", e),
        }
        self.schedule_resync();
    }

    fn schedule_resync(&mut self) {
        self.next_resync = self.options.resync_interval.map(|every| Instant::now() + every);
    }

    fn log_status(&self) {
        match self.transport.port_name() {
            Some(port) => tracing::info!("connected to {}", port),
            None => tracing::info!("not connected"),
        }
        for d in self.dispatcher.devices() {
            tracing::info!(
                "  {} {} {:<20} {:>3}{}",
                d.device_type,
                d.id,
                d.name,
                d.value,
                if d.visible { "" } else { " (hidden)" }
            );
        }
    }
}
