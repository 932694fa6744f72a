//! Host side of the Lumin control panel's serial bridge.
//!
//! The panel is a microcontroller with knobs. The host tells it which
//! displays and audio outputs exist; the panel reports knob turns back and
//! the host applies them.

pub mod app;
pub mod config;
pub mod controller;
pub mod device;
pub mod dispatch;
pub mod port;
pub mod probe;
pub mod proto;
pub mod settings;
pub mod sim;
pub mod stats;
pub mod transport;
pub mod watch;

#[cfg(test)]
pub(crate) mod testing;
