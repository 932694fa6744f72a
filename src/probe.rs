//! Finds the panel by asking every port who it is.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use thiserror::Error;

use crate::port::{PortProvider, read_line, write_line};

/// Line sent to a candidate port and the line the panel answers with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub message: String,
    pub expected: String,
    pub baud: u32,
    /// Read/write timeout for the whole exchange on one port.
    pub timeout: Duration,
}

impl Default for Handshake {
    fn default() -> Self {
        Self {
            message: "HELLO_LUMIN".into(),
            expected: "LUMIN_ACK".into(),
            baud: 115_200,
            timeout: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("open failed: {0}")]
    Open(io::Error),
    #[error("i/o: {0}")]
    Io(#[from] io::Error),
    #[error("no reply")]
    Timeout,
    #[error("unexpected reply {0:?}")]
    Mismatch(String),
}

/// Run the handshake against one port. The probe handle is closed on return.
pub fn probe_port(provider: &dyn PortProvider, name: &str, hs: &Handshake) -> Result<(), ProbeError> {
    let mut link = provider
        .open(name, hs.baud, hs.timeout)
        .map_err(ProbeError::Open)?;
    link.clear_buffers()?;
    write_line(&mut *link, &hs.message)?;
    let reply = read_line(&mut *link, hs.timeout)?.ok_or(ProbeError::Timeout)?;
    let reply = reply.trim();
    if reply == hs.expected {
        Ok(())
    } else {
        Err(ProbeError::Mismatch(reply.to_string()))
    }
}

/// First candidate that answers the handshake, or `None`.
///
/// Ports that fail to open, stay silent or answer something else are
/// skipped. `cancel` is checked before each port.
pub fn identify(
    provider: &dyn PortProvider,
    candidates: &[String],
    hs: &Handshake,
    cancel: &AtomicBool,
) -> Option<String> {
    for name in candidates {
        if cancel.load(Ordering::Relaxed) {
            tracing::debug!("probe cancelled before {}", name);
            return None;
        }
        match probe_port(provider, name, hs) {
            Ok(()) => {
                tracing::info!("panel answered on {}", name);
                return Some(name.clone());
            }
            Err(e) => tracing::debug!("skipping {}: {}", name, e),
        }
    }
    None
}
