//! In-memory serial ports for tests.

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::port::{PortProvider, SerialLink};

#[derive(Clone)]
pub(crate) struct MockPort {
    pub name: String,
    /// Line sent back whenever the host writes a `\n`-terminated line.
    pub reply: Option<String>,
    pub open_fails: bool,
}

impl MockPort {
    pub fn silent(name: &str) -> Self {
        Self {
            name: name.into(),
            reply: None,
            open_fails: false,
        }
    }

    pub fn replying(name: &str, reply: &str) -> Self {
        Self {
            reply: Some(reply.into()),
            ..Self::silent(name)
        }
    }

    pub fn broken(name: &str) -> Self {
        Self {
            open_fails: true,
            ..Self::silent(name)
        }
    }
}

#[derive(Default)]
struct Wire {
    written: Mutex<Vec<u8>>,
    inbound: Mutex<VecDeque<u8>>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
    opens: AtomicUsize,
}

pub(crate) struct MockProvider {
    ports: Mutex<Vec<MockPort>>,
    wires: Mutex<HashMap<String, Arc<Wire>>>,
}

impl MockProvider {
    pub fn new(ports: Vec<MockPort>) -> Self {
        Self {
            ports: Mutex::new(ports),
            wires: Mutex::new(HashMap::new()),
        }
    }

    fn wire(&self, name: &str) -> Arc<Wire> {
        self.wires
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    pub fn set_ports(&self, ports: Vec<MockPort>) {
        *self.ports.lock().unwrap() = ports;
    }

    /// Everything the host wrote to `name` so far.
    pub fn written(&self, name: &str) -> Vec<u8> {
        self.wire(name).written.lock().unwrap().clone()
    }

    pub fn clear_written(&self, name: &str) {
        self.wire(name).written.lock().unwrap().clear();
    }

    /// Queue bytes for the host to read from `name`.
    pub fn inject(&self, name: &str, bytes: &[u8]) {
        self.wire(name).inbound.lock().unwrap().extend(bytes);
    }

    pub fn fail_writes(&self, name: &str, fail: bool) {
        self.wire(name).fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, name: &str, fail: bool) {
        self.wire(name).fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn opens(&self, name: &str) -> usize {
        self.wire(name).opens.load(Ordering::SeqCst)
    }
}

impl PortProvider for MockProvider {
    fn available_ports(&self) -> io::Result<Vec<String>> {
        Ok(self.ports.lock().unwrap().iter().map(|p| p.name.clone()).collect())
    }

    fn open(&self, name: &str, _baud: u32, _timeout: Duration) -> io::Result<Box<dyn SerialLink>> {
        let port = self
            .ports
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.name == name)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, name.to_string()))?;
        if port.open_fails {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "access denied"));
        }
        let wire = self.wire(name);
        wire.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockLink {
            wire,
            reply: port.reply,
        }))
    }
}

struct MockLink {
    wire: Arc<Wire>,
    reply: Option<String>,
}

impl Read for MockLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.wire.fail_reads.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
        }
        let mut inbound = self.wire.inbound.lock().unwrap();
        if inbound.is_empty() {
            drop(inbound);
            std::thread::sleep(Duration::from_millis(1));
            return Err(io::Error::new(io::ErrorKind::TimedOut, "timed out"));
        }
        let n = buf.len().min(inbound.len());
        for (slot, b) in buf.iter_mut().zip(inbound.drain(..n)) {
            *slot = b;
        }
        Ok(n)
    }
}

impl Write for MockLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.wire.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
        }
        self.wire.written.lock().unwrap().extend_from_slice(buf);
        if buf.ends_with(b"\n")
            && let Some(reply) = &self.reply
        {
            let mut inbound = self.wire.inbound.lock().unwrap();
            inbound.extend(reply.as_bytes());
            inbound.extend(b"\r\n");
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SerialLink for MockLink {
    fn clear_buffers(&mut self) -> io::Result<()> {
        self.wire.inbound.lock().unwrap().clear();
        Ok(())
    }

    fn try_clone_link(&self) -> io::Result<Box<dyn SerialLink>> {
        Ok(Box::new(MockLink {
            wire: self.wire.clone(),
            reply: self.reply.clone(),
        }))
    }
}
