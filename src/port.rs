use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

/// Read timeout of a steady-state session. The reader wakes up this often to
/// check whether it has been asked to stop.
pub const SESSION_READ_TIMEOUT: Duration = Duration::from_millis(100);

const MAX_LINE: usize = 256;

/// An open serial connection.
pub trait SerialLink: Read + Write + Send {
    /// Drop anything sitting in the driver's input and output queues.
    fn clear_buffers(&mut self) -> io::Result<()>;
    /// Second handle onto the same port, for a dedicated reader.
    fn try_clone_link(&self) -> io::Result<Box<dyn SerialLink>>;
}

/// Where serial ports come from. The real implementation is [`SystemPorts`].
pub trait PortProvider: Send + Sync {
    /// Names of all ports the OS currently exposes.
    fn available_ports(&self) -> io::Result<Vec<String>>;
    /// Open `name` 8N1 without flow control; `timeout` applies to reads and writes.
    fn open(&self, name: &str, baud: u32, timeout: Duration) -> io::Result<Box<dyn SerialLink>>;
}

pub struct SystemPorts;

impl PortProvider for SystemPorts {
    fn available_ports(&self) -> io::Result<Vec<String>> {
        let ports = serialport::available_ports()?;
        Ok(ports.into_iter().map(|p| p.port_name).collect())
    }

    fn open(&self, name: &str, baud: u32, timeout: Duration) -> io::Result<Box<dyn SerialLink>> {
        let mut port = serialport::new(name, baud)
            .timeout(timeout)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open()
            .map_err(|e| io::Error::other(format!("open {}: {}", name, e)))?;
        // The panel's USB CDC stack only talks once DTR is raised.
        port.write_data_terminal_ready(true)?;
        port.write_request_to_send(true)?;
        Ok(Box::new(SystemLink(port)))
    }
}

struct SystemLink(Box<dyn SerialPort>);

impl Read for SystemLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl Write for SystemLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl SerialLink for SystemLink {
    fn clear_buffers(&mut self) -> io::Result<()> {
        self.0.clear(ClearBuffer::All)?;
        Ok(())
    }

    fn try_clone_link(&self) -> io::Result<Box<dyn SerialLink>> {
        Ok(Box::new(SystemLink(self.0.try_clone()?)))
    }
}

/// Write `line` followed by `\n` and flush.
pub fn write_line(link: &mut dyn SerialLink, line: &str) -> io::Result<()> {
    let mut out = Vec::with_capacity(line.len() + 1);
    out.extend_from_slice(line.as_bytes());
    out.push(b'\n');
    link.write_all(&out)?;
    link.flush()
}

/// Read one `\n`-terminated line (trailing `\r` stripped).
///
/// Returns `Ok(None)` if no complete line arrived within `timeout`.
pub fn read_line(link: &mut dyn SerialLink, timeout: Duration) -> io::Result<Option<String>> {
    let deadline = Instant::now() + timeout;
    let mut line = Vec::new();
    let mut byte = [0u8; 1];

    loop {
        match link.read(&mut byte) {
            Ok(1) => {
                if byte[0] == b'\n' {
                    break;
                }
                line.push(byte[0]);
                if line.len() >= MAX_LINE {
                    break;
                }
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::TimedOut || e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
    }

    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Ok(Some(String::from_utf8_lossy(&line).into_owned()))
}
