//! Byte-at-a-time frame reassembly.
//!
//! The receiver owns a fixed buffer and a cursor. Bytes arrive in whatever
//! chunks the serial driver hands out; state persists across calls so a frame
//! may be split anywhere.

use super::codec::FRAME_HEADER;

/// Largest payload accepted from the panel. The panel only ever sends value
/// reports (4 bytes); anything declaring more than this is treated as noise.
pub const DEFAULT_RX_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxState {
    WaitForHeader,
    WaitForLength,
    WaitForPayload,
}

/// Counters for frames the receiver threw away.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RxStats {
    pub frames: u64,
    pub oversized: u64,
    pub empty: u64,
}

pub struct FrameReceiver {
    state: RxState,
    buf: Box<[u8]>,
    expected: usize,
    cursor: usize,
    stats: RxStats,
}

impl Default for FrameReceiver {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameReceiver {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_RX_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: RxState::WaitForHeader,
            buf: vec![0u8; capacity].into_boxed_slice(),
            expected: 0,
            cursor: 0,
            stats: RxStats::default(),
        }
    }

    pub fn stats(&self) -> RxStats {
        self.stats
    }

    /// Push one byte. Returns the payload when it completes a frame.
    pub fn push(&mut self, byte: u8) -> Option<&[u8]> {
        match self.state {
            RxState::WaitForHeader => {
                // anything else is line noise
                if byte == FRAME_HEADER {
                    self.state = RxState::WaitForLength;
                }
                None
            }
            RxState::WaitForLength => {
                self.expected = byte as usize;
                self.cursor = 0;
                if self.expected > self.buf.len() {
                    tracing::debug!(
                        len = self.expected,
                        capacity = self.buf.len(),
                        "oversized frame ignored"
                    );
                    self.stats.oversized += 1;
                    self.state = RxState::WaitForHeader;
                } else if self.expected == 0 {
                    tracing::debug!("empty frame ignored");
                    self.stats.empty += 1;
                    self.state = RxState::WaitForHeader;
                } else {
                    self.state = RxState::WaitForPayload;
                }
                None
            }
            RxState::WaitForPayload => {
                self.buf[self.cursor] = byte;
                self.cursor += 1;
                if self.cursor < self.expected {
                    return None;
                }
                self.state = RxState::WaitForHeader;
                self.stats.frames += 1;
                Some(&self.buf[..self.expected])
            }
        }
    }

    /// Push a chunk, calling `on_payload` for every frame it completes.
    pub fn feed(&mut self, bytes: &[u8], mut on_payload: impl FnMut(&[u8])) {
        for &b in bytes {
            if let Some(payload) = self.push(b) {
                on_payload(payload);
            }
        }
    }
}
