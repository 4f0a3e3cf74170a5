//! Newline framing for the daemon socket.
//!
//! Each connection owns a `LineFramer`. Bytes are pushed in whatever chunks
//! the socket delivers; complete `\n`-terminated lines come out in order.
//!
//! ```text
//!            push(bytes)
//!  ┌────────────┐ newline ┌───────┐
//!  │ Collecting │────────►│ Frame │
//!  └────────────┘         └───────┘
//!        │ buffer > max without newline
//!        ▼
//!  ┌────────────┐ newline ┌───────────┐
//!  │ Discarding │────────►│ Oversized │
//!  └────────────┘         └───────────┘
//! ```

/// Largest accepted line, newline excluded.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// One unit produced by the framer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete line without its terminator (`\n` or `\r\n`).
    Line(Vec<u8>),
    /// A line longer than the limit was dropped; carries how many bytes.
    Oversized(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Collecting,
    /// Skipping the rest of an oversized line; counts what was dropped.
    Discarding(usize),
}

/// Accumulates bytes and splits them into frames.
#[derive(Debug)]
pub struct LineFramer {
    buf: Vec<u8>,
    /// Bytes at the front of `buf` already known to hold no newline.
    scanned: usize,
    max: usize,
    state: State,
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl LineFramer {
    pub fn new() -> Self {
        Self::with_limit(MAX_FRAME_BYTES)
    }

    pub fn with_limit(max: usize) -> Self {
        Self {
            buf: Vec::new(),
            scanned: 0,
            max,
            state: State::Collecting,
        }
    }

    /// Append bytes read from the socket.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Bytes held that do not yet form a complete frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Next complete frame, if any. Blank lines are skipped.
    pub fn next_frame(&mut self) -> Option<Frame> {
        loop {
            let newline = self.buf[self.scanned..]
                .iter()
                .position(|&b| b == b'\n')
                .map(|i| self.scanned + i);

            match (self.state, newline) {
                (State::Collecting, Some(pos)) => {
                    let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
                    self.scanned = 0;
                    line.pop();
                    if line.last() == Some(&b'\r') {
                        line.pop();
                    }
                    if line.iter().all(|b| b.is_ascii_whitespace()) {
                        continue;
                    }
                    if line.len() > self.max {
                        return Some(Frame::Oversized(line.len()));
                    }
                    return Some(Frame::Line(line));
                }
                (State::Collecting, None) => {
                    if self.buf.len() > self.max {
                        let dropped = self.buf.len();
                        self.buf.clear();
                        self.scanned = 0;
                        self.state = State::Discarding(dropped);
                        continue;
                    }
                    self.scanned = self.buf.len();
                    return None;
                }
                (State::Discarding(dropped), Some(pos)) => {
                    self.buf.drain(..=pos);
                    self.scanned = 0;
                    self.state = State::Collecting;
                    return Some(Frame::Oversized(dropped + pos));
                }
                (State::Discarding(dropped), None) => {
                    let more = self.buf.len();
                    self.buf.clear();
                    self.scanned = 0;
                    self.state = State::Discarding(dropped + more);
                    return None;
                }
            }
        }
    }
}
