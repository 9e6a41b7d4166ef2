//! Terminal input buffer
//!
//! Bounded ring filled by the terminal interrupt and drained by `read_char`.
//! Two monotonic cursors count bytes stored and bytes consumed; their
//! difference is the fill level. A byte arriving while the ring is full is
//! dropped.

use alloc::vec;
use alloc::vec::Vec;

/// Circular terminal input buffer
#[derive(Clone, Debug)]
pub struct TerminalBuffer {
    buf: Vec<u8>,
    written: u64,
    read: u64,
    dropped: u64,
}

impl TerminalBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0; capacity],
            written: 0,
            read: 0,
            dropped: 0,
        }
    }

    /// Store a byte. Returns `false` (and drops it) if the buffer is full.
    pub fn push(&mut self, byte: u8) -> bool {
        if self.is_full() {
            self.dropped += 1;
            return false;
        }
        let slot = (self.written % self.buf.len() as u64) as usize;
        self.buf[slot] = byte;
        self.written += 1;
        true
    }

    /// Oldest stored byte.
    pub fn pop(&mut self) -> Option<u8> {
        if self.is_empty() {
            return None;
        }
        let slot = (self.read % self.buf.len() as u64) as usize;
        self.read += 1;
        Some(self.buf[slot])
    }

    pub fn len(&self) -> usize {
        (self.written - self.read) as usize
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.written == self.read
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.buf.len()
    }

    /// Bytes stored since boot
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Bytes consumed since boot
    pub fn consumed(&self) -> u64 {
        self.read
    }

    /// Bytes lost to overflow since boot
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
