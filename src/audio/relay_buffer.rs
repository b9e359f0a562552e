//! Outbound audio accumulator
//!
//! Backend audio arrives in many small fragments. Each session batches them
//! into larger frames before writing to the client so playback stays smooth.
//!
//! # Threshold
//!
//! The default threshold is 9600 bytes of PCM16 mono. A fragment that brings
//! the pending total to or past the threshold releases the entire pending
//! buffer as one frame; nothing is ever split or reordered.

/// Byte accumulator with a minimum flush size.
///
/// Thread-safety: This struct is NOT internally synchronized.
/// The owning session wraps it in a mutex.
#[derive(Debug)]
pub struct RelayBuffer {
    pending: Vec<u8>,
    min_flush_bytes: usize,
    frames_released: u64,
    bytes_released: u64,
}

impl RelayBuffer {
    pub fn new(min_flush_bytes: usize) -> Self {
        Self {
            pending: Vec::with_capacity(min_flush_bytes),
            min_flush_bytes: min_flush_bytes.max(1),
            frames_released: 0,
            bytes_released: 0,
        }
    }

    /// Append a fragment. Returns the whole pending buffer once it reaches the threshold.
    pub fn append(&mut self, fragment: &[u8]) -> Option<Vec<u8>> {
        if fragment.is_empty() {
            return None;
        }
        self.pending.extend_from_slice(fragment);
        if self.pending.len() >= self.min_flush_bytes {
            self.release()
        } else {
            None
        }
    }

    /// Release whatever is pending, regardless of size.
    pub fn flush(&mut self) -> Option<Vec<u8>> {
        self.release()
    }

    /// Drop pending bytes without releasing them (barge-in). Returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn frames_released(&self) -> u64 {
        self.frames_released
    }

    pub fn bytes_released(&self) -> u64 {
        self.bytes_released
    }

    fn release(&mut self) -> Option<Vec<u8>> {
        if self.pending.is_empty() {
            return None;
        }
        let frame = std::mem::replace(&mut self.pending, Vec::with_capacity(self.min_flush_bytes));
        self.frames_released += 1;
        self.bytes_released += frame.len() as u64;
        Some(frame)
    }
}

impl Default for RelayBuffer {
    fn default() -> Self {
        Self::new(super::DEFAULT_MIN_FLUSH_BYTES)
    }
}
