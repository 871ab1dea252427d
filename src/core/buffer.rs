//! Timed-byte buffer shared by the frame recognizer and the dissector loop
//!
//! Every captured octet is stored together with the timestamp of the chunk
//! that delivered it. Octets from a single chunk share one timestamp, so the
//! buffer is ordered but not strictly monotonic between adjacent elements.

use chrono::{DateTime, Utc};

/// One captured octet with its capture timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedByte {
    pub time: DateTime<Utc>,
    pub byte: u8,
}

/// Ordered sequence of timed bytes, indexed from 0
#[derive(Debug, Default)]
pub struct DissectorBuffer {
    bytes: Vec<TimedByte>,
}

impl DissectorBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one chunk, stamping every octet with the chunk time
    pub fn extend(&mut self, time: DateTime<Utc>, data: &[u8]) {
        self.bytes
            .extend(data.iter().map(|&byte| TimedByte { time, byte }));
    }

    pub fn push(&mut self, time: DateTime<Utc>, byte: u8) {
        self.bytes.push(TimedByte { time, byte });
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<TimedByte> {
        self.bytes.get(index).copied()
    }

    /// Range read of `size` raw octets starting at `start`.
    /// Returns `None` when the buffer is too short.
    pub fn bytes(&self, start: usize, size: usize) -> Option<Vec<u8>> {
        let end = start.checked_add(size)?;
        if end > self.bytes.len() {
            return None;
        }
        Some(self.bytes[start..end].iter().map(|tb| tb.byte).collect())
    }

    /// Remove `size` elements starting at `start`
    pub fn remove(&mut self, start: usize, size: usize) {
        let end = (start + size).min(self.bytes.len());
        self.bytes.drain(start..end);
    }

    /// Drop every element with a timestamp at or before `cutoff`.
    /// Returns the number of evicted elements.
    pub fn evict_older_than(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.bytes.len();
        self.bytes.retain(|tb| tb.time > cutoff);
        before - self.bytes.len()
    }

    /// Raw octet dump for overflow diagnostics
    pub fn hex_dump(&self) -> String {
        hex::encode_upper(self.bytes.iter().map(|tb| tb.byte).collect::<Vec<u8>>())
    }
}
