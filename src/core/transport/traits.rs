//! Byte source contract
//!
//! A byte source yields timestamped chunks of raw octets as they arrive on
//! the line. The timestamp is captured immediately after the read returns
//! and every octet of a chunk shares it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::utils::error::Result;

/// One delivery from a byte source: non-empty, up to the source's read
/// buffer in length
#[derive(Debug, Clone)]
pub struct Chunk {
    pub time: DateTime<Utc>,
    pub bytes: Vec<u8>,
}

/// Abstract producer of timestamped byte chunks
#[async_trait]
pub trait ByteSource: Send {
    /// Wait for the next chunk. Errors are reported to the read loop and
    /// never tear the capture down.
    async fn read_chunk(&mut self) -> Result<Chunk>;

    /// Short identifier for log lines
    fn describe(&self) -> String {
        "byte source".to_string()
    }
}

pub type BoxedByteSource = Box<dyn ByteSource>;
