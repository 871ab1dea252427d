//! Error handling for the sniffer service
//!
//! Recognition misses and short-buffer conditions inside the dissector are
//! not errors; they are represented as `None` at the parse layer. This enum
//! covers the conditions that reach a caller.

use thiserror::Error;

/// Sniffer service error type
#[derive(Error, Debug)]
pub enum SnifferError {
    /// Invalid frame token, bad port path, unsupported port count
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Byte source read or serial open failures
    #[error("IO error: {0}")]
    IoError(String),

    /// Result encoding/decoding errors
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Inter-task channel failures
    #[error("Channel error: {0}")]
    ChannelError(String),
}

/// Result type alias for the sniffer service
pub type Result<T> = std::result::Result<T, SnifferError>;

impl From<std::io::Error> for SnifferError {
    fn from(err: std::io::Error) -> Self {
        SnifferError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for SnifferError {
    fn from(err: serde_json::Error) -> Self {
        SnifferError::SerializationError(format!("JSON error: {err}"))
    }
}

impl From<tokio_serial::Error> for SnifferError {
    fn from(err: tokio_serial::Error) -> Self {
        SnifferError::IoError(format!("Serial port error: {err}"))
    }
}

impl SnifferError {
    pub fn config(msg: impl Into<String>) -> Self {
        SnifferError::ConfigError(msg.into())
    }

    pub fn io(msg: impl Into<String>) -> Self {
        SnifferError::IoError(msg.into())
    }
}
