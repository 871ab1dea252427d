//! Serial byte source
//!
//! Opens a serial device read-only (the sniffer never transmits) and turns
//! it into a stream of timestamped chunks.

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::AsyncReadExt;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::debug;

use super::traits::{ByteSource, Chunk};
use crate::core::config::{Parity, PortConfig, StopBits};
use crate::utils::error::{Result, SnifferError};

/// Read buffer size; a chunk never exceeds this
pub const READ_BUFFER_SIZE: usize = 256;

/// Byte source backed by a serial port
pub struct SerialByteSource {
    port: SerialStream,
    path: String,
}

impl SerialByteSource {
    /// Open the configured device. Fails fast on invalid settings so a scan
    /// can move to the next candidate without waiting out its window.
    pub fn open(config: &PortConfig) -> Result<Self> {
        config.validate()?;

        let stop_bits = match config.frame.stop_bits {
            StopBits::One => tokio_serial::StopBits::One,
            StopBits::Two => tokio_serial::StopBits::Two,
            StopBits::OnePointFive => {
                // The serial backend has no 1.5-stop-bit mode; the token is
                // accepted at parse time so scans can enumerate it, but the
                // candidate fails here.
                return Err(SnifferError::config(format!(
                    "{}: 1.5 stop bits not supported by the serial backend",
                    config.path
                )));
            }
        };
        let data_bits = match config.frame.data_bits {
            7 => tokio_serial::DataBits::Seven,
            _ => tokio_serial::DataBits::Eight,
        };
        let parity = match config.frame.parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Even => tokio_serial::Parity::Even,
            Parity::Odd => tokio_serial::Parity::Odd,
        };

        let builder = tokio_serial::new(&config.path, config.baud)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits);

        let mut port = builder.open_native_async()?;
        #[cfg(unix)]
        port.set_exclusive(false)
            .map_err(|e| SnifferError::io(format!("failed to set exclusive mode: {e}")))?;

        debug!("Opened serial port {}", config.describe());

        Ok(Self {
            port,
            path: config.path.clone(),
        })
    }
}

#[async_trait]
impl ByteSource for SerialByteSource {
    async fn read_chunk(&mut self) -> Result<Chunk> {
        let mut buf = [0u8; READ_BUFFER_SIZE];
        let n = self.port.read(&mut buf).await?;
        let time = Utc::now();
        if n == 0 {
            return Err(SnifferError::io(format!("{}: port closed", self.path)));
        }
        Ok(Chunk {
            time,
            bytes: buf[..n].to_vec(),
        })
    }

    fn describe(&self) -> String {
        self.path.clone()
    }
}
