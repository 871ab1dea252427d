//! Port and sniffer configuration
//!
//! A frame format is the classic serial token `{7|8}{N|E|O}{1|2|15}`
//! (data bits, parity, stop bits; `15` means 1.5). Anything else is a
//! configuration error reported at construction time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::utils::error::{Result, SnifferError};

/// Baud rates probed by the scan driver, in probe order
pub const SCAN_BAUD_RATES: [u32; 8] = [9600, 19200, 38400, 115200, 57600, 4800, 2400, 1200];

/// Default byte-buffer eviction window in seconds (0 disables)
pub const DEFAULT_FLUSH_AFTER_SECS: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    None,
    Even,
    Odd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopBits {
    One,
    Two,
    OnePointFive,
}

/// Serial frame format: data bits, parity, stop bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameFormat {
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: StopBits,
}

impl FrameFormat {
    /// Parse a frame token such as `8N1`, `7E2` or `8O15`
    pub fn parse(token: &str) -> Result<Self> {
        let mut chars = token.chars();
        let bits = chars.next();
        let parity = chars.next();
        let stop: String = chars.collect();

        let data_bits = match bits {
            Some('7') => 7,
            Some('8') => 8,
            _ => {
                return Err(SnifferError::config(format!(
                    "invalid data bits in frame token '{token}' (expected 7 or 8)"
                )))
            }
        };
        let parity = match parity {
            Some('N') => Parity::None,
            Some('E') => Parity::Even,
            Some('O') => Parity::Odd,
            _ => {
                return Err(SnifferError::config(format!(
                    "invalid parity in frame token '{token}' (expected N, E or O)"
                )))
            }
        };
        let stop_bits = match stop.as_str() {
            "1" => StopBits::One,
            "2" => StopBits::Two,
            "15" => StopBits::OnePointFive,
            _ => {
                return Err(SnifferError::config(format!(
                    "invalid stop bits in frame token '{token}' (expected 1, 2 or 15)"
                )))
            }
        };

        Ok(Self {
            data_bits,
            parity,
            stop_bits,
        })
    }

    /// Every frame format probed by the scan driver, in probe order:
    /// data bits 7 then 8, parity N/E/O, stop bits 1/2/15
    pub fn scan_order() -> Vec<FrameFormat> {
        let mut frames = Vec::with_capacity(18);
        for data_bits in [7, 8] {
            for parity in [Parity::None, Parity::Even, Parity::Odd] {
                for stop_bits in [StopBits::One, StopBits::Two, StopBits::OnePointFive] {
                    frames.push(FrameFormat {
                        data_bits,
                        parity,
                        stop_bits,
                    });
                }
            }
        }
        frames
    }
}

impl Default for FrameFormat {
    /// 8N1, the de-facto standard Modbus RTU framing
    fn default() -> Self {
        Self {
            data_bits: 8,
            parity: Parity::None,
            stop_bits: StopBits::One,
        }
    }
}

impl fmt::Display for FrameFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Even => 'E',
            Parity::Odd => 'O',
        };
        let stop = match self.stop_bits {
            StopBits::One => "1",
            StopBits::Two => "2",
            StopBits::OnePointFive => "15",
        };
        write!(f, "{}{}{}", self.data_bits, parity, stop)
    }
}

impl FromStr for FrameFormat {
    type Err = SnifferError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// One monitored serial line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortConfig {
    /// Device path, e.g. `/dev/ttyUSB0`
    pub path: String,
    pub baud: u32,
    pub frame: FrameFormat,
    /// Byte-buffer eviction window in seconds; 0 disables eviction
    pub flush_after_secs: u64,
    /// Log every received chunk
    pub debug: bool,
}

impl PortConfig {
    pub fn new(path: impl Into<String>, baud: u32, frame: FrameFormat) -> Self {
        Self {
            path: path.into(),
            baud,
            frame,
            flush_after_secs: DEFAULT_FLUSH_AFTER_SECS,
            debug: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.path.is_empty() {
            return Err(SnifferError::config("port path cannot be empty"));
        }
        if self.baud == 0 {
            return Err(SnifferError::config("baud rate must be greater than zero"));
        }
        Ok(())
    }

    /// Short human-readable summary for logs
    pub fn describe(&self) -> String {
        format!("{} {} {}", self.path, self.baud, self.frame)
    }
}

/// Full sniffer configuration: one port for half-duplex capture, two ports
/// for full-duplex capture (tx line first, rx line second)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnifferConfig {
    pub ports: Vec<PortConfig>,
}

impl SnifferConfig {
    pub fn half_duplex(port: PortConfig) -> Self {
        Self { ports: vec![port] }
    }

    pub fn full_duplex(tx: PortConfig, rx: PortConfig) -> Self {
        Self {
            ports: vec![tx, rx],
        }
    }

    pub fn is_duplex(&self) -> bool {
        self.ports.len() == 2
    }

    pub fn validate(&self) -> Result<()> {
        if self.ports.is_empty() || self.ports.len() > 2 {
            return Err(SnifferError::config(format!(
                "expected 1 or 2 ports, got {}",
                self.ports.len()
            )));
        }
        for port in &self.ports {
            port.validate()?;
        }
        Ok(())
    }

    pub fn describe(&self) -> String {
        self.ports
            .iter()
            .map(PortConfig::describe)
            .collect::<Vec<_>>()
            .join(", ")
    }
}
