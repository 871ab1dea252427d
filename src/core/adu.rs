//! Modbus RTU application data units and the frame recognizer
//!
//! An ADU is the complete on-wire frame: address, function/data portion and
//! a trailing CRC-16 (low byte first). Three shapes exist on an RTU link:
//!
//! - request: fixed 8 bytes, function code top bit clear
//! - response: `5 + byte_count` bytes, function code top bit clear
//! - exception: fixed 5 bytes, function code top bit set
//!
//! Recognition tries the shapes in that order and the first one that
//! validates wins. Requests are the most common frame on a busy link and are
//! cheap to reject; the response length depends on the embedded byte count;
//! the exception is the shortest and most constrained shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::buffer::DissectorBuffer;
use super::crc::crc16;

/// On-wire size of a request ADU
pub const REQUEST_SIZE: usize = 8;

/// On-wire size of an exception ADU
pub const EXCEPTION_SIZE: usize = 5;

/// On-wire size of a response ADU with an empty payload
pub const RESPONSE_BASE_SIZE: usize = 5;

/// No ADU shape fits in fewer bytes than this
pub const MIN_ADU_SIZE: usize = EXCEPTION_SIZE;

/// Master request: address, function code, 4 data bytes, CRC
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestAdu {
    pub address: u8,
    pub function_code: u8,
    pub data: [u8; 4],
    pub crc16: u16,
    pub time: DateTime<Utc>,
}

/// Slave response: address, function code, counted payload, CRC
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseAdu {
    pub address: u8,
    pub function_code: u8,
    /// Payload; its length is the on-wire byte count
    pub data: Vec<u8>,
    pub crc16: u16,
    pub time: DateTime<Utc>,
}

/// Slave exception: the function code carries the error bit (0x80)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionAdu {
    pub address: u8,
    pub function_code: u8,
    pub exception_code: u8,
    pub crc16: u16,
    pub time: DateTime<Utc>,
}

/// Recognized application data unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Adu {
    Request(RequestAdu),
    Response(ResponseAdu),
    Exception(ExceptionAdu),
}

impl RequestAdu {
    /// Build a request with a freshly calculated CRC
    pub fn new(address: u8, function_code: u8, data: [u8; 4], time: DateTime<Utc>) -> Self {
        let mut frame = vec![address, function_code];
        frame.extend_from_slice(&data);
        Self {
            address,
            function_code,
            data,
            crc16: crc16(&frame),
            time,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![self.address, self.function_code];
        bytes.extend_from_slice(&self.data);
        bytes.extend_from_slice(&self.crc16.to_le_bytes());
        bytes
    }
}

impl ResponseAdu {
    /// Build a response with a freshly calculated CRC
    pub fn new(address: u8, function_code: u8, data: Vec<u8>, time: DateTime<Utc>) -> Self {
        let mut frame = vec![address, function_code, data.len() as u8];
        frame.extend_from_slice(&data);
        Self {
            address,
            function_code,
            crc16: crc16(&frame),
            data,
            time,
        }
    }

    pub fn byte_count(&self) -> u8 {
        self.data.len() as u8
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![self.address, self.function_code, self.byte_count()];
        bytes.extend_from_slice(&self.data);
        bytes.extend_from_slice(&self.crc16.to_le_bytes());
        bytes
    }
}

impl ExceptionAdu {
    /// Build an exception with a freshly calculated CRC.
    /// `function_code` must already carry the error bit.
    pub fn new(address: u8, function_code: u8, exception_code: u8, time: DateTime<Utc>) -> Self {
        Self {
            address,
            function_code,
            exception_code,
            crc16: crc16(&[address, function_code, exception_code]),
            time,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![self.address, self.function_code, self.exception_code];
        bytes.extend_from_slice(&self.crc16.to_le_bytes());
        bytes
    }
}

impl Adu {
    /// Try to recognize an ADU starting at `index` of the buffer.
    ///
    /// Shapes are attempted request, then response, then exception; the
    /// first one whose length, CRC and function-code constraint all hold is
    /// returned. A byte string that validates as more than one shape
    /// resolves to the earlier attempt. `None` means no ADU starts here.
    pub fn try_parse(buffer: &DissectorBuffer, index: usize) -> Option<Adu> {
        Self::try_request(buffer, index)
            .or_else(|| Self::try_response(buffer, index))
            .or_else(|| Self::try_exception(buffer, index))
    }

    fn try_request(buffer: &DissectorBuffer, index: usize) -> Option<Adu> {
        let raw = buffer.bytes(index, REQUEST_SIZE)?;
        let function_code = raw[1];
        if function_code & 0x80 != 0 {
            return None;
        }
        let embedded = u16::from_le_bytes([raw[6], raw[7]]);
        if crc16(&raw[..6]) != embedded {
            return None;
        }
        Some(Adu::Request(RequestAdu {
            address: raw[0],
            function_code,
            data: [raw[2], raw[3], raw[4], raw[5]],
            crc16: embedded,
            time: buffer.get(index)?.time,
        }))
    }

    fn try_response(buffer: &DissectorBuffer, index: usize) -> Option<Adu> {
        let header = buffer.bytes(index, 3)?;
        let function_code = header[1];
        if function_code & 0x80 != 0 {
            return None;
        }
        let byte_count = header[2] as usize;
        let size = RESPONSE_BASE_SIZE + byte_count;
        let raw = buffer.bytes(index, size)?;
        let embedded = u16::from_le_bytes([raw[size - 2], raw[size - 1]]);
        if crc16(&raw[..size - 2]) != embedded {
            return None;
        }
        Some(Adu::Response(ResponseAdu {
            address: raw[0],
            function_code,
            data: raw[3..3 + byte_count].to_vec(),
            crc16: embedded,
            time: buffer.get(index)?.time,
        }))
    }

    fn try_exception(buffer: &DissectorBuffer, index: usize) -> Option<Adu> {
        let raw = buffer.bytes(index, EXCEPTION_SIZE)?;
        let function_code = raw[1];
        if function_code & 0x80 != 0x80 {
            return None;
        }
        let embedded = u16::from_le_bytes([raw[3], raw[4]]);
        if crc16(&raw[..3]) != embedded {
            return None;
        }
        Some(Adu::Exception(ExceptionAdu {
            address: raw[0],
            function_code,
            exception_code: raw[2],
            crc16: embedded,
            time: buffer.get(index)?.time,
        }))
    }

    /// On-wire byte count of the recognized ADU
    pub fn size(&self) -> usize {
        match self {
            Adu::Request(_) => REQUEST_SIZE,
            Adu::Response(r) => RESPONSE_BASE_SIZE + r.data.len(),
            Adu::Exception(_) => EXCEPTION_SIZE,
        }
    }

    pub fn address(&self) -> u8 {
        match self {
            Adu::Request(a) => a.address,
            Adu::Response(a) => a.address,
            Adu::Exception(a) => a.address,
        }
    }

    pub fn time(&self) -> DateTime<Utc> {
        match self {
            Adu::Request(a) => a.time,
            Adu::Response(a) => a.time,
            Adu::Exception(a) => a.time,
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(self, Adu::Request(_))
    }

    pub fn is_reply(&self) -> bool {
        matches!(self, Adu::Response(_) | Adu::Exception(_))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Adu::Request(a) => a.to_bytes(),
            Adu::Response(a) => a.to_bytes(),
            Adu::Exception(a) => a.to_bytes(),
        }
    }
}

/// The reply half of a matched exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reply {
    Response(ResponseAdu),
    Exception(ExceptionAdu),
}

impl Reply {
    pub fn address(&self) -> u8 {
        match self {
            Reply::Response(r) => r.address,
            Reply::Exception(e) => e.address,
        }
    }

    pub fn time(&self) -> DateTime<Utc> {
        match self {
            Reply::Response(r) => r.time,
            Reply::Exception(e) => e.time,
        }
    }

    /// Does this reply answer a request carrying `function_code`?
    /// Responses echo the code; exceptions echo it with the error bit set.
    pub fn answers(&self, function_code: u8) -> bool {
        match self {
            Reply::Response(r) => r.function_code == function_code,
            Reply::Exception(e) => e.function_code & 0x7F == function_code,
        }
    }
}

/// A request matched with its reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub request: RequestAdu,
    pub reply: Reply,
}

fn fmt_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true)
}

impl fmt::Display for RequestAdu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {:02X}|REQ{:02X}|{}|{:02X}{:02X}",
            fmt_time(&self.time),
            self.address,
            self.function_code,
            hex::encode_upper(self.data),
            self.crc16 as u8,
            (self.crc16 >> 8) as u8,
        )
    }
}

impl fmt::Display for ResponseAdu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Long payloads are elided to head....tail
        let payload = if self.data.len() > 8 {
            format!(
                "{}....{}",
                hex::encode_upper(&self.data[..4]),
                hex::encode_upper(&self.data[self.data.len() - 4..])
            )
        } else {
            hex::encode_upper(&self.data)
        };
        write!(
            f,
            "[{}] {:02X}|RSP{:02X}|{}|{:02X}{:02X}",
            fmt_time(&self.time),
            self.address,
            self.function_code,
            payload,
            self.crc16 as u8,
            (self.crc16 >> 8) as u8,
        )
    }
}

impl fmt::Display for ExceptionAdu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {:02X}|EXC{:02X}|{:02X}|{:02X}{:02X}",
            fmt_time(&self.time),
            self.address,
            self.function_code,
            self.exception_code,
            self.crc16 as u8,
            (self.crc16 >> 8) as u8,
        )
    }
}

impl fmt::Display for Adu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Adu::Request(a) => a.fmt(f),
            Adu::Response(a) => a.fmt(f),
            Adu::Exception(a) => a.fmt(f),
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Response(r) => r.fmt(f),
            Reply::Exception(e) => e.fmt(f),
        }
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.request, self.reply)
    }
}
