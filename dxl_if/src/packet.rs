//! # Packet framing
//!
//! Both protocol versions share the same logical frame: a device ID, a one byte code (the
//! instruction for requests, `0x55` or the error byte for status packets) and a data block.
//! Only the way that frame is put on the wire differs:
//!
//! - Protocol 1.0: `FF FF | ID | LEN | CODE | DATA | CHECKSUM`
//! - Protocol 2.0: `FF FF FD 00 | ID | LEN_L LEN_H | CODE | DATA | CRC_L CRC_H`
//!
//! Protocol 2.0 also applies byte stuffing over `CODE | DATA` so that the header sequence can
//! never appear inside a packet.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::convert::TryFrom;

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

const HEADER_V1: [u8; 2] = [0xFF, 0xFF];
const HEADER_V2: [u8; 4] = [0xFF, 0xFF, 0xFD, 0x00];

/// Byte sequence which triggers stuffing in protocol 2.0.
const STUFF_PATTERN: [u8; 3] = [0xFF, 0xFF, 0xFD];
const STUFF_BYTE: u8 = 0xFD;

/// Offset of the first body byte (the code) from the start of a protocol 2.0 header.
const V2_BODY_OFFSET: usize = 7;

/// Offset of the first body byte (the code) from the start of a protocol 1.0 header.
const V1_BODY_OFFSET: usize = 4;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A protocol independent packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Device ID the packet is addressed to or originates from
    pub id: u8,

    /// Instruction code, status marker or error byte depending on the packet direction and
    /// protocol version
    pub code: u8,

    /// Parameter bytes, unstuffed
    pub data: Vec<u8>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Dynamixel communication protocol version.
///
/// Deserialised from the float used by the vendor SDKs (`1.0` or `2.0`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub enum ProtocolVersion {
    V1,
    V2,
}

/// Result of attempting to decode a frame from a receive buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A complete frame was found. The `usize` is the number of buffer bytes used, including any
    /// garbage skipped before the header.
    Complete(Frame, usize),

    /// More bytes are required. The `usize` is the number of leading bytes which can never be part
    /// of a frame and may be dropped.
    Incomplete(usize),
}

/// Errors which can occur while framing or deframing packets.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PacketError {
    #[error("Unsupported protocol version {0}, expected 1.0 or 2.0")]
    UnsupportedVersion(f64),

    #[error("Packet body of {0} bytes is too long to be framed")]
    TooLong(usize),

    #[error("Packet length field ({0}) is shorter than the minimum packet")]
    BadLength(usize),

    #[error("CRC mismatch: calculated {calculated:#06x}, received {received:#06x}")]
    BadCrc { calculated: u16, received: u16 },

    #[error("Checksum mismatch: calculated {calculated:#04x}, received {received:#04x}")]
    BadChecksum { calculated: u8, received: u8 },

    #[error("Expected a status packet but found code {0:#04x}")]
    NotStatus(u8),

    #[error("Status packet is missing its error byte")]
    MissingErrorByte,

    #[error("Unknown instruction {0:#04x}")]
    UnknownInstruction(u8),

    #[error("Instruction {instr:#04x} has malformed parameters ({len} bytes)")]
    MalformedParams { instr: u8, len: usize },
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Frame {
    /// Create a new frame.
    pub fn new(id: u8, code: u8, data: Vec<u8>) -> Self {
        Self { id, code, data }
    }

    /// Encode the frame into the wire format of the given protocol version.
    pub fn encode(&self, version: ProtocolVersion) -> Result<Vec<u8>, PacketError> {
        match version {
            ProtocolVersion::V1 => self.encode_v1(),
            ProtocolVersion::V2 => self.encode_v2(),
        }
    }

    fn encode_v1(&self) -> Result<Vec<u8>, PacketError> {
        // Length counts the code and the checksum
        let len = self.data.len() + 2;
        if len > u8::MAX as usize {
            return Err(PacketError::TooLong(self.data.len()));
        }

        let mut out = Vec::with_capacity(len + V1_BODY_OFFSET);
        out.extend_from_slice(&HEADER_V1);
        out.push(self.id);
        out.push(len as u8);
        out.push(self.code);
        out.extend_from_slice(&self.data);

        let checksum = checksum_v1(&out[HEADER_V1.len()..]);
        out.push(checksum);

        Ok(out)
    }

    fn encode_v2(&self) -> Result<Vec<u8>, PacketError> {
        let mut body = Vec::with_capacity(self.data.len() + 1);
        body.push(self.code);
        body.extend_from_slice(&self.data);
        let body = stuff(&body);

        // Length counts the stuffed body and the CRC
        let len = body.len() + 2;
        if len > u16::MAX as usize {
            return Err(PacketError::TooLong(self.data.len()));
        }

        let mut out = Vec::with_capacity(len + V2_BODY_OFFSET);
        out.extend_from_slice(&HEADER_V2);
        out.push(self.id);
        out.extend_from_slice(&(len as u16).to_le_bytes());
        out.extend_from_slice(&body);

        let crc = crc16(&out);
        out.extend_from_slice(&crc.to_le_bytes());

        Ok(out)
    }
}

impl TryFrom<f64> for ProtocolVersion {
    type Error = PacketError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        if (value - 1.0).abs() < f64::EPSILON {
            Ok(ProtocolVersion::V1)
        } else if (value - 2.0).abs() < f64::EPSILON {
            Ok(ProtocolVersion::V2)
        } else {
            Err(PacketError::UnsupportedVersion(value))
        }
    }
}

impl From<ProtocolVersion> for f64 {
    fn from(version: ProtocolVersion) -> Self {
        match version {
            ProtocolVersion::V1 => 1.0,
            ProtocolVersion::V2 => 2.0,
        }
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.1}", f64::from(*self))
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Attempt to decode one frame from the start of `buf`.
///
/// Any bytes before the first header are treated as line noise and reported as consumed. A
/// corrupted frame (bad length, CRC or checksum) is an error; the caller is expected to drop its
/// buffer in that case.
pub fn decode(version: ProtocolVersion, buf: &[u8]) -> Result<Decoded, PacketError> {
    match version {
        ProtocolVersion::V1 => decode_v1(buf),
        ProtocolVersion::V2 => decode_v2(buf),
    }
}

/// Calculate the protocol 2.0 CRC-16 (polynomial 0x8005, initial value 0, not reflected).
pub fn crc16(bytes: &[u8]) -> u16 {
    let mut crc: u16 = 0;

    for &b in bytes {
        crc ^= (b as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x8005
            } else {
                crc << 1
            };
        }
    }

    crc
}

/// Calculate the protocol 1.0 checksum over the ID, length, code and data bytes.
pub fn checksum_v1(bytes: &[u8]) -> u8 {
    !bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn decode_v1(buf: &[u8]) -> Result<Decoded, PacketError> {
    let start = match find_header(buf, &HEADER_V1) {
        Ok(s) => s,
        Err(drop) => return Ok(Decoded::Incomplete(drop)),
    };

    let pkt = &buf[start..];
    if pkt.len() < V1_BODY_OFFSET {
        return Ok(Decoded::Incomplete(start));
    }

    let len = pkt[3] as usize;
    if len < 2 {
        return Err(PacketError::BadLength(len));
    }

    let total = V1_BODY_OFFSET + len;
    if pkt.len() < total {
        return Ok(Decoded::Incomplete(start));
    }

    let calculated = checksum_v1(&pkt[2..total - 1]);
    let received = pkt[total - 1];
    if calculated != received {
        return Err(PacketError::BadChecksum {
            calculated,
            received,
        });
    }

    let frame = Frame {
        id: pkt[2],
        code: pkt[V1_BODY_OFFSET],
        data: pkt[V1_BODY_OFFSET + 1..total - 1].to_vec(),
    };

    Ok(Decoded::Complete(frame, start + total))
}

fn decode_v2(buf: &[u8]) -> Result<Decoded, PacketError> {
    let start = match find_header(buf, &HEADER_V2) {
        Ok(s) => s,
        Err(drop) => return Ok(Decoded::Incomplete(drop)),
    };

    let pkt = &buf[start..];
    if pkt.len() < V2_BODY_OFFSET {
        return Ok(Decoded::Incomplete(start));
    }

    let len = LittleEndian::read_u16(&pkt[5..7]) as usize;
    if len < 3 {
        return Err(PacketError::BadLength(len));
    }

    let total = V2_BODY_OFFSET + len;
    if pkt.len() < total {
        return Ok(Decoded::Incomplete(start));
    }

    let calculated = crc16(&pkt[..total - 2]);
    let received = LittleEndian::read_u16(&pkt[total - 2..total]);
    if calculated != received {
        return Err(PacketError::BadCrc {
            calculated,
            received,
        });
    }

    let body = unstuff(&pkt[V2_BODY_OFFSET..total - 2]);

    let frame = Frame {
        id: pkt[4],
        code: body[0],
        data: body[1..].to_vec(),
    };

    Ok(Decoded::Complete(frame, start + total))
}

/// Find the first full header in `buf`.
///
/// Returns `Err` with the number of bytes which can be dropped if no full header is present. A
/// partial header at the very end of the buffer is kept.
fn find_header(buf: &[u8], header: &[u8]) -> Result<usize, usize> {
    for i in 0..buf.len() {
        let rest = &buf[i..];
        let n = rest.len().min(header.len());

        if rest[..n] == header[..n] {
            return if n == header.len() { Ok(i) } else { Err(i) };
        }
    }

    Err(buf.len())
}

fn stuff(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + body.len() / 3);

    for &b in body {
        out.push(b);
        if out.ends_with(&STUFF_PATTERN) {
            out.push(STUFF_BYTE);
        }
    }

    out
}

fn unstuff(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len());
    let mut i = 0;

    while i < body.len() {
        out.push(body[i]);
        if out.ends_with(&STUFF_PATTERN) && body.get(i + 1) == Some(&STUFF_BYTE) {
            i += 1;
        }
        i += 1;
    }

    out
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
