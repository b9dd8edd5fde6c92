//! # Instructions
//!
//! Builders for the instruction packets the controller sends, and a parser for the device side
//! (used by simulated servos).

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use byteorder::{ByteOrder, LittleEndian};

use crate::{
    ctrl_table::CtrlItem,
    packet::{Frame, PacketError, ProtocolVersion},
};

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Instruction codes shared by protocol 1.0 and 2.0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Ping,
    Read,
    Write,
    Reboot,
}

/// A decoded instruction, as seen by a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Ping,
    Read { addr: u16, len: u16 },
    Write { addr: u16, data: Vec<u8> },
    Reboot,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Instruction {
    /// Wire code of the instruction.
    pub fn code(self) -> u8 {
        match self {
            Instruction::Ping => 0x01,
            Instruction::Read => 0x02,
            Instruction::Write => 0x03,
            Instruction::Reboot => 0x08,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Instruction::Ping),
            0x02 => Some(Instruction::Read),
            0x03 => Some(Instruction::Write),
            0x08 => Some(Instruction::Reboot),
            _ => None,
        }
    }
}

impl Request {
    /// Parse an instruction frame.
    pub fn from_frame(version: ProtocolVersion, frame: &Frame) -> Result<Self, PacketError> {
        let instr = Instruction::from_code(frame.code)
            .ok_or(PacketError::UnknownInstruction(frame.code))?;

        let malformed = || PacketError::MalformedParams {
            instr: frame.code,
            len: frame.data.len(),
        };

        let d = &frame.data;

        match (instr, version) {
            (Instruction::Ping, _) => Ok(Request::Ping),
            (Instruction::Reboot, _) => Ok(Request::Reboot),
            (Instruction::Read, ProtocolVersion::V1) => match d.len() {
                2 => Ok(Request::Read {
                    addr: d[0] as u16,
                    len: d[1] as u16,
                }),
                _ => Err(malformed()),
            },
            (Instruction::Read, ProtocolVersion::V2) => match d.len() {
                4 => Ok(Request::Read {
                    addr: LittleEndian::read_u16(&d[0..2]),
                    len: LittleEndian::read_u16(&d[2..4]),
                }),
                _ => Err(malformed()),
            },
            (Instruction::Write, ProtocolVersion::V1) => match d.len() {
                0 | 1 => Err(malformed()),
                _ => Ok(Request::Write {
                    addr: d[0] as u16,
                    data: d[1..].to_vec(),
                }),
            },
            (Instruction::Write, ProtocolVersion::V2) => match d.len() {
                0..=2 => Err(malformed()),
                _ => Ok(Request::Write {
                    addr: LittleEndian::read_u16(&d[0..2]),
                    data: d[2..].to_vec(),
                }),
            },
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Build a ping instruction.
pub fn ping(id: u8) -> Frame {
    Frame::new(id, Instruction::Ping.code(), vec![])
}

/// Build a reboot instruction.
pub fn reboot(id: u8) -> Frame {
    Frame::new(id, Instruction::Reboot.code(), vec![])
}

/// Build a read instruction for a whole control table item.
pub fn read(version: ProtocolVersion, id: u8, item: CtrlItem) -> Frame {
    let mut data = address(version, item.addr);

    match version {
        ProtocolVersion::V1 => data.push(item.len),
        ProtocolVersion::V2 => data.extend_from_slice(&(item.len as u16).to_le_bytes()),
    }

    Frame::new(id, Instruction::Read.code(), data)
}

/// Build a write instruction setting a control table item to `value`.
///
/// The value is truncated to the width of the item.
pub fn write(version: ProtocolVersion, id: u8, item: CtrlItem, value: u32) -> Frame {
    let mut data = address(version, item.addr);
    data.extend_from_slice(&item.encode(value));

    Frame::new(id, Instruction::Write.code(), data)
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Encode a control table address. Protocol 1.0 only has a one byte address field.
fn address(version: ProtocolVersion, addr: u16) -> Vec<u8> {
    match version {
        ProtocolVersion::V1 => vec![addr as u8],
        ProtocolVersion::V2 => addr.to_le_bytes().to_vec(),
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::ctrl_table::{GOAL_POSITION, PRESENT_POSITION, TORQUE_ENABLE};

    #[test]
    fn test_write_goal_position() {
        let f = write(ProtocolVersion::V2, 1, GOAL_POSITION, 512);
        assert_eq!(f.code, 0x03);
        assert_eq!(f.data, vec![0x74, 0x00, 0x00, 0x02, 0x00, 0x00]);

        let f = write(ProtocolVersion::V1, 1, GOAL_POSITION, 512);
        assert_eq!(f.data, vec![0x74, 0x00, 0x02, 0x00, 0x00]);
    }

    #[test]
    fn test_request_parsing() {
        for &v in &[ProtocolVersion::V1, ProtocolVersion::V2] {
            assert_eq!(
                Request::from_frame(v, &read(v, 4, PRESENT_POSITION)).unwrap(),
                Request::Read { addr: 132, len: 4 }
            );
            assert_eq!(
                Request::from_frame(v, &write(v, 4, TORQUE_ENABLE, 1)).unwrap(),
                Request::Write {
                    addr: 64,
                    data: vec![1]
                }
            );
            assert_eq!(Request::from_frame(v, &ping(4)).unwrap(), Request::Ping);
        }

        assert!(matches!(
            Request::from_frame(ProtocolVersion::V2, &Frame::new(1, 0x42, vec![])),
            Err(PacketError::UnknownInstruction(0x42))
        ));
        assert!(matches!(
            Request::from_frame(ProtocolVersion::V2, &Frame::new(1, 0x02, vec![0x00])),
            Err(PacketError::MalformedParams { .. })
        ));
    }
}
