//! # Status packets
//!
//! Every instruction addressed to a single device is answered by a status packet carrying an
//! error byte and, for reads and pings, some parameters.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use thiserror::Error;

use crate::packet::{Frame, PacketError, ProtocolVersion};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Instruction field value of a protocol 2.0 status packet.
pub const STATUS_CODE_V2: u8 = 0x55;

/// Alert bit of the protocol 2.0 error byte, set while the device has a hardware error.
const ALERT_BIT: u8 = 0x80;

/// Protocol 1.0 error flags reporting the device's condition rather than a rejected instruction
/// (input voltage, overheating, overload).
const V1_HARDWARE_FLAGS: u8 = 0x01 | 0x04 | 0x20;

/// Flag used for hardware errors which have no protocol 1.0 flag of their own.
const V1_OVERLOAD_FLAG: u8 = 0x20;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A status packet returned by a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusPacket {
    pub id: u8,

    /// Raw error byte, meaning depends on the protocol version
    pub error: u8,

    pub params: Vec<u8>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Errors reported by a device in the status packet error byte.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DeviceError {
    #[error("the device failed to process the instruction")]
    ResultFail,

    #[error("undefined instruction, or action without reg write")]
    Instruction,

    #[error("the device rejected the packet CRC")]
    Crc,

    #[error("data to be written is out of the item's range")]
    DataRange,

    #[error("data to be written is shorter than the item")]
    DataLength,

    #[error("data to be written is outside the configured limit")]
    DataLimit,

    #[error("access error (read only item, or EEPROM write with torque enabled)")]
    Access,

    #[error("protocol 1.0 error flags {0:#010b}")]
    Flags(u8),

    #[error("unknown error number {0:#04x}")]
    Unknown(u8),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl StatusPacket {
    /// Interpret a received frame as a status packet.
    pub fn from_frame(version: ProtocolVersion, frame: Frame) -> Result<Self, PacketError> {
        match version {
            ProtocolVersion::V1 => Ok(Self {
                id: frame.id,
                error: frame.code,
                params: frame.data,
            }),
            ProtocolVersion::V2 => {
                if frame.code != STATUS_CODE_V2 {
                    return Err(PacketError::NotStatus(frame.code));
                }

                let (error, params) = match frame.data.split_first() {
                    Some((e, p)) => (*e, p.to_vec()),
                    None => return Err(PacketError::MissingErrorByte),
                };

                Ok(Self {
                    id: frame.id,
                    error,
                    params,
                })
            }
        }
    }

    /// Build the frame a device would send for this status.
    pub fn to_frame(&self, version: ProtocolVersion) -> Frame {
        match version {
            ProtocolVersion::V1 => Frame::new(self.id, self.error, self.params.clone()),
            ProtocolVersion::V2 => {
                let mut data = Vec::with_capacity(self.params.len() + 1);
                data.push(self.error);
                data.extend_from_slice(&self.params);
                Frame::new(self.id, STATUS_CODE_V2, data)
            }
        }
    }

    /// Decode the error byte, `None` if the device executed the instruction.
    ///
    /// A hardware alert on its own is not an error, see [`StatusPacket::hardware_alert`].
    pub fn device_error(&self, version: ProtocolVersion) -> Option<DeviceError> {
        DeviceError::from_byte(version, self.error)
    }

    /// Whether the device signals a hardware error. The instruction was still executed.
    pub fn hardware_alert(&self, version: ProtocolVersion) -> bool {
        match version {
            ProtocolVersion::V1 => self.error & V1_HARDWARE_FLAGS != 0,
            ProtocolVersion::V2 => self.error & ALERT_BIT != 0,
        }
    }
}

/// Error byte bits a device sets while its hardware error status is `hw_status`.
pub fn alert_bits(version: ProtocolVersion, hw_status: u8) -> u8 {
    if hw_status == 0 {
        return 0;
    }

    match version {
        ProtocolVersion::V1 => match hw_status & V1_HARDWARE_FLAGS {
            0 => V1_OVERLOAD_FLAG,
            f => f,
        },
        ProtocolVersion::V2 => ALERT_BIT,
    }
}

impl DeviceError {
    /// Decode an error byte.
    pub fn from_byte(version: ProtocolVersion, byte: u8) -> Option<Self> {
        match version {
            ProtocolVersion::V1 => match byte & !V1_HARDWARE_FLAGS {
                0 => None,
                _ => Some(DeviceError::Flags(byte)),
            },
            ProtocolVersion::V2 => match byte & !ALERT_BIT {
                0x00 => None,
                0x01 => Some(DeviceError::ResultFail),
                0x02 => Some(DeviceError::Instruction),
                0x03 => Some(DeviceError::Crc),
                0x04 => Some(DeviceError::DataRange),
                0x05 => Some(DeviceError::DataLength),
                0x06 => Some(DeviceError::DataLimit),
                0x07 => Some(DeviceError::Access),
                n => Some(DeviceError::Unknown(n)),
            },
        }
    }

    /// Encode the error into a status byte.
    ///
    /// Protocol 1.0 has no error numbers, so numbered errors are folded onto the closest flag.
    pub fn to_byte(self, version: ProtocolVersion) -> u8 {
        match version {
            ProtocolVersion::V1 => match self {
                DeviceError::DataLimit => 0x02,
                DeviceError::DataRange => 0x08,
                DeviceError::Crc => 0x10,
                DeviceError::Flags(f) | DeviceError::Unknown(f) => f,
                DeviceError::ResultFail
                | DeviceError::Instruction
                | DeviceError::DataLength
                | DeviceError::Access => 0x40,
            },
            ProtocolVersion::V2 => match self {
                DeviceError::ResultFail => 0x01,
                DeviceError::Instruction => 0x02,
                DeviceError::Crc => 0x03,
                DeviceError::DataRange => 0x04,
                DeviceError::DataLength => 0x05,
                DeviceError::DataLimit => 0x06,
                DeviceError::Access => 0x07,
                DeviceError::Flags(f) | DeviceError::Unknown(f) => f,
            },
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
