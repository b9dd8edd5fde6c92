//! # Dynamixel interface crate.
//!
//! Provides the wire protocol used to talk to Dynamixel smart servos: packet framing for protocol
//! 1.0 and 2.0, instruction builders, status packet parsing and the control table items used by
//! the fish software. This crate performs no I/O.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Packet framing, checksums and streaming decode
pub mod packet;

/// Instruction codes and instruction packet builders
pub mod instr;

/// Status packets and device error decoding
pub mod status;

/// X-series control table
pub mod ctrl_table;

// ------------------------------------------------------------------------------------------------
// REEXPORTS
// ------------------------------------------------------------------------------------------------

pub use ctrl_table::{CtrlItem, OperatingMode, PositionRange};
pub use instr::Instruction;
pub use packet::{Frame, PacketError, ProtocolVersion};
pub use status::{DeviceError, StatusPacket};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// The broadcast ID. Instructions sent to this ID are executed by every device on the bus and
/// no status packet is returned (except for ping in protocol 2.0).
pub const BROADCAST_ID: u8 = 0xFE;

/// Highest assignable device ID.
pub const MAX_ID: u8 = 0xFC;
