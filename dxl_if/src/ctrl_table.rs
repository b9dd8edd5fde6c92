//! # X-series control table
//!
//! Only the items the controller touches are listed. The same table is used with protocol 1.0
//! and 2.0, X-series firmware keeps the addresses when switching protocols.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

pub const MODEL_NUMBER: CtrlItem = CtrlItem::new("model_number", 0, 2);
pub const FIRMWARE_VERSION: CtrlItem = CtrlItem::new("firmware_version", 6, 1);
pub const OPERATING_MODE: CtrlItem = CtrlItem::new("operating_mode", 11, 1);
pub const TORQUE_ENABLE: CtrlItem = CtrlItem::new("torque_enable", 64, 1);
pub const HARDWARE_ERROR_STATUS: CtrlItem = CtrlItem::new("hardware_error_status", 70, 1);
pub const PROFILE_ACCELERATION: CtrlItem = CtrlItem::new("profile_acceleration", 108, 4);
pub const PROFILE_VELOCITY: CtrlItem = CtrlItem::new("profile_velocity", 112, 4);
pub const GOAL_POSITION: CtrlItem = CtrlItem::new("goal_position", 116, 4);
pub const PRESENT_POSITION: CtrlItem = CtrlItem::new("present_position", 132, 4);

/// Number of bytes in the control table.
pub const TABLE_SIZE: usize = 147;

/// Items below this address live in EEPROM and can only be written with torque disabled.
pub const EEPROM_END: u16 = 64;

pub const TORQUE_OFF: u32 = 0;
pub const TORQUE_ON: u32 = 1;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// An item in the control table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CtrlItem {
    pub name: &'static str,
    pub addr: u16,

    /// Width of the item in bytes (1, 2 or 4)
    pub len: u8,
}

/// Legal goal position range of an actuator, inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionRange {
    pub min: i32,
    pub max: i32,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Operating modes of X-series actuators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatingMode {
    Current,
    Velocity,
    Position,
    ExtendedPosition,
    CurrentBasedPosition,
    Pwm,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl CtrlItem {
    pub const fn new(name: &'static str, addr: u16, len: u8) -> Self {
        Self { name, addr, len }
    }

    /// Little endian encoding of `value`, truncated to the item width.
    pub fn encode(&self, value: u32) -> Vec<u8> {
        value.to_le_bytes()[..self.len as usize].to_vec()
    }

    /// Decode a little endian value of the item width from the start of `bytes`.
    pub fn decode(&self, bytes: &[u8]) -> Option<u32> {
        let bytes = bytes.get(..self.len as usize)?;

        Some(
            bytes
                .iter()
                .rev()
                .fold(0u32, |acc, b| (acc << 8) | *b as u32),
        )
    }
}

impl PositionRange {
    /// Full single turn range of a 12 bit X-series encoder.
    pub const X_SERIES: Self = Self { min: 0, max: 4095 };

    /// Create a new range, `None` if `min > max`.
    pub fn new(min: i32, max: i32) -> Option<Self> {
        if min <= max {
            Some(Self { min, max })
        } else {
            None
        }
    }

    pub fn contains(&self, position: i32) -> bool {
        position >= self.min && position <= self.max
    }

    pub fn clamp(&self, position: i32) -> i32 {
        position.max(self.min).min(self.max)
    }
}

impl Default for PositionRange {
    fn default() -> Self {
        Self::X_SERIES
    }
}

impl OperatingMode {
    /// Value written to the operating mode item.
    pub fn value(self) -> u32 {
        match self {
            OperatingMode::Current => 0,
            OperatingMode::Velocity => 1,
            OperatingMode::Position => 3,
            OperatingMode::ExtendedPosition => 4,
            OperatingMode::CurrentBasedPosition => 5,
            OperatingMode::Pwm => 16,
        }
    }

    pub fn from_value(value: u32) -> Option<Self> {
        match value {
            0 => Some(OperatingMode::Current),
            1 => Some(OperatingMode::Velocity),
            3 => Some(OperatingMode::Position),
            4 => Some(OperatingMode::ExtendedPosition),
            5 => Some(OperatingMode::CurrentBasedPosition),
            16 => Some(OperatingMode::Pwm),
            _ => None,
        }
    }
}

impl Default for OperatingMode {
    fn default() -> Self {
        OperatingMode::Position
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
