//! # Fish Executable Parameters

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::time::Duration;

use dxl_if::{OperatingMode, PositionRange, ProtocolVersion};
use serde::Deserialize;

use crate::{
    act_link::MotionProfile,
    motion::{MotionParams, MotionParamsError, RunOptions, WaveformKind},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct FishExecParams {
    pub link: LinkParams,
    pub motion: MotionConfig,
}

/// Where and how to reach the actuator.
#[derive(Debug, Clone, Deserialize)]
pub struct LinkParams {
    /// Serial device path, e.g. `/dev/ttyUSB0` or `/dev/serial0`
    pub port: String,

    pub actuator_id: u8,

    /// Either `1.0` or `2.0`
    pub protocol_version: ProtocolVersion,

    pub baud_rate: u32,

    /// Time to wait for a status packet.
    ///
    /// Units: milliseconds
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,

    /// BCM number of the GPIO driving the bus direction, if the adapter doesn't switch itself
    #[serde(default)]
    pub dir_pin: Option<u8>,

    /// The adapter loops transmitted bytes back to the receiver (single wire circuits without a
    /// receive disable)
    #[serde(default)]
    pub echo: bool,
}

/// Motion configuration as written in the parameter file.
#[derive(Debug, Clone, Deserialize)]
pub struct MotionConfig {
    // ---- TRAJECTORY ----
    pub center_position: i32,

    pub amplitude: i32,

    /// Units: hertz
    pub frequency_hz: f64,

    /// Units: milliseconds
    #[serde(default = "default_tick_period_ms")]
    pub tick_period_ms: u64,

    #[serde(default)]
    pub waveform: WaveformKind,

    // ---- ACTUATOR ----
    #[serde(default = "default_min_position")]
    pub min_position: i32,

    #[serde(default = "default_max_position")]
    pub max_position: i32,

    #[serde(default)]
    pub operating_mode: OperatingMode,

    pub max_profile_velocity: Option<u32>,

    pub max_profile_acceleration: Option<u32>,

    // ---- RUN ----
    /// Stop the run once this many goal writes in a row have failed. Unlimited if absent.
    pub max_consecutive_write_errors: Option<u32>,

    /// Return to the center position when stopping
    #[serde(default = "default_true")]
    pub park_on_stop: bool,

    /// Time given to the actuator to reach the park position.
    ///
    /// Units: milliseconds
    #[serde(default = "default_park_settle_ms")]
    pub park_settle_ms: u64,

    /// Disable torque on exit, otherwise the actuator keeps holding its last position
    #[serde(default = "default_true")]
    pub release_on_exit: bool,

    /// Period of the status log, zero to disable.
    ///
    /// Units: seconds
    #[serde(default = "default_status_period_s")]
    pub status_period_s: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl LinkParams {
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

impl MotionConfig {
    /// Validate the trajectory settings.
    pub fn motion_params(&self) -> Result<MotionParams, MotionParamsError> {
        let range = PositionRange::new(self.min_position, self.max_position).ok_or(
            MotionParamsError::InvalidRange {
                min: self.min_position,
                max: self.max_position,
            },
        )?;

        MotionParams::new(
            self.center_position,
            self.amplitude,
            self.frequency_hz,
            Duration::from_millis(self.tick_period_ms),
            range,
        )
    }

    pub fn profile(&self) -> MotionProfile {
        MotionProfile {
            max_velocity: self.max_profile_velocity,
            max_acceleration: self.max_profile_acceleration,
        }
    }

    pub fn run_options(&self) -> RunOptions {
        let status_period = if self.status_period_s.is_finite() && self.status_period_s > 0.0 {
            Some(Duration::from_secs_f64(self.status_period_s))
        } else {
            None
        };

        RunOptions {
            max_consecutive_write_errors: self.max_consecutive_write_errors,
            status_period,
        }
    }

    pub fn park_settle(&self) -> Duration {
        Duration::from_millis(self.park_settle_ms)
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn default_io_timeout_ms() -> u64 {
    50
}

fn default_tick_period_ms() -> u64 {
    20
}

fn default_min_position() -> i32 {
    PositionRange::X_SERIES.min
}

fn default_max_position() -> i32 {
    PositionRange::X_SERIES.max
}

fn default_true() -> bool {
    true
}

fn default_park_settle_ms() -> u64 {
    1000
}

fn default_status_period_s() -> f64 {
    10.0
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
