//! # Motion Generator Module
//!
//! Computes the goal position of the actuator from the time elapsed since the generator started,
//! and pushes it to a [`PositionSink`](crate::act_link::PositionSink) at a fixed cadence.
//!
//! The commanded position is always a function of absolute elapsed time and the active
//! [`MotionParams`]. Nothing is accumulated between ticks, so late or missed ticks never shift
//! the phase of the trajectory.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod params;
mod run;
mod state;
mod waveform;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

pub use params::*;
pub use run::*;
pub use state::*;
pub use waveform::*;

use crate::act_link::LinkError;

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Invalid motion parameters.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MotionParamsError {
    #[error("Amplitude must not be negative, got {0}")]
    NegativeAmplitude(i32),

    #[error("Frequency must be positive and finite, got {0} Hz")]
    InvalidFrequency(f64),

    #[error("Tick period must be greater than zero")]
    ZeroTickPeriod,

    #[error("Position range is empty (min {min} > max {max})")]
    InvalidRange { min: i32, max: i32 },

    #[error(
        "Trajectory {center} ± {amplitude} leaves the legal position range [{min}, {max}]"
    )]
    OutOfRange {
        center: i32,
        amplitude: i32,
        min: i32,
        max: i32,
    },
}

/// Failure of a single tick.
#[derive(Debug, thiserror::Error)]
pub enum TickError {
    #[error("The motion generator has been stopped")]
    Stopped,

    #[error("Failed to command position {position} at t = {elapsed_s:.3} s: {source}")]
    Write {
        position: i32,
        elapsed_s: f64,
        source: LinkError,
    },
}

/// Reasons the run loop ended early.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Unrecoverable link failure: {0}")]
    Link(LinkError),

    #[error("{count} consecutive position writes failed (limit {limit})")]
    TooManyWriteErrors { count: u32, limit: u32 },
}
