//! Validated motion parameters.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::time::Duration;

use dxl_if::PositionRange;
use serde::Serialize;

use super::{MotionParamsError, Waveform};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Parameters of the oscillation.
///
/// Can only be built through [`MotionParams::new`], so a value of this type always describes a
/// trajectory which stays inside its position range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MotionParams {
    center: i32,
    amplitude: i32,
    frequency_hz: f64,
    tick_period: Duration,
    range: PositionRange,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl MotionParams {
    pub fn new(
        center: i32,
        amplitude: i32,
        frequency_hz: f64,
        tick_period: Duration,
        range: PositionRange,
    ) -> Result<Self, MotionParamsError> {
        if amplitude < 0 {
            return Err(MotionParamsError::NegativeAmplitude(amplitude));
        }

        if !frequency_hz.is_finite() || frequency_hz <= 0.0 {
            return Err(MotionParamsError::InvalidFrequency(frequency_hz));
        }

        if tick_period == Duration::from_secs(0) {
            return Err(MotionParamsError::ZeroTickPeriod);
        }

        // An overflowing extreme is out of any range
        match (center.checked_sub(amplitude), center.checked_add(amplitude)) {
            (Some(low), Some(high)) if range.contains(low) && range.contains(high) => (),
            _ => {
                return Err(MotionParamsError::OutOfRange {
                    center,
                    amplitude,
                    min: range.min,
                    max: range.max,
                })
            }
        }

        Ok(Self {
            center,
            amplitude,
            frequency_hz,
            tick_period,
            range,
        })
    }

    pub fn center(&self) -> i32 {
        self.center
    }

    pub fn amplitude(&self) -> i32 {
        self.amplitude
    }

    pub fn frequency_hz(&self) -> f64 {
        self.frequency_hz
    }

    pub fn tick_period(&self) -> Duration {
        self.tick_period
    }

    pub fn range(&self) -> PositionRange {
        self.range
    }

    /// Position to command `elapsed_s` seconds after the start.
    ///
    /// `round(center + amplitude * w(frequency * t))`, clamped to the position range.
    pub fn position_at(&self, waveform: &dyn Waveform, elapsed_s: f64) -> i32 {
        let w = waveform.sample(self.frequency_hz * elapsed_s);
        let raw = self.center as f64 + self.amplitude as f64 * w;

        self.range.clamp(raw.round() as i32)
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
