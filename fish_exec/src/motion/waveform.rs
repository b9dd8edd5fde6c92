//! Periodic waveforms the generator can follow.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::f64::consts::TAU;

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A unit amplitude periodic function.
pub trait Waveform: Send + Sync {
    /// Value after `cycles` periods from the start, in `[-1, 1]`.
    ///
    /// All built in waveforms are 0 at the start and rising.
    fn sample(&self, cycles: f64) -> f64;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct Sine;

#[derive(Debug, Clone, Copy, Default)]
pub struct Triangle;

#[derive(Debug, Clone, Copy, Default)]
pub struct Square;

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Waveform selection in the parameter file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaveformKind {
    Sine,
    Triangle,
    Square,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Waveform for Sine {
    fn sample(&self, cycles: f64) -> f64 {
        (TAU * cycles).sin()
    }
}

impl Waveform for Triangle {
    fn sample(&self, cycles: f64) -> f64 {
        let p = cycles.rem_euclid(1.0);

        if p < 0.25 {
            4.0 * p
        } else if p < 0.75 {
            2.0 - 4.0 * p
        } else {
            4.0 * p - 4.0
        }
    }
}

impl Waveform for Square {
    fn sample(&self, cycles: f64) -> f64 {
        if cycles.rem_euclid(1.0) < 0.5 {
            1.0
        } else {
            -1.0
        }
    }
}

impl WaveformKind {
    pub fn build(self) -> Box<dyn Waveform> {
        match self {
            WaveformKind::Sine => Box::new(Sine),
            WaveformKind::Triangle => Box::new(Triangle),
            WaveformKind::Square => Box::new(Square),
        }
    }
}

impl Default for WaveformKind {
    fn default() -> Self {
        WaveformKind::Sine
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
