//! # Fish library.
//!
//! This library allows the executable and the integration tests to access the modules of the fish
//! crate.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Actuator link - owns the serial channel to the actuator
pub mod act_link;

/// Motion generator - computes the oscillation and drives the actuator at a fixed cadence
pub mod motion;

/// Parameters of the executable
pub mod params;
