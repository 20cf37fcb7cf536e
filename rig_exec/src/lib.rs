//! # Rig library.
//!
//! This library allows other crates in the workspace (and the integration tests) to access items
//! defined inside the rig executable crate.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Acquisition synchronizer - fuses strain batches with pose frames into computed samples
pub mod acq_sync;

/// Threshold alarm - maps compensated torque to an alert level
pub mod alarm;

/// Load cell calibration model
pub mod calib;

/// Capture controller - drives the capture server through its session states
pub mod capture_ctrl;

/// Orientation coverage tracker - accumulates visited orientations on a sphere mesh
pub mod coverage;

/// Strain data sources
pub mod daq;

/// Executable parameters
pub mod params;

/// Sequence planner - randomised order of the subtrial motions
pub mod seq_plan;

/// Trial data model
pub mod trial;

// ------------------------------------------------------------------------------------------------
// EXPORTS
// ------------------------------------------------------------------------------------------------

pub use acq_sync::RigEvent;
