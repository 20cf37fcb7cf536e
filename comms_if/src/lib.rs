//! # Communications interface crate.
//!
//! Provides the communications interfaces for the rig software: the motion capture server
//! protocol and the strain sensor equipment types.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Data definitions for equipment (like the load cell DAQ)
pub mod eqpt;

/// Motion capture server real-time protocol
pub mod mocap;
