//! # Equipment Interface
//!
//! This module defines the data structures produced by rig equipment.

// -----------------------------------------------------------------------------------------------
// MODULES
// -----------------------------------------------------------------------------------------------

pub mod daq;
