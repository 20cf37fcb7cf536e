//! # Acquisition Synchronizer
//!
//! The synchronizer runs once for each strain batch delivered by the DAQ. It converts the batch
//! to force and torque, evaluates the alarm, fetches the matching pose frame from the capture
//! server and, while recording, appends the result to the active trial. The orientation of the
//! first rigid body in the frame is passed on to the coverage tracker.
//!
//! [`AcqPipeline`] runs the synchronizer on a worker thread fed by the strain source's sampling
//! thread, so that the blocking frame request never delays sampling.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod pipeline;
mod state;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::mocap::StateEvent;
use serde::{Deserialize, Serialize};
use util::archive::ArchiveError;

use crate::{alarm::AlarmMode, coverage::CoverageUpdate, daq::DaqError};

pub use pipeline::*;
pub use state::*;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Parameters of the acquisition synchronizer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AcqSyncParams {
    /// Position of the joint centre relative to the load cell origin, in the load cell frame.
    ///
    /// Units: meters
    pub joint_center_m: [f64; 3],

    pub alarm_mode: AlarmMode,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Outputs published to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RigEvent {
    /// A new capture server session state was observed.
    State(StateEvent),

    /// Alert level of the latest computed sample.
    Alert(u8),

    /// A change to one of the coverage accumulators.
    Coverage(CoverageUpdate),
}

#[derive(Debug, thiserror::Error)]
pub enum AcqSyncError {
    #[error("The sensor has not been zeroed, no calibration is set")]
    CalibrationUnset,

    #[error("A calibration is already set and cannot be replaced")]
    CalibrationAlreadySet,

    #[error("Operation not allowed while recording is active")]
    RecordingActive,

    #[error("Recording is enabled but no trial has been started")]
    NoActiveTrial,

    #[error("Received an empty strain batch")]
    EmptyBatch,

    #[error("The zeroing acquisition returned no samples")]
    NoZeroSamples,

    #[error("Strain source error: {0}")]
    Daq(#[from] DaqError),

    #[error("Could not archive the computed sample: {0}")]
    Archive(#[from] ArchiveError),

    #[error("The motion capture client lock was poisoned")]
    LockPoisoned,

    #[error("The synchronizer worker thread panicked")]
    WorkerPanicked,
}
