//! # Rig Executable Parameters
//!
//! This module provide parameters for the rig executable, loaded from `rig_exec.toml`.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::mocap::MocapParams;
use serde::Deserialize;

use crate::{
    acq_sync::AcqSyncParams, capture_ctrl::CaptureCtrlParams, coverage::CoverageParams,
    daq::DaqParams,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct RigExecParams {
    /// Capture server connection
    pub mocap: MocapParams,

    /// Session state machine polling
    pub capture_ctrl: CaptureCtrlParams,

    /// Load cell acquisition
    pub daq: DaqParams,

    pub acq_sync: AcqSyncParams,

    pub coverage: CoverageParams,

    pub trial: TrialParams,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrialParams {
    /// Length of each recorded subtrial.
    ///
    /// Units: seconds
    pub duration_s: f64,
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        alarm::AlarmMode,
        calib::CalibrationParams,
        coverage::{CoverageMode, Projection},
    };
    use std::path::PathBuf;

    fn params_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../params")
    }

    #[test]
    fn test_load_rig_exec_params() {
        let params: RigExecParams =
            util::params::load_from_path(params_dir().join("rig_exec.toml")).unwrap();

        assert_eq!(params.mocap.port, 22223);
        assert_eq!(params.mocap.protocol_version, "1.13");
        assert_eq!(params.mocap.state_poll_attempts, 5);
        assert_eq!(params.capture_ctrl.max_polls, Some(200));
        assert_eq!(params.acq_sync.alarm_mode, AlarmMode::Magnitude);
        assert_eq!(params.coverage.mode, CoverageMode::Heatmap);
        assert_eq!(params.coverage.projections, vec![Projection::Cartesian]);
        assert_eq!(params.coverage.time_step, 2.0);
        assert!(params.daq.batch_size() >= 1);
        assert!(params.trial.duration_s > 0.0);
    }

    #[test]
    fn test_load_calib_params() {
        let params: CalibrationParams =
            util::params::load_from_path(params_dir().join("calib.toml")).unwrap();

        let m = params.matrix();
        assert!(m.iter().all(|v| v.is_finite()));
        assert!(m.determinant().abs() > 0.0);
    }

    #[test]
    fn test_unbounded_polls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture_ctrl.toml");
        std::fs::write(&path, "poll_interval_ms = 10\n").unwrap();

        let params: CaptureCtrlParams = util::params::load_from_path(&path).unwrap();

        assert_eq!(params.max_polls, None);
        assert_eq!(params.poll_interval_ms, 10);
    }
}
