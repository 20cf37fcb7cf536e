//! Implementations for the AcqSync state structure

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use comms_if::{
    eqpt::daq::StrainBatch,
    mocap::{Frame, MocapClient},
};
use log::{info, trace, warn};
use nalgebra::{Matrix6, Vector3};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

// Internal
use super::{AcqSyncError, AcqSyncParams};
use crate::{
    alarm::ThresholdAlarm,
    calib::{CalibrationModel, ForceTorque},
    coverage::{CoverageUpdate, OrientationCoverageTracker},
    daq::StrainSource,
    trial::{ComputedSample, Trial},
};
use util::{
    archive::{ArchiveError, Archiver},
    module::State,
    session::Session,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Acquisition synchronizer state
pub struct AcqSync {
    params: AcqSyncParams,
    joint_center_m: Vector3<f64>,

    client: Arc<Mutex<MocapClient>>,

    /// Manufacturer calibration matrix, combined with the measured offset on zeroing.
    matrix: Matrix6<f64>,
    calibration: Option<CalibrationModel>,

    alarm: ThresholdAlarm,
    threshold_scale: f64,

    coverage: Option<OrientationCoverageTracker>,

    recording: Arc<AtomicBool>,
    trial: Option<Trial>,

    arch_computed: Archiver,
}

/// Output of one synchronizer step.
#[derive(Debug, Clone)]
pub struct OutputData {
    pub force_torque: ForceTorque,

    /// Units: newton meters
    pub compensated_torque_nm: Vector3<f64>,

    pub alert_level: u8,

    pub coverage: Vec<CoverageUpdate>,
}

/// Status report for one synchronizer step.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusReport {
    /// A pose frame was received for this batch.
    pub frame_received: bool,

    /// The batch was appended to the active trial.
    pub recorded: bool,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl AcqSync {
    /// Create a new synchronizer. Archiving is disabled until [`State::init`] is called.
    pub fn new(
        params: AcqSyncParams,
        client: Arc<Mutex<MocapClient>>,
        matrix: Matrix6<f64>,
        coverage: Option<OrientationCoverageTracker>,
    ) -> Self {
        let joint_center_m = Vector3::from(params.joint_center_m);
        let alarm = ThresholdAlarm::new(params.alarm_mode);

        Self {
            params,
            joint_center_m,
            client,
            matrix,
            calibration: None,
            alarm,
            threshold_scale: 1.0,
            coverage,
            recording: Arc::new(AtomicBool::new(false)),
            trial: None,
            arch_computed: Archiver::default(),
        }
    }

    pub fn params(&self) -> &AcqSyncParams {
        &self.params
    }

    pub fn calibration(&self) -> Option<&CalibrationModel> {
        self.calibration.as_ref()
    }

    pub fn coverage(&self) -> Option<&OrientationCoverageTracker> {
        self.coverage.as_ref()
    }

    /// Set the calibration. It can only be set once, and not while recording.
    pub fn set_calibration(&mut self, model: CalibrationModel) -> Result<(), AcqSyncError> {
        self.check_calibration_unset()?;

        self.calibration = Some(model);
        Ok(())
    }

    /// Zero the sensor by averaging a foreground acquisition of `duration_s` seconds.
    ///
    /// The specimen must be unloaded. Nothing is recorded. Fails if a calibration is already set.
    pub fn zero(
        &mut self,
        source: &mut dyn StrainSource,
        duration_s: f64,
    ) -> Result<&CalibrationModel, AcqSyncError> {
        self.check_calibration_unset()?;

        let num_samples = util::time::num_samples(duration_s, source.sample_rate_hz());
        info!(
            "Zeroing the load cell over {} samples ({:.2} s)",
            num_samples, duration_s
        );

        let samples = source.acquire(num_samples)?;
        let model =
            CalibrationModel::zeroed(self.matrix, &samples).ok_or(AcqSyncError::NoZeroSamples)?;

        info!("Zeroing offset: {:.4?} V", model.offset());

        Ok(self.calibration.insert(model))
    }

    /// Make `trial` the active trial. Its threshold scale becomes the alarm scale and the
    /// coverage accumulators are cleared.
    pub fn begin_trial(&mut self, mut trial: Trial) -> Result<(), AcqSyncError> {
        if self.is_recording() {
            return Err(AcqSyncError::RecordingActive);
        }
        if self.calibration.is_none() {
            return Err(AcqSyncError::CalibrationUnset);
        }

        trial.calibration = self.calibration.clone();
        self.threshold_scale = trial.threshold_scale;

        if let Some(ref mut cov) = self.coverage {
            cov.reset();
        }

        info!(
            "Subtrial {} ({}) ready, alarm scale {}",
            trial.subtrial, trial.label, trial.threshold_scale
        );
        self.trial = Some(trial);

        Ok(())
    }

    /// Remove and return the active trial. Not allowed while recording.
    pub fn take_trial(&mut self) -> Result<Option<Trial>, AcqSyncError> {
        if self.is_recording() {
            return Err(AcqSyncError::RecordingActive);
        }

        Ok(self.trial.take())
    }

    pub fn trial(&self) -> Option<&Trial> {
        self.trial.as_ref()
    }

    pub fn set_recording(&self, recording: bool) {
        self.recording.store(recording, Ordering::SeqCst);
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    /// Shared recording flag, checked before every append to the trial.
    pub fn recording_flag(&self) -> Arc<AtomicBool> {
        self.recording.clone()
    }

    fn check_calibration_unset(&self) -> Result<(), AcqSyncError> {
        if self.is_recording() {
            return Err(AcqSyncError::RecordingActive);
        }
        if self.calibration.is_some() {
            return Err(AcqSyncError::CalibrationAlreadySet);
        }

        Ok(())
    }

    fn request_frame(&self) -> Result<Option<Frame>, AcqSyncError> {
        let mut client = self
            .client
            .lock()
            .map_err(|_| AcqSyncError::LockPoisoned)?;

        match client.request_frame() {
            Ok(f) => Ok(f),
            Err(e) => {
                warn!("Could not get a pose frame: {}", e);
                Ok(None)
            }
        }
    }
}

impl State for AcqSync {
    /// Path of the computed sample archive, relative to the session archive root
    type InitData = &'static str;
    type InitError = ArchiveError;

    type InputData = StrainBatch;
    type OutputData = OutputData;
    type StatusReport = StatusReport;
    type ProcError = AcqSyncError;

    /// Attach the computed sample archive.
    fn init(&mut self, init_data: Self::InitData, session: &Session) -> Result<(), Self::InitError> {
        self.arch_computed = Archiver::from_path(session, init_data)?;
        Ok(())
    }

    fn proc(
        &mut self,
        input_data: &Self::InputData,
    ) -> Result<(Self::OutputData, Self::StatusReport), Self::ProcError> {
        let mut report = StatusReport::default();

        // ---- FORCE/TORQUE ----

        let mean = input_data.mean().ok_or(AcqSyncError::EmptyBatch)?;
        let calibration = self
            .calibration
            .as_ref()
            .ok_or(AcqSyncError::CalibrationUnset)?;

        let force_torque = calibration.force_torque(&mean);
        let compensated_torque_nm = force_torque.compensated_torque(&self.joint_center_m);

        // ---- ALARM ----

        let alert_level = self
            .alarm
            .evaluate(&compensated_torque_nm, self.threshold_scale);
        if alert_level > 0 {
            info!(
                "Alert level {} (torque {:.3} Nm)",
                alert_level,
                compensated_torque_nm.norm()
            );
        }

        // ---- POSE ----

        let frame = self.request_frame()?;
        report.frame_received = frame.is_some();
        if frame.is_none() {
            trace!("No pose frame for this batch");
        }

        // ---- RECORDING ----

        if self.is_recording() {
            let trial = self.trial.as_mut().ok_or(AcqSyncError::NoActiveTrial)?;

            if let Some(ref frame) = frame {
                let sample = ComputedSample {
                    timestamp_s: input_data.end_timestamp_s().unwrap_or(std::f64::NAN),
                    force_torque,
                    compensated_torque_nm,
                    frame: frame.clone(),
                };

                self.arch_computed
                    .serialise(sample.to_record(trial.subtrial, alert_level))?;
                trial.samples.push(sample);
            }

            trial.strain_log.push(input_data.clone());
            report.recorded = true;
        }

        // ---- COVERAGE ----

        let coverage = match (
            self.coverage.as_mut(),
            frame.as_ref().and_then(Frame::first_body_rotation),
        ) {
            (Some(cov), Some(rot)) => cov.update(&rot),
            _ => Vec::new(),
        };

        Ok((
            OutputData {
                force_torque,
                compensated_torque_nm,
                alert_level,
                coverage,
            },
            report,
        ))
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
