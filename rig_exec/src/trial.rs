//! # Trial data model
//!
//! A trial holds everything recorded during one subtrial: the computed samples in arrival order,
//! the raw strain batches, and the metadata and calibration needed to interpret them later.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{eqpt::daq::StrainBatch, mocap::Frame};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::calib::{CalibrationModel, ForceTorque};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Information on the specimen under test, entered by the experimenter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrialMetadata {
    pub subject: String,
    pub limb: String,
    pub joint: String,

    /// Preservation state of the specimen (e.g. fresh, frozen).
    pub preservation: String,
}

/// A force/torque measurement paired with the pose frame fetched alongside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputedSample {
    /// Timestamp of the last strain sample in the batch.
    ///
    /// Units: seconds
    pub timestamp_s: f64,

    pub force_torque: ForceTorque,

    /// Torque about the joint centre.
    ///
    /// Units: newton meters
    pub compensated_torque_nm: Vector3<f64>,

    pub frame: Frame,
}

/// Flat form of a [`ComputedSample`] for CSV archiving.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ComputedRecord {
    pub subtrial: usize,
    pub timestamp_s: f64,
    pub frame_number: u32,
    pub frame_timestamp_us: u64,
    pub fx_n: f64,
    pub fy_n: f64,
    pub fz_n: f64,
    pub tx_nm: f64,
    pub ty_nm: f64,
    pub tz_nm: f64,
    pub comp_tx_nm: f64,
    pub comp_ty_nm: f64,
    pub comp_tz_nm: f64,
    pub alert_level: u8,
}

/// The recording of one subtrial.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Trial {
    pub metadata: TrialMetadata,

    /// Index of the subtrial in the sequence plan, starting at 1.
    pub subtrial: usize,

    /// Motion label of the subtrial.
    pub label: String,

    /// Alarm threshold scale used while recording.
    pub threshold_scale: f64,

    /// Calibration in force while recording.
    pub calibration: Option<CalibrationModel>,

    pub samples: Vec<ComputedSample>,

    /// Raw strain batches in arrival order.
    pub strain_log: Vec<StrainBatch>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ComputedSample {
    pub fn to_record(&self, subtrial: usize, alert_level: u8) -> ComputedRecord {
        let ft = self.force_torque.as_array();

        ComputedRecord {
            subtrial,
            timestamp_s: self.timestamp_s,
            frame_number: self.frame.frame_number,
            frame_timestamp_us: self.frame.timestamp,
            fx_n: ft[0],
            fy_n: ft[1],
            fz_n: ft[2],
            tx_nm: ft[3],
            ty_nm: ft[4],
            tz_nm: ft[5],
            comp_tx_nm: self.compensated_torque_nm[0],
            comp_ty_nm: self.compensated_torque_nm[1],
            comp_tz_nm: self.compensated_torque_nm[2],
            alert_level,
        }
    }
}

impl Trial {
    /// Create an empty trial for the given subtrial.
    pub fn new(
        metadata: TrialMetadata,
        subtrial: usize,
        label: &str,
        threshold_scale: f64,
        calibration: Option<CalibrationModel>,
    ) -> Self {
        Self {
            metadata,
            subtrial,
            label: label.to_string(),
            threshold_scale,
            calibration,
            samples: Vec::new(),
            strain_log: Vec::new(),
        }
    }

    /// Session relative path this trial is exported to.
    pub fn export_path(&self) -> String {
        format!("trials/{}_{}.json", self.subtrial, self.label)
    }

    /// Name of the capture file saved on the capture server for this trial.
    pub fn capture_name(&self) -> String {
        format!("{}_{}_{}", self.metadata.subject, self.subtrial, self.label)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty() && self.strain_log.is_empty()
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        let trial = Trial::new(
            TrialMetadata {
                subject: String::from("S04"),
                ..Default::default()
            },
            5,
            "AFL",
            4.0,
            None,
        );

        assert_eq!(trial.export_path(), "trials/5_AFL.json");
        assert_eq!(trial.capture_name(), "S04_5_AFL");
        assert!(trial.is_empty());
    }

    #[test]
    fn test_record_is_flat() {
        let sample = ComputedSample {
            timestamp_s: 1.5,
            force_torque: ForceTorque {
                force_n: Vector3::new(1.0, 2.0, 3.0),
                torque_nm: Vector3::new(4.0, 5.0, 6.0),
            },
            compensated_torque_nm: Vector3::new(7.0, 8.0, 9.0),
            frame: Frame {
                timestamp: 10_000,
                frame_number: 3,
                markers: vec![],
                marker_flags: None,
                bodies: vec![],
                body_flags: None,
            },
        };

        let record = sample.to_record(2, 1);
        assert_eq!(record.frame_number, 3);
        assert_eq!(record.tz_nm, 6.0);
        assert_eq!(record.comp_tx_nm, 7.0);

        let mut writer = util::archive::Writer::from_writer(vec![]);
        writer.serialize(record).unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        assert!(text.starts_with("subtrial,timestamp_s,frame_number"));
    }
}
