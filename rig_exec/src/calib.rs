//! # Load cell calibration
//!
//! The load cell reports six raw strain voltages which are converted into three forces and three
//! torques by a manufacturer supplied 6x6 matrix. The unloaded voltages drift between sessions, so
//! an offset is measured by zeroing the sensor before any trial is recorded.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::eqpt::daq::{mean_volts, StrainSample, NUM_STRAIN_CHANNELS};
use nalgebra::{Matrix6, RowVector6, Vector3};
use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Calibration parameters loaded from `calib.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct CalibrationParams {
    /// Rows of the manufacturer's calibration matrix.
    pub matrix: [[f64; NUM_STRAIN_CHANNELS]; NUM_STRAIN_CHANNELS],
}

/// Linear model converting raw strain voltages to force and torque.
///
/// Once built the model is immutable. Re-zeroing the sensor produces a new model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationModel {
    matrix: Matrix6<f64>,
    offset: RowVector6<f64>,
}

/// Force and torque measured by the load cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForceTorque {
    /// Units: newtons
    pub force_n: Vector3<f64>,

    /// Units: newton meters
    pub torque_nm: Vector3<f64>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl CalibrationParams {
    pub fn matrix(&self) -> Matrix6<f64> {
        let mut m = Matrix6::zeros();

        for (i, row) in self.matrix.iter().enumerate() {
            for (j, v) in row.iter().enumerate() {
                m[(i, j)] = *v;
            }
        }

        m
    }
}

impl CalibrationModel {
    pub fn new(matrix: Matrix6<f64>, offset: [f64; NUM_STRAIN_CHANNELS]) -> Self {
        Self {
            matrix,
            offset: RowVector6::from_row_slice(&offset),
        }
    }

    /// Build a model with the offset set to the mean of the given unloaded samples.
    ///
    /// Returns `None` if there are no samples.
    pub fn zeroed(matrix: Matrix6<f64>, samples: &[StrainSample]) -> Option<Self> {
        mean_volts(samples).map(|offset| Self::new(matrix, offset))
    }

    pub fn matrix(&self) -> &Matrix6<f64> {
        &self.matrix
    }

    pub fn offset(&self) -> [f64; NUM_STRAIN_CHANNELS] {
        let mut offset = [0f64; NUM_STRAIN_CHANNELS];
        offset.copy_from_slice(self.offset.as_slice());
        offset
    }

    /// Convert mean channel voltages into force and torque.
    ///
    /// The difference between the offset and the voltages is taken as a row vector and multiplied
    /// by the calibration matrix.
    pub fn force_torque(&self, volts: &[f64; NUM_STRAIN_CHANNELS]) -> ForceTorque {
        let ft = (self.offset - RowVector6::from_row_slice(volts)) * self.matrix;

        ForceTorque {
            force_n: Vector3::new(ft[0], ft[1], ft[2]),
            torque_nm: Vector3::new(ft[3], ft[4], ft[5]),
        }
    }
}

impl ForceTorque {
    /// Torque taken about the joint centre, given as the centre's offset from the load cell.
    ///
    /// Units: `joint_center_m` in meters, result in newton meters
    pub fn compensated_torque(&self, joint_center_m: &Vector3<f64>) -> Vector3<f64> {
        self.torque_nm - joint_center_m.cross(&self.force_n)
    }

    pub fn as_array(&self) -> [f64; 6] {
        [
            self.force_n[0],
            self.force_n[1],
            self.force_n[2],
            self.torque_nm[0],
            self.torque_nm[1],
            self.torque_nm[2],
        ]
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_scenario() {
        let model = CalibrationModel::new(Matrix6::identity(), [1.0; 6]);
        let ft = model.force_torque(&[0.0; 6]);

        assert_eq!(ft.as_array(), [1.0; 6]);
        assert_eq!(ft.compensated_torque(&Vector3::zeros()), ft.torque_nm);
    }

    #[test]
    fn test_row_vector_product() {
        // Each output is the sum of its column, weighted by the voltage difference on each row
        let mut matrix = Matrix6::zeros();
        for i in 0..6 {
            for j in 0..6 {
                matrix[(i, j)] = (i * 6 + j) as f64;
            }
        }

        let model = CalibrationModel::new(matrix, [1.0; 6]);
        let ft = model.force_torque(&[0.0; 6]).as_array();

        for (j, v) in ft.iter().enumerate() {
            let col_sum: f64 = (0..6).map(|i| (i * 6 + j) as f64).sum();
            assert_eq!(*v, col_sum);
        }

        // Voltages above the offset give negative loads
        let ft = model.force_torque(&[2.0, 1.0, 1.0, 1.0, 1.0, 1.0]).as_array();
        assert_eq!(ft[0], -0.0);
        assert_eq!(ft[1], -1.0);
    }

    #[test]
    fn test_compensated_torque() {
        let ft = ForceTorque {
            force_n: Vector3::new(0.0, 0.0, 10.0),
            torque_nm: Vector3::new(1.0, 0.0, 0.0),
        };

        // Joint 0.1 m along X: r x F = (0, -1, 0)
        let comp = ft.compensated_torque(&Vector3::new(0.1, 0.0, 0.0));
        assert!((comp - Vector3::new(1.0, 1.0, 0.0)).norm() < 1e-12);
    }

    #[test]
    fn test_zeroed() {
        let samples: Vec<StrainSample> = (0..4)
            .map(|i| StrainSample {
                timestamp_s: i as f64,
                volts: [i as f64; 6],
            })
            .collect();

        let model = CalibrationModel::zeroed(Matrix6::identity(), &samples).unwrap();
        assert_eq!(model.offset(), [1.5; 6]);

        assert!(CalibrationModel::zeroed(Matrix6::identity(), &[]).is_none());
    }

    #[test]
    fn test_params_matrix() {
        let mut rows = [[0.0; 6]; 6];
        rows[0][5] = 3.0;
        let params = CalibrationParams { matrix: rows };

        assert_eq!(params.matrix()[(0, 5)], 3.0);
        assert_eq!(params.matrix()[(5, 0)], 0.0);
    }
}
