//! # Threshold Alarm
//!
//! Maps a compensated torque vector to an alert level between 0 and 5. Level `n` fires when the
//! torque exceeds `n * scale`, where the scale is set per subtrial.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Highest alert level.
pub const MAX_ALERT_LEVEL: u8 = 5;

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// The quantity compared against the threshold ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlarmMode {
    /// Euclidean norm of the torque.
    Magnitude,

    /// Largest absolute component of the torque.
    Component,
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct ThresholdAlarm {
    pub mode: AlarmMode,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ThresholdAlarm {
    pub fn new(mode: AlarmMode) -> Self {
        Self { mode }
    }

    /// Alert level of the given torque, see [`evaluate`].
    pub fn evaluate(&self, torque: &Vector3<f64>, scale: f64) -> u8 {
        evaluate(torque, scale, self.mode)
    }
}

impl Default for AlarmMode {
    fn default() -> Self {
        AlarmMode::Magnitude
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Return the highest level whose threshold `level * scale` is strictly exceeded, or 0 if none is.
///
/// Non-finite torques give level 0.
pub fn evaluate(torque: &Vector3<f64>, scale: f64, mode: AlarmMode) -> u8 {
    let value = match mode {
        AlarmMode::Magnitude => torque.norm(),
        AlarmMode::Component => torque.amax(),
    };

    if !value.is_finite() {
        return 0;
    }

    (1..=MAX_ALERT_LEVEL)
        .rev()
        .find(|&level| value > scale * level as f64)
        .unwrap_or(0)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
