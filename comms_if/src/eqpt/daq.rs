//! # Strain DAQ Equipment Data
//!
//! The load cell is read as six raw strain gauge channels. Samples are delivered by the DAQ in
//! batches, each batch covering roughly one motion capture frame period.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Number of strain channels on the load cell.
pub const NUM_STRAIN_CHANNELS: usize = 6;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A single reading of all strain channels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrainSample {
    /// Host-side acquisition time of the sample.
    ///
    /// Units: seconds since the start of the acquisition
    pub timestamp_s: f64,

    /// Raw channel voltages.
    ///
    /// Units: volts
    pub volts: [f64; NUM_STRAIN_CHANNELS],
}

/// A group of samples delivered together by the DAQ.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrainBatch {
    pub samples: Vec<StrainSample>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl StrainBatch {
    pub fn new(samples: Vec<StrainSample>) -> Self {
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Per-channel mean of the batch, or `None` if the batch is empty.
    pub fn mean(&self) -> Option<[f64; NUM_STRAIN_CHANNELS]> {
        mean_volts(&self.samples)
    }

    /// Timestamp of the last sample in the batch.
    pub fn end_timestamp_s(&self) -> Option<f64> {
        self.samples.last().map(|s| s.timestamp_s)
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Per-channel mean of the given samples, or `None` if there are no samples.
pub fn mean_volts(samples: &[StrainSample]) -> Option<[f64; NUM_STRAIN_CHANNELS]> {
    if samples.is_empty() {
        return None;
    }

    let mut sum = [0f64; NUM_STRAIN_CHANNELS];
    for s in samples {
        for (acc, v) in sum.iter_mut().zip(s.volts.iter()) {
            *acc += v;
        }
    }

    let n = samples.len() as f64;
    for acc in sum.iter_mut() {
        *acc /= n;
    }

    Some(sum)
}
