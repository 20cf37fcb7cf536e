//! # Strain data sources
//!
//! A [`StrainSource`] delivers six channel load cell voltages, either on demand in the foreground
//! (used to zero the sensor) or continuously in batches from a background sampling thread.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::eqpt::daq::{StrainBatch, StrainSample, NUM_STRAIN_CHANNELS};
use log::{debug, info, warn};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Deserialize;
use std::f64::consts::PI;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A source of raw strain samples.
pub trait StrainSource: Send {
    /// Units: hertz
    fn sample_rate_hz(&self) -> f64;

    /// Acquire `num_samples` samples in the foreground, blocking until they are available.
    fn acquire(&mut self, num_samples: usize) -> Result<Vec<StrainSample>, DaqError>;

    /// Start sampling in the background, sending a batch of `batch_size` samples to `sender`
    /// whenever one is complete.
    fn start(&mut self, batch_size: usize, sender: Sender<StrainBatch>) -> Result<(), DaqError>;

    /// Stop background sampling. Stopping a source which isn't running does nothing.
    fn stop(&mut self) -> Result<(), DaqError>;

    fn is_running(&self) -> bool;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// DAQ parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct DaqParams {
    /// Units: hertz
    pub sample_rate_hz: f64,

    /// Target rate at which pose frames are fetched, one per strain batch.
    ///
    /// Units: hertz
    pub pose_rate_hz: f64,

    /// Length of the zeroing acquisition.
    ///
    /// Units: seconds
    pub zero_duration_s: f64,

    /// Behaviour of the simulated load cell.
    pub sim: SimStrainParams,
}

/// Parameters of the simulated load cell.
#[derive(Debug, Clone, Deserialize)]
pub struct SimStrainParams {
    /// Unloaded voltage of each channel.
    ///
    /// Units: volts
    pub offset_volts: [f64; NUM_STRAIN_CHANNELS],

    /// Amplitude of the uniform noise added to every sample.
    ///
    /// Units: volts
    pub noise_volts: f64,

    /// Amplitude of the slowly varying load applied while sampling in the background.
    ///
    /// Units: volts
    pub load_volts: f64,

    /// Units: seconds
    pub load_period_s: f64,
}

/// A simulated load cell sampled by a background thread.
pub struct SimStrainSource {
    params: SimStrainParams,
    rate_hz: f64,
    epoch: Instant,
    handle: Option<JoinHandle<()>>,
    signal_tx: Option<Sender<Signal>>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum DaqError {
    #[error("The source is already sampling in the background")]
    AlreadyRunning,

    #[error("Batch size must be at least 1")]
    InvalidBatchSize,

    #[error("Invalid sample rate: {0} Hz")]
    InvalidSampleRate(f64),

    #[error("The sampling thread panicked")]
    ThreadPanicked,
}

enum Signal {
    Stop,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl DaqParams {
    /// Number of samples per batch, so that batches arrive at the pose rate.
    pub fn batch_size(&self) -> usize {
        util::time::num_samples(1.0 / self.pose_rate_hz, self.sample_rate_hz)
    }

    /// Number of samples in the zeroing acquisition.
    pub fn zero_samples(&self) -> usize {
        util::time::num_samples(self.zero_duration_s, self.sample_rate_hz)
    }
}

impl Default for SimStrainParams {
    fn default() -> Self {
        Self {
            offset_volts: [0.12, -0.08, 0.05, 0.02, -0.03, 0.07],
            noise_volts: 0.002,
            load_volts: 0.5,
            load_period_s: 4.0,
        }
    }
}

impl SimStrainSource {
    pub fn new(rate_hz: f64, params: SimStrainParams) -> Result<Self, DaqError> {
        if !(rate_hz.is_finite() && rate_hz > 0.0) {
            return Err(DaqError::InvalidSampleRate(rate_hz));
        }

        Ok(Self {
            params,
            rate_hz,
            epoch: Instant::now(),
            handle: None,
            signal_tx: None,
        })
    }
}

impl StrainSource for SimStrainSource {
    fn sample_rate_hz(&self) -> f64 {
        self.rate_hz
    }

    fn acquire(&mut self, num_samples: usize) -> Result<Vec<StrainSample>, DaqError> {
        if self.is_running() {
            return Err(DaqError::AlreadyRunning);
        }

        // The specimen is unloaded while zeroing, only the offset and noise are seen
        let mut gen = SampleGen::new(&self.params, self.rate_hz, self.epoch, false);
        let samples = (0..num_samples).map(|_| gen.next_sample()).collect();

        thread::sleep(Duration::from_secs_f64(num_samples as f64 / self.rate_hz));

        Ok(samples)
    }

    fn start(&mut self, batch_size: usize, sender: Sender<StrainBatch>) -> Result<(), DaqError> {
        if self.is_running() {
            return Err(DaqError::AlreadyRunning);
        }
        if batch_size == 0 {
            return Err(DaqError::InvalidBatchSize);
        }

        let (signal_tx, signal_rx) = mpsc::channel();
        let gen = SampleGen::new(&self.params, self.rate_hz, self.epoch, true);
        let period = Duration::from_secs_f64(batch_size as f64 / self.rate_hz);

        self.handle = Some(thread::spawn(move || {
            sample_thread(gen, batch_size, period, sender, signal_rx)
        }));
        self.signal_tx = Some(signal_tx);

        info!(
            "Simulated strain source started at {} Hz, {} samples per batch",
            self.rate_hz, batch_size
        );

        Ok(())
    }

    fn stop(&mut self) -> Result<(), DaqError> {
        if let Some(tx) = self.signal_tx.take() {
            // The thread may already have exited if its receiver was dropped
            tx.send(Signal::Stop).ok();
        }

        if let Some(handle) = self.handle.take() {
            handle.join().map_err(|_| DaqError::ThreadPanicked)?;
            info!("Simulated strain source stopped");
        }

        Ok(())
    }

    fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for SimStrainSource {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Error stopping the strain source: {}", e);
        }
    }
}

// ------------------------------------------------------------------------------------------------
// SAMPLE GENERATION
// ------------------------------------------------------------------------------------------------

struct SampleGen {
    offset_volts: [f64; NUM_STRAIN_CHANNELS],
    noise_volts: f64,
    load_volts: f64,
    load_period_s: f64,
    period_s: f64,
    next_timestamp_s: f64,
    rng: StdRng,
}

impl SampleGen {
    fn new(params: &SimStrainParams, rate_hz: f64, epoch: Instant, loaded: bool) -> Self {
        Self {
            offset_volts: params.offset_volts,
            noise_volts: params.noise_volts.abs(),
            load_volts: if loaded { params.load_volts } else { 0.0 },
            load_period_s: params.load_period_s,
            period_s: 1.0 / rate_hz,
            next_timestamp_s: epoch.elapsed().as_secs_f64(),
            rng: StdRng::from_entropy(),
        }
    }

    fn next_sample(&mut self) -> StrainSample {
        let t = self.next_timestamp_s;
        self.next_timestamp_s += self.period_s;

        let mut volts = self.offset_volts;
        for (i, v) in volts.iter_mut().enumerate() {
            let phase = 2.0 * PI * (t / self.load_period_s + i as f64 / NUM_STRAIN_CHANNELS as f64);
            *v += self.load_volts * phase.sin();
            if self.noise_volts > 0.0 {
                *v += self.rng.gen_range(-self.noise_volts..self.noise_volts);
            }
        }

        StrainSample {
            timestamp_s: t,
            volts,
        }
    }
}

fn sample_thread(
    mut gen: SampleGen,
    batch_size: usize,
    period: Duration,
    sender: Sender<StrainBatch>,
    signal_rx: Receiver<Signal>,
) {
    let mut next_deadline = Instant::now() + period;

    loop {
        match signal_rx.try_recv() {
            Ok(Signal::Stop) | Err(TryRecvError::Disconnected) => break,
            Err(TryRecvError::Empty) => (),
        }

        // Wait until the batch would have been acquired
        let now = Instant::now();
        if next_deadline > now {
            thread::sleep(next_deadline - now);
        }
        next_deadline += period;

        let batch = StrainBatch::new((0..batch_size).map(|_| gen.next_sample()).collect());

        if sender.send(batch).is_err() {
            debug!("Strain batch receiver dropped, stopping sampling");
            break;
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet_params() -> SimStrainParams {
        SimStrainParams {
            noise_volts: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_acquire_unloaded() {
        let mut src = SimStrainSource::new(1000.0, quiet_params()).unwrap();
        let samples = src.acquire(20).unwrap();

        assert_eq!(samples.len(), 20);
        assert!(samples
            .iter()
            .all(|s| s.volts == SimStrainParams::default().offset_volts));
        assert!(samples.windows(2).all(|w| w[1].timestamp_s > w[0].timestamp_s));
    }

    #[test]
    fn test_background_batches() {
        let mut src = SimStrainSource::new(2000.0, SimStrainParams::default()).unwrap();
        let (tx, rx) = mpsc::channel();

        src.start(20, tx).unwrap();
        assert!(src.is_running());
        assert!(matches!(src.acquire(1), Err(DaqError::AlreadyRunning)));

        let batches: Vec<StrainBatch> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();

        src.stop().unwrap();
        assert!(!src.is_running());
        src.stop().unwrap();

        assert!(batches.iter().all(|b| b.len() == 20));
        assert!(batches[1].samples[0].timestamp_s > batches[0].end_timestamp_s().unwrap());
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            SimStrainSource::new(0.0, quiet_params()),
            Err(DaqError::InvalidSampleRate(_))
        ));

        let mut src = SimStrainSource::new(100.0, quiet_params()).unwrap();
        let (tx, _rx) = mpsc::channel();
        assert!(matches!(src.start(0, tx), Err(DaqError::InvalidBatchSize)));
    }

    #[test]
    fn test_batch_size() {
        let params = DaqParams {
            sample_rate_hz: 1000.0,
            pose_rate_hz: 30.0,
            zero_duration_s: 2.0,
            sim: quiet_params(),
        };

        assert_eq!(params.batch_size(), 33);
        assert_eq!(params.zero_samples(), 2000);
    }
}
