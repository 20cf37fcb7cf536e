//! # Acquisition pipeline
//!
//! Runs the strain source's sampling thread and a synchronizer worker thread, joined by a
//! channel of strain batches. The worker publishes alert levels and coverage changes as
//! [`RigEvent`]s.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::eqpt::daq::StrainBatch;
use log::{debug, info, warn};
use std::fmt;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc::{self, Receiver, Sender},
    Arc,
};
use std::thread::{self, JoinHandle};

use super::{AcqSync, AcqSyncError, RigEvent};
use crate::daq::StrainSource;
use util::module::State;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A running acquisition.
pub struct AcqPipeline {
    recording: Arc<AtomicBool>,
    source: Box<dyn StrainSource>,
    worker: Option<JoinHandle<AcqSync>>,
}

/// Error returned when the pipeline could not be started.
///
/// The synchronizer, including its active trial, and the strain source are handed back so the
/// caller can retry.
#[derive(thiserror::Error)]
#[error("Could not start the acquisition pipeline: {error}")]
pub struct StartError {
    #[source]
    pub error: AcqSyncError,

    /// `None` only if the worker thread panicked.
    pub sync: Option<AcqSync>,

    pub strain_source: Box<dyn StrainSource>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl AcqPipeline {
    /// Start sampling and synchronizing. Recording is initially disabled.
    pub fn start(
        sync: AcqSync,
        mut source: Box<dyn StrainSource>,
        batch_size: usize,
        events: Option<Sender<RigEvent>>,
    ) -> Result<Self, StartError> {
        sync.set_recording(false);
        let recording = sync.recording_flag();

        let (batch_tx, batch_rx) = mpsc::channel();

        let worker = thread::spawn(move || worker_thread(sync, batch_rx, events));

        if let Err(e) = source.start(batch_size, batch_tx) {
            // The worker exits as soon as the sender is dropped
            let sync = worker.join().ok();
            if sync.is_none() {
                warn!("Synchronizer worker panicked while the pipeline was starting");
            }

            return Err(StartError {
                error: e.into(),
                sync,
                strain_source: source,
            });
        }

        info!("Acquisition pipeline started");

        Ok(Self {
            recording,
            source,
            worker: Some(worker),
        })
    }

    /// Enable or disable appending to the active trial.
    pub fn set_recording(&self, recording: bool) {
        self.recording.store(recording, Ordering::SeqCst);
        info!(
            "Recording {}",
            if recording { "enabled" } else { "disabled" }
        );
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    /// Stop recording and sampling, wait for the worker to process the remaining batches, and
    /// hand back the synchronizer and the source.
    pub fn stop(mut self) -> Result<(AcqSync, Box<dyn StrainSource>), AcqSyncError> {
        self.recording.store(false, Ordering::SeqCst);

        let stopped = self.source.stop();

        let sync = match self.worker.take() {
            Some(w) => w.join().map_err(|_| AcqSyncError::WorkerPanicked)?,
            None => return Err(AcqSyncError::WorkerPanicked),
        };
        stopped?;

        info!("Acquisition pipeline stopped");

        Ok((sync, self.source))
    }
}

impl fmt::Debug for StartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartError")
            .field("error", &self.error)
            .field("sync_recovered", &self.sync.is_some())
            .finish()
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn worker_thread(
    mut sync: AcqSync,
    batch_rx: Receiver<StrainBatch>,
    events: Option<Sender<RigEvent>>,
) -> AcqSync {
    let mut num_batches = 0usize;

    // Runs until the sampling thread drops its sender
    for batch in batch_rx {
        num_batches += 1;

        match sync.proc(&batch) {
            Ok((output, _)) => {
                if let Some(ref tx) = events {
                    // The presentation layer may have gone away, which doesn't stop acquisition
                    tx.send(RigEvent::Alert(output.alert_level)).ok();
                    for update in output.coverage {
                        tx.send(RigEvent::Coverage(update)).ok();
                    }
                }
            }
            Err(e) => warn!("Synchronizer error on batch {}: {}", num_batches, e),
        }
    }

    debug!("Synchronizer worker processed {} batches", num_batches);

    sync
}
