//! Acquisition pipeline scenarios with the simulated capture server and load cell.

use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use comms_if::mocap::{sim::SimServer, MocapClient, MocapParams};
use nalgebra::Matrix6;
use rig_lib::{
    acq_sync::{AcqPipeline, AcqSync, AcqSyncError, AcqSyncParams},
    coverage::{CoverageParams, OrientationCoverageTracker},
    daq::{DaqError, SimStrainParams, SimStrainSource, StrainSource},
    seq_plan::threshold_scale_for,
    trial::{Trial, TrialMetadata},
    RigEvent,
};

const BATCH_SIZE: usize = 20;

fn setup() -> (AcqSync, Box<dyn StrainSource>) {
    let client =
        MocapClient::connect_with(Box::new(SimServer::new()), &MocapParams::default()).unwrap();

    let mut sync = AcqSync::new(
        AcqSyncParams {
            joint_center_m: [0.0, 0.0, 0.1],
            ..Default::default()
        },
        Arc::new(Mutex::new(client)),
        Matrix6::identity(),
        Some(OrientationCoverageTracker::new(CoverageParams::default()).unwrap()),
    );

    let mut source: Box<dyn StrainSource> =
        Box::new(SimStrainSource::new(1000.0, SimStrainParams::default()).unwrap());

    sync.zero(source.as_mut(), 0.02).unwrap();

    (sync, source)
}

fn trial(subtrial: usize) -> Trial {
    Trial::new(
        TrialMetadata {
            subject: String::from("S01"),
            limb: String::from("left"),
            joint: String::from("knee"),
            preservation: String::from("fresh"),
        },
        subtrial,
        "FAL",
        threshold_scale_for(subtrial).unwrap(),
        None,
    )
}

#[test]
fn records_only_while_enabled() {
    let (mut sync, source) = setup();
    sync.begin_trial(trial(4)).unwrap();

    let (tx, rx) = mpsc::channel();
    let pipeline = AcqPipeline::start(sync, source, BATCH_SIZE, Some(tx)).unwrap();

    // Not recording yet
    thread::sleep(Duration::from_millis(100));
    assert!(!pipeline.is_recording());

    pipeline.set_recording(true);
    thread::sleep(Duration::from_millis(300));

    let (mut sync, source) = pipeline.stop().unwrap();
    assert!(!source.is_running());
    assert!(!sync.is_recording());

    let trial = sync.take_trial().unwrap().unwrap();
    assert!(!trial.samples.is_empty());
    assert_eq!(trial.samples.len(), trial.strain_log.len());
    assert!(trial.strain_log.iter().all(|b| b.len() == BATCH_SIZE));
    assert_eq!(trial.threshold_scale, 2.0);
    assert!(trial.calibration.is_some());

    // Fewer recorded batches than were processed
    let events: Vec<RigEvent> = rx.try_iter().collect();
    let num_alerts = events
        .iter()
        .filter(|e| matches!(e, RigEvent::Alert(_)))
        .count();
    assert!(num_alerts > trial.strain_log.len());
    assert!(events.iter().any(|e| matches!(e, RigEvent::Coverage(_))));

    // Samples are in arrival order
    assert!(trial
        .samples
        .windows(2)
        .all(|w| w[1].timestamp_s > w[0].timestamp_s
            && w[1].frame.frame_number > w[0].frame.frame_number));
}

#[test]
fn pipeline_can_be_restarted() {
    let (mut sync, mut source) = setup();

    for subtrial in 1..=2 {
        sync.begin_trial(trial(subtrial)).unwrap();

        let pipeline = AcqPipeline::start(sync, source, BATCH_SIZE, None).unwrap();
        pipeline.set_recording(true);
        thread::sleep(Duration::from_millis(100));

        let (s, src) = pipeline.stop().unwrap();
        sync = s;
        source = src;

        let trial = sync.take_trial().unwrap().unwrap();
        assert_eq!(trial.subtrial, subtrial);
        assert!(!trial.strain_log.is_empty());
    }
}

#[test]
fn failed_start_hands_back_the_trial() {
    let (mut sync, source) = setup();
    sync.begin_trial(trial(2)).unwrap();

    // A zero batch size is rejected by the strain source
    let err = match AcqPipeline::start(sync, source, 0, None) {
        Err(e) => e,
        Ok(_) => panic!("Expected the pipeline to fail to start"),
    };
    assert!(matches!(
        err.error,
        AcqSyncError::Daq(DaqError::InvalidBatchSize)
    ));
    assert!(!err.strain_source.is_running());

    let sync = err.sync.unwrap();
    assert_eq!(sync.trial().unwrap().subtrial, 2);

    // Retrying with the recovered parts works
    let pipeline = AcqPipeline::start(sync, err.strain_source, BATCH_SIZE, None).unwrap();
    pipeline.set_recording(true);
    thread::sleep(Duration::from_millis(100));

    let (mut sync, _) = pipeline.stop().unwrap();
    let trial = sync.take_trial().unwrap().unwrap();
    assert_eq!(trial.subtrial, 2);
    assert!(!trial.strain_log.is_empty());
}
