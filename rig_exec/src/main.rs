//! Main rig executable entry point.
//!
//! # Architecture
//!
//! The general execution methodology consists of:
//!
//!     - Initialise the session, logging and parameters
//!     - Connect to the capture server
//!     - Generate the sequence plan and zero the load cell
//!     - For each subtrial in the plan:
//!         - Reset and start a capture on the server
//!         - Run the acquisition pipeline with recording enabled for the trial duration
//!         - Stop the pipeline and the capture, save the capture on the server
//!         - Export the trial to the session directory
//!
//! Alert levels, coverage changes and server states are published as `RigEvent`s and logged by
//! a dedicated thread.

// ---------------------------------------------------------------------------
// USE MODULES FROM LIBRARY
// ---------------------------------------------------------------------------

use comms_if::mocap::{sim::SimServer, MocapClient};
use rig_lib::{
    acq_sync::{AcqPipeline, AcqSync},
    calib::CalibrationParams,
    capture_ctrl::CaptureController,
    coverage::{CoverageUpdate, OrientationCoverageTracker},
    daq::{SimStrainSource, StrainSource},
    params::RigExecParams,
    seq_plan::{threshold_scale_for, SequencePlanner},
    trial::{Trial, TrialMetadata},
    RigEvent,
};

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{
    eyre::{eyre, WrapErr},
    Report,
};
use log::{debug, info, trace, warn};
use std::sync::{
    mpsc::{self, Receiver},
    Arc, Mutex,
};
use std::thread;
use std::time::Duration;
use structopt::StructOpt;

// Internal
use util::{
    host,
    logger::{logger_init, parse_level, LevelFilter},
    module::State,
    session::Session,
};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Archive of computed samples, relative to the session archive root.
const COMPUTED_ARCHIVE_PATH: &str = "acq_sync/computed.csv";

// ---------------------------------------------------------------------------
// STRUCTS
// ---------------------------------------------------------------------------

/// Command line arguments
#[derive(Debug, StructOpt)]
#[structopt(name = "rig_exec", about = "Joint range of motion rig acquisition")]
struct Args {
    /// Run against the simulated capture server
    #[structopt(long)]
    sim: bool,

    /// Subject identifier, used in capture names
    #[structopt(long, default_value = "subject")]
    subject: String,

    /// Limb under test (e.g. left, right)
    #[structopt(long, default_value = "")]
    limb: String,

    /// Joint under test (e.g. knee)
    #[structopt(long, default_value = "")]
    joint: String,

    /// Preservation state of the specimen
    #[structopt(long, default_value = "")]
    preservation: String,

    /// Minimum log level, at least `info`
    #[structopt(long, default_value = "debug", parse(try_from_str = parse_level))]
    log_level: LevelFilter,
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {
    color_eyre::install()?;

    let args = Args::from_args();

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new("rig_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(args.log_level, &session).wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("Joint Range of Motion Rig Executable\n");
    info!(
        "Running on: {:#?}",
        host::get_uname().wrap_err("Failed to get host information")?
    );
    info!("Session directory: {:?}\n", session.session_root);
    debug!("CLI arguments: {:?}", args);

    // ---- LOAD PARAMETERS ----

    let params: RigExecParams =
        util::params::load("rig_exec.toml").wrap_err("Could not load exec params")?;
    let calib_params: CalibrationParams =
        util::params::load("calib.toml").wrap_err("Could not load calibration params")?;

    info!("Exec parameters loaded");

    // ---- EVENTS ----

    let (event_tx, event_rx) = mpsc::channel();
    let event_handle = thread::spawn(move || event_thread(event_rx));

    // ---- CONNECT ----

    info!("Connecting to the capture server");

    let client = if args.sim {
        info!("Using the simulated capture server");
        MocapClient::connect_with(Box::new(SimServer::new()), &params.mocap)
    } else {
        MocapClient::connect(&params.mocap)
    }
    .wrap_err("Failed to connect to the capture server")?;
    let client = Arc::new(Mutex::new(client));

    let mut capture_ctrl = CaptureController::new(client.clone(), params.capture_ctrl.clone())
        .with_events(event_tx.clone());

    // ---- INITIALISE MODULES ----

    info!("Initialising modules...");

    // There is no hardware DAQ driver, the load cell is always simulated
    if !args.sim {
        warn!("Using the simulated load cell with a live capture server");
    }
    let mut source: Box<dyn StrainSource> = Box::new(
        SimStrainSource::new(params.daq.sample_rate_hz, params.daq.sim.clone())
            .wrap_err("Failed to initialise the strain source")?,
    );

    let coverage = OrientationCoverageTracker::new(params.coverage.clone())
        .wrap_err("Failed to initialise the coverage tracker")?;
    let mut sync = AcqSync::new(
        params.acq_sync.clone(),
        client.clone(),
        calib_params.matrix(),
        Some(coverage),
    );
    sync.init(COMPUTED_ARCHIVE_PATH, &session)
        .wrap_err("Failed to initialise AcqSync")?;
    info!("AcqSync init complete");

    info!("Module initialisation complete\n");

    // ---- PLAN ----

    let plan = SequencePlanner::new().generate().clone();
    session.save("plan.json", plan.clone());

    // ---- ZERO ----

    info!("Zeroing the load cell, the specimen must be unloaded");
    sync.zero(source.as_mut(), params.daq.zero_duration_s)
        .wrap_err("Failed to zero the load cell")?;

    // ---- SUBTRIALS ----

    let metadata = TrialMetadata {
        subject: args.subject.clone(),
        limb: args.limb.clone(),
        joint: args.joint.clone(),
        preservation: args.preservation.clone(),
    };
    let batch_size = params.daq.batch_size();
    let trial_duration = Duration::from_secs_f64(params.trial.duration_s.max(0.0));

    for (subtrial, label) in plan.iter() {
        let scale = threshold_scale_for(subtrial)
            .ok_or_else(|| eyre!("No threshold scale for subtrial {}", subtrial))?;

        info!("---- SUBTRIAL {} ({}) ----", subtrial, label);

        sync.begin_trial(Trial::new(metadata.clone(), subtrial, label, scale, None))
            .wrap_err("Failed to begin the trial")?;

        capture_ctrl
            .reset()
            .wrap_err("Failed to reset the capture server")?;
        capture_ctrl
            .start()
            .wrap_err("Failed to start the capture")?;

        let pipeline = AcqPipeline::start(sync, source, batch_size, Some(event_tx.clone()))
            .map_err(|e| e.error)
            .wrap_err("Failed to start the acquisition pipeline")?;

        info!("Subtrial {} started", subtrial);
        pipeline.set_recording(true);
        thread::sleep(trial_duration);

        let (s, src) = pipeline
            .stop()
            .wrap_err("Failed to stop the acquisition pipeline")?;
        sync = s;
        source = src;

        capture_ctrl
            .stop()
            .wrap_err("Failed to stop the capture")?;

        let trial = sync
            .take_trial()
            .wrap_err("Failed to take the recorded trial")?
            .ok_or_else(|| eyre!("No trial was recorded for subtrial {}", subtrial))?;

        capture_ctrl
            .save(&trial.capture_name())
            .wrap_err("Failed to save the capture")?;

        info!(
            "Subtrial {} stopped: {} samples, {} strain batches",
            subtrial,
            trial.samples.len(),
            trial.strain_log.len()
        );

        session.save(trial.export_path(), trial);
    }

    // ---- SHUTDOWN ----

    info!("All subtrials complete");

    drop(capture_ctrl);
    drop(sync);
    match client.lock() {
        Ok(mut c) => c.disconnect(),
        Err(_) => warn!("Capture client lock poisoned, not disconnecting cleanly"),
    }

    drop(event_tx);
    if event_handle.join().is_err() {
        warn!("Event thread panicked");
    }

    session.exit();

    Ok(())
}

/// Log the events published by the controller and the acquisition pipeline.
fn event_thread(rx: Receiver<RigEvent>) {
    let mut last_level = 0;

    for event in rx {
        match event {
            RigEvent::State(state) => info!("Status: {}", state),
            RigEvent::Alert(level) => {
                if level != last_level {
                    debug!("Alert level changed to {}", level);
                    last_level = level;
                }
            }
            RigEvent::Coverage(CoverageUpdate::Heat {
                accumulator,
                vertex,
                heat,
            }) => trace!("Coverage {}: vertex {} heat {}", accumulator, vertex, heat),
            RigEvent::Coverage(CoverageUpdate::Trace { accumulator, point }) => trace!(
                "Coverage {}: trace point ({:.3}, {:.3}, {:.3})",
                accumulator,
                point[0],
                point[1],
                point[2]
            ),
        }
    }
}
