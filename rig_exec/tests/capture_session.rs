//! Capture session scenarios against the simulated capture server.

use std::sync::{mpsc, Arc, Mutex};

use comms_if::mocap::{
    sim::{SimHandle, SimServer},
    MocapClient, MocapParams, StateEvent, StatePoll,
};
use rig_lib::{
    capture_ctrl::{CaptureController, CaptureCtrlError, CaptureCtrlParams},
    RigEvent,
};

fn connect(state: StateEvent, max_polls: Option<usize>) -> (CaptureController, SimHandle) {
    let server = SimServer::with_state(state);
    let handle = server.handle();
    let client = MocapClient::connect_with(Box::new(server), &MocapParams::default()).unwrap();

    let ctrl = CaptureController::new(
        Arc::new(Mutex::new(client)),
        CaptureCtrlParams {
            max_polls,
            poll_interval_ms: 1,
        },
    );

    (ctrl, handle)
}

/// Commands which change the session state, in the order they were sent.
fn transitions(handle: &SimHandle) -> Vec<String> {
    handle
        .commands()
        .into_iter()
        .filter(|c| {
            ["New", "Start", "Stop", "Close"].contains(&c.as_str()) || c.starts_with("Save ")
        })
        .collect()
}

#[test]
fn start_from_connection_closed() {
    let (ctrl, handle) = connect(StateEvent::ConnectionClosed, Some(10));
    let (tx, rx) = mpsc::channel();
    let mut ctrl = ctrl.with_events(tx);

    ctrl.start().unwrap();

    assert_eq!(handle.state(), StateEvent::CaptureStarted);
    assert_eq!(transitions(&handle), vec!["New", "Start"]);
    assert_eq!(
        ctrl.last_state(),
        Some(StatePoll::Known(StateEvent::CaptureStarted))
    );

    // Bounded number of polls for a deterministic server
    assert!(handle.count("GetState") <= 10);

    let states: Vec<RigEvent> = rx.try_iter().collect();
    assert_eq!(
        states,
        vec![
            RigEvent::State(StateEvent::ConnectionClosed),
            RigEvent::State(StateEvent::Connected),
            RigEvent::State(StateEvent::CaptureStarted),
        ]
    );
}

#[test]
fn full_subtrial_cycle() {
    let (mut ctrl, handle) = connect(StateEvent::ConnectionClosed, Some(20));

    for n in 1..=2 {
        ctrl.reset().unwrap();
        ctrl.start().unwrap();
        ctrl.stop().unwrap();
        ctrl.save(&format!("S01_{}_F", n)).unwrap();
    }

    assert_eq!(
        transitions(&handle),
        vec![
            "New", "Start", "Stop", "Save S01_1_F", "Close", "New", "Start", "Stop",
            "Save S01_2_F"
        ]
    );
    assert_eq!(handle.state(), StateEvent::CaptureStopped);
}

#[test]
fn unresponsive_server_is_bounded() {
    let (mut ctrl, handle) = connect(StateEvent::Connected, Some(4));
    handle.set_silent_polls(u32::MAX);

    match ctrl.start() {
        Err(CaptureCtrlError::TransitionLimit { polls, last, .. }) => {
            assert_eq!(polls, 4);
            assert_eq!(last, StatePoll::Indeterminate);
        }
        r => panic!("Expected TransitionLimit, got {:?}", r),
    }

    // Nothing was assumed about the state, so no command was sent
    assert!(transitions(&handle).is_empty());
    assert_eq!(handle.state(), StateEvent::Connected);
}

#[test]
fn save_requires_stopped_capture() {
    let (mut ctrl, handle) = connect(StateEvent::Connected, Some(5));

    assert!(matches!(
        ctrl.save("too_early"),
        Err(CaptureCtrlError::SaveNotAllowed(StatePoll::Known(
            StateEvent::Connected
        )))
    ));
    assert_eq!(handle.count("Save"), 0);
}
