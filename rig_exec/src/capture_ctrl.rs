//! # Capture Controller
//!
//! Drives the capture server through its session states. Each operation takes control of the
//! server, repeatedly polls the session state and issues the command that moves it towards the
//! target state, then releases control.
//!
//! The client lock is held for the whole of an operation, so frame requests from the acquisition
//! pipeline are never interleaved with a session exchange.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::mocap::{MocapClient, MocapError, StateEvent, StatePoll};
use log::{debug, info, trace, warn};
use serde::Deserialize;
use std::sync::{mpsc::Sender, Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use crate::RigEvent;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Parameters for the capture controller.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CaptureCtrlParams {
    /// Maximum number of state polls in a single operation. If not set operations poll until
    /// the target state is reached.
    pub max_polls: Option<usize>,

    /// Delay between an action and the following state poll.
    ///
    /// Units: milliseconds
    #[serde(default)]
    pub poll_interval_ms: u64,
}

pub struct CaptureController {
    client: Arc<Mutex<MocapClient>>,
    params: CaptureCtrlParams,
    events: Option<Sender<RigEvent>>,
    last_state: Option<StatePoll>,
}

/// Count of state polls made by one operation.
struct PollBudget {
    operation: Operation,
    used: usize,
    max: Option<usize>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum CaptureCtrlError {
    #[error("Motion capture client error: {0}")]
    Mocap(#[from] MocapError),

    #[error("{operation} did not complete within {polls} state polls (last state: {last})")]
    TransitionLimit {
        operation: Operation,
        polls: usize,
        last: StatePoll,
    },

    #[error("Cannot save the capture while the server is in state {0}")]
    SaveNotAllowed(StatePoll),

    #[error("The motion capture client lock was poisoned")]
    LockPoisoned,
}

/// The session operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Reset,
    Start,
    Stop,
    Save,
}

/// What to do after observing a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    /// The target state has been reached.
    Done,

    /// Send a command, then poll again.
    Send(&'static str),

    /// Reset the session, then poll again.
    Reset,

    /// Poll again without acting.
    Poll,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Operation::Reset => "Reset",
            Operation::Start => "Start",
            Operation::Stop => "Stop",
            Operation::Save => "Save",
        };
        write!(f, "{}", name)
    }
}

impl PollBudget {
    fn new(operation: Operation, max: Option<usize>) -> Self {
        Self {
            operation,
            used: 0,
            max,
        }
    }

    /// Consume one poll, failing if the budget is exhausted.
    fn take(&mut self, last: Option<StatePoll>) -> Result<(), CaptureCtrlError> {
        match self.max {
            Some(max) if self.used >= max => Err(CaptureCtrlError::TransitionLimit {
                operation: self.operation,
                polls: self.used,
                last: last.unwrap_or(StatePoll::Indeterminate),
            }),
            _ => {
                self.used += 1;
                Ok(())
            }
        }
    }
}

impl CaptureController {
    pub fn new(client: Arc<Mutex<MocapClient>>, params: CaptureCtrlParams) -> Self {
        Self {
            client,
            params,
            events: None,
            last_state: None,
        }
    }

    /// Publish every newly observed session state on the given channel.
    pub fn with_events(mut self, events: Sender<RigEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// The state observed by the most recent poll.
    pub fn last_state(&self) -> Option<StatePoll> {
        self.last_state
    }

    /// Poll the server's state without taking control.
    pub fn state(&mut self) -> Result<StatePoll, CaptureCtrlError> {
        let client = self.client.clone();
        let mut client = lock(&client)?;
        self.poll(&mut client)
    }

    /// Bring the server to the `Connected` state.
    pub fn reset(&mut self) -> Result<(), CaptureCtrlError> {
        let client = self.client.clone();
        let mut client = lock(&client)?;
        let mut budget = PollBudget::new(Operation::Reset, self.params.max_polls);

        self.bracket(&mut client, |ctrl, client| ctrl.reset_inner(client, &mut budget))
    }

    /// Bring the server to the `CaptureStarted` state, resetting it first if required.
    pub fn start(&mut self) -> Result<(), CaptureCtrlError> {
        let client = self.client.clone();
        let mut client = lock(&client)?;
        let mut budget = PollBudget::new(Operation::Start, self.params.max_polls);

        self.bracket(&mut client, |ctrl, client| {
            ctrl.drive(client, &mut budget, |state| match state {
                StatePoll::Known(StateEvent::CaptureStarted) => Action::Done,
                StatePoll::Known(StateEvent::Connected) => Action::Send("Start"),
                StatePoll::Known(_) => Action::Reset,
                StatePoll::Indeterminate => Action::Poll,
            })
        })
    }

    /// Stop a running capture.
    pub fn stop(&mut self) -> Result<(), CaptureCtrlError> {
        let client = self.client.clone();
        let mut client = lock(&client)?;
        let mut budget = PollBudget::new(Operation::Stop, self.params.max_polls);

        self.bracket(&mut client, |ctrl, client| {
            ctrl.drive(client, &mut budget, |state| match state {
                StatePoll::Known(StateEvent::CaptureStarted) => Action::Send("Stop"),
                StatePoll::Known(_) => Action::Done,
                StatePoll::Indeterminate => Action::Poll,
            })
        })
    }

    /// Save the stopped capture on the server under the given name.
    pub fn save(&mut self, name: &str) -> Result<(), CaptureCtrlError> {
        let client = self.client.clone();
        let mut client = lock(&client)?;
        let mut budget = PollBudget::new(Operation::Save, self.params.max_polls);

        self.bracket(&mut client, |ctrl, client| {
            let state = loop {
                budget.take(ctrl.last_state)?;
                match ctrl.poll(client)? {
                    StatePoll::Indeterminate => ctrl.wait(),
                    s => break s,
                }
            };

            if state != StatePoll::Known(StateEvent::CaptureStopped) {
                return Err(CaptureCtrlError::SaveNotAllowed(state));
            }

            client.send_command(&format!("Save {}", name))?;
            let reply = client.read_reply()?;
            info!("Save reply: {}", reply);

            // The server follows a successful save with a CaptureSaved event
            match client.read_event()? {
                StatePoll::Known(StateEvent::CaptureSaved) => info!("Capture saved as {}", name),
                other => warn!("Expected CaptureSaved after saving {}, got {}", name, other),
            }

            Ok(())
        })
    }

    // ---- PRIVATE ----

    /// Run `op` between a take and a release of control. Control is released even if `op` fails.
    fn bracket<F>(&mut self, client: &mut MocapClient, op: F) -> Result<(), CaptureCtrlError>
    where
        F: FnOnce(&mut Self, &mut MocapClient) -> Result<(), CaptureCtrlError>,
    {
        client.take_control()?;

        let res = op(self, client);

        match client.release_control() {
            Ok(()) => res,
            Err(e) => {
                if let Err(ref op_err) = res {
                    warn!("Could not release control after error: {}", op_err);
                }
                res.and(Err(e.into()))
            }
        }
    }

    fn reset_inner(
        &mut self,
        client: &mut MocapClient,
        budget: &mut PollBudget,
    ) -> Result<(), CaptureCtrlError> {
        let mut new_sent = false;

        self.drive(client, budget, |state| match state {
            StatePoll::Known(StateEvent::Connected) => Action::Done,
            StatePoll::Known(StateEvent::ConnectionClosed) if !new_sent => {
                new_sent = true;
                Action::Send("New")
            }
            StatePoll::Known(StateEvent::CaptureStarted) => Action::Send("Stop"),
            StatePoll::Known(StateEvent::CaptureStopped) => Action::Send("Close"),
            _ => Action::Poll,
        })
    }

    /// Poll and act until `transition` reports that the target state has been reached.
    fn drive<F>(
        &mut self,
        client: &mut MocapClient,
        budget: &mut PollBudget,
        mut transition: F,
    ) -> Result<(), CaptureCtrlError>
    where
        F: FnMut(StatePoll) -> Action,
    {
        loop {
            budget.take(self.last_state)?;
            let state = self.poll(client)?;

            match transition(state) {
                Action::Done => return Ok(()),
                Action::Send(cmd) => self.command(client, cmd)?,
                Action::Reset => {
                    debug!("{}: resetting from state {}", budget.operation, state);
                    self.reset_inner(client, budget)?;
                }
                Action::Poll => (),
            }

            self.wait();
        }
    }

    fn poll(&mut self, client: &mut MocapClient) -> Result<StatePoll, CaptureCtrlError> {
        let state = client.read_state_event()?;
        trace!("Session state: {}", state);

        if let StatePoll::Known(event) = state {
            if self.last_state != Some(state) {
                info!("Capture server state: {}", event);
                if let Some(ref tx) = self.events {
                    tx.send(RigEvent::State(event)).ok();
                }
            }
        }
        self.last_state = Some(state);

        Ok(state)
    }

    /// Send a session command and drain its reply.
    fn command(&mut self, client: &mut MocapClient, cmd: &str) -> Result<(), CaptureCtrlError> {
        client.send_command(cmd)?;

        match client.read_reply() {
            Ok(reply) => debug!("{} reply: {}", cmd, reply),
            Err(MocapError::Io(e)) => warn!("No reply to {}: {}", cmd, e),
            Err(e) => return Err(e.into()),
        }

        Ok(())
    }

    fn wait(&self) {
        if self.params.poll_interval_ms > 0 {
            thread::sleep(Duration::from_millis(self.params.poll_interval_ms));
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn lock(client: &Mutex<MocapClient>) -> Result<MutexGuard<'_, MocapClient>, CaptureCtrlError> {
    client.lock().map_err(|_| CaptureCtrlError::LockPoisoned)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use comms_if::mocap::{
        sim::{SimHandle, SimServer},
        MocapParams,
    };
    use std::sync::mpsc;

    fn controller(state: StateEvent, max_polls: Option<usize>) -> (CaptureController, SimHandle) {
        let server = SimServer::with_state(state);
        let handle = server.handle();
        let client = MocapClient::connect_with(Box::new(server), &MocapParams::default()).unwrap();

        let ctrl = CaptureController::new(
            Arc::new(Mutex::new(client)),
            CaptureCtrlParams {
                max_polls,
                poll_interval_ms: 0,
            },
        );

        (ctrl, handle)
    }

    /// Session commands sent after connecting, ignoring polls and control requests.
    fn session_commands(handle: &SimHandle) -> Vec<String> {
        handle
            .commands()
            .into_iter()
            .skip(4)
            .filter(|c| !["GetState", "TakeControl", "ReleaseControl"].contains(&c.as_str()))
            .collect()
    }

    #[test]
    fn test_reset_from_started() {
        let (mut ctrl, handle) = controller(StateEvent::CaptureStarted, Some(20));

        ctrl.reset().unwrap();

        assert_eq!(handle.state(), StateEvent::Connected);
        assert_eq!(session_commands(&handle), vec!["Stop", "Close", "New"]);
    }

    #[test]
    fn test_reset_sends_new_once() {
        let (ctrl, handle) = controller(StateEvent::ConnectionClosed, Some(6));
        let (tx, rx) = mpsc::channel();
        let mut ctrl = ctrl.with_events(tx);

        // The server acknowledges commands but never changes state
        handle.set_frozen(true);

        match ctrl.reset() {
            Err(CaptureCtrlError::TransitionLimit {
                operation, polls, ..
            }) => {
                assert_eq!(operation, Operation::Reset);
                assert_eq!(polls, 6);
            }
            r => panic!("Expected TransitionLimit, got {:?}", r),
        }

        assert_eq!(handle.count("New"), 1);
        assert_eq!(
            rx.try_recv().unwrap(),
            RigEvent::State(StateEvent::ConnectionClosed)
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_start_from_stopped() {
        let (mut ctrl, handle) = controller(StateEvent::CaptureStopped, Some(20));

        ctrl.start().unwrap();

        assert_eq!(handle.state(), StateEvent::CaptureStarted);
        assert_eq!(session_commands(&handle), vec!["Close", "New", "Start"]);
    }

    #[test]
    fn test_stop_and_save() {
        let (mut ctrl, handle) = controller(StateEvent::CaptureStarted, Some(10));

        match ctrl.save("early") {
            Err(CaptureCtrlError::SaveNotAllowed(s)) => {
                assert_eq!(s, StatePoll::Known(StateEvent::CaptureStarted))
            }
            r => panic!("Expected SaveNotAllowed, got {:?}", r),
        }

        ctrl.stop().unwrap();
        assert_eq!(handle.state(), StateEvent::CaptureStopped);

        // Stopping a stopped capture does nothing
        ctrl.stop().unwrap();

        ctrl.save("S01_1_F").unwrap();
        assert_eq!(session_commands(&handle), vec!["Stop", "Save S01_1_F"]);
    }

    #[test]
    fn test_save_leaves_nothing_unread() {
        log::set_max_level(log::LevelFilter::Off);

        let (mut ctrl, handle) = controller(StateEvent::CaptureStopped, Some(10));

        ctrl.save("S01_2_F").unwrap();
        assert_eq!(handle.pending_bytes(), 0);
        assert_eq!(handle.commands().last().map(String::as_str), Some("ReleaseControl"));

        // The next exchange starts on a clean stream
        ctrl.reset().unwrap();
        assert_eq!(handle.state(), StateEvent::Connected);
        assert_eq!(handle.pending_bytes(), 0);
    }

    #[test]
    fn test_control_bracket() {
        let (mut ctrl, handle) = controller(StateEvent::Connected, None);

        ctrl.reset().unwrap();

        let commands: Vec<String> = handle.commands().into_iter().skip(4).collect();
        assert_eq!(commands, vec!["TakeControl", "GetState", "ReleaseControl"]);
    }

    #[test]
    fn test_indeterminate_is_not_progress() {
        let (mut ctrl, handle) = controller(StateEvent::CaptureStarted, Some(3));
        handle.set_silent_polls(100);

        assert!(matches!(
            ctrl.stop(),
            Err(CaptureCtrlError::TransitionLimit { .. })
        ));
        assert_eq!(handle.count("Stop"), 0);
        assert_eq!(ctrl.last_state(), Some(StatePoll::Indeterminate));
    }
}
