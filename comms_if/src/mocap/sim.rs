//! # Simulated capture server
//!
//! An in-process [`Transport`] which answers commands the same way the capture server does. The
//! server keeps a session state machine, serves frames of a slowly rotating rigid body, and records
//! every command it receives.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::trace;
use nalgebra::{Rotation3, Vector3};
use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{
    codec, ComponentFlags, Frame, MarkerSample, PacketType, RigidBodySample, StateEvent,
    HEADER_SIZE,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Rotation of the simulated body about Y per served frame.
///
/// Units: radians
const ROTATION_STEP_RAD: f32 = 0.05;

/// Timestamp increment per served frame.
///
/// Units: microseconds
const FRAME_PERIOD_US: u64 = 10_000;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Simulated server end of a connection.
pub struct SimServer {
    shared: Arc<Mutex<SimState>>,

    /// Bytes written by the client which don't yet form a complete packet.
    inbox: Vec<u8>,
}

/// Handle used to inspect and steer a [`SimServer`] after it has been given to a client.
#[derive(Clone)]
pub struct SimHandle {
    shared: Arc<Mutex<SimState>>,
}

struct SimState {
    state: StateEvent,
    outbox: VecDeque<u8>,
    commands: Vec<String>,
    frame_number: u32,

    /// Number of upcoming `GetState` commands to leave unanswered.
    silent_polls: u32,

    /// Packet type written in the header of served frames.
    data_packet_type: u32,

    /// If set, session commands are refused and the state never changes.
    frozen: bool,

    open: bool,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SimServer {
    /// Create a server in the `ConnectionClosed` state.
    pub fn new() -> Self {
        Self::with_state(StateEvent::ConnectionClosed)
    }

    /// Create a server in the given session state.
    ///
    /// The handshake message is queued immediately, as if the client had just connected.
    pub fn with_state(state: StateEvent) -> Self {
        let mut sim_state = SimState {
            state,
            outbox: VecDeque::new(),
            commands: Vec::new(),
            frame_number: 0,
            silent_polls: 0,
            data_packet_type: PacketType::Data as u32,
            frozen: false,
            open: true,
        };
        sim_state.reply("QTM RT Interface connected");

        Self {
            shared: Arc::new(Mutex::new(sim_state)),
            inbox: Vec::new(),
        }
    }

    pub fn handle(&self) -> SimHandle {
        SimHandle {
            shared: self.shared.clone(),
        }
    }

    fn lock(&self) -> io::Result<MutexGuard<'_, SimState>> {
        self.shared
            .lock()
            .map_err(|_| io::Error::new(ErrorKind::Other, "Simulated server state poisoned"))
    }
}

impl Default for SimServer {
    fn default() -> Self {
        Self::new()
    }
}

impl Read for SimServer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.lock()?;

        if !state.open {
            return Ok(0);
        }
        if state.outbox.is_empty() {
            return Err(io::Error::new(ErrorKind::WouldBlock, "No data from server"));
        }

        let n = buf.len().min(state.outbox.len());
        for (dst, src) in buf.iter_mut().zip(state.outbox.drain(..n)) {
            *dst = src;
        }

        Ok(n)
    }
}

impl Write for SimServer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.lock()?.open {
            return Err(io::Error::new(ErrorKind::BrokenPipe, "Connection closed"));
        }

        self.inbox.extend_from_slice(buf);

        // Handle every complete packet in the inbox
        loop {
            if self.inbox.len() < HEADER_SIZE {
                break;
            }

            let (header, text) = match codec::decode_command(&self.inbox) {
                Ok(p) => p,
                Err(codec::CodecError::Truncated) => break,
                Err(e) => {
                    self.inbox.clear();
                    return Err(io::Error::new(ErrorKind::InvalidData, e.to_string()));
                }
            };
            self.inbox.drain(..header.size as usize);

            let mut state = self.lock()?;
            if header.is(PacketType::Xml) {
                state.handle_xml(text);
            } else {
                state.handle_command(text);
            }
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl super::Transport for SimServer {
    fn discard_pending(&mut self) -> io::Result<()> {
        self.lock()?.outbox.clear();
        Ok(())
    }

    fn set_read_timeout(&mut self, _timeout: Option<Duration>) -> io::Result<()> {
        Ok(())
    }

    fn shutdown(&mut self) -> io::Result<()> {
        self.lock()?.open = false;
        Ok(())
    }
}

impl SimHandle {
    /// Every command and XML document received so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    /// Number of commands received so far whose first word is `name`.
    pub fn count(&self, name: &str) -> usize {
        self.lock()
            .commands
            .iter()
            .filter(|c| c.split_whitespace().next() == Some(name))
            .count()
    }

    pub fn state(&self) -> StateEvent {
        self.lock().state
    }

    pub fn set_state(&self, state: StateEvent) {
        self.lock().state = state;
    }

    /// Leave the next `n` state polls unanswered.
    pub fn set_silent_polls(&self, n: u32) {
        self.lock().silent_polls = n;
    }

    /// Refuse all session commands, leaving the state unchanged.
    pub fn set_frozen(&self, frozen: bool) {
        self.lock().frozen = frozen;
    }

    /// Packet type used in the header of served frames.
    pub fn set_data_packet_type(&self, packet_type: u32) {
        self.lock().data_packet_type = packet_type;
    }

    /// Queue an unsolicited textual reply.
    pub fn push_reply(&self, text: &str) {
        self.lock().reply(text);
    }

    /// Drop everything queued for the client.
    pub fn clear_outbox(&self) {
        self.lock().outbox.clear();
    }

    /// Number of bytes queued for the client.
    pub fn pending_bytes(&self) -> usize {
        self.lock().outbox.len()
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        // Inspection should still work after a panic on the client side
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SimState {
    fn handle_command(&mut self, text: String) {
        trace!("SimServer received \"{}\"", text);

        let mut words = text.split_whitespace();
        let name = words.next().unwrap_or("").to_lowercase();

        match name.as_str() {
            "version" => {
                let version = words.next().unwrap_or("");
                self.reply(&format!("Version set to {}", version));
            }
            "takecontrol" => self.reply("You are now master"),
            "releasecontrol" => self.reply("You are now a regular client"),
            "getstate" => {
                if self.silent_polls > 0 {
                    self.silent_polls -= 1;
                } else {
                    self.event(self.state);
                }
            }
            "new" => self.transition(
                StateEvent::ConnectionClosed,
                StateEvent::Connected,
                "Creating new connection",
            ),
            "start" => self.transition(
                StateEvent::Connected,
                StateEvent::CaptureStarted,
                "Starting measurement",
            ),
            "stop" => self.transition(
                StateEvent::CaptureStarted,
                StateEvent::CaptureStopped,
                "Stopping measurement",
            ),
            "close" => self.transition(
                StateEvent::CaptureStopped,
                StateEvent::ConnectionClosed,
                "Closing connection",
            ),
            "save" => {
                if self.state == StateEvent::CaptureStopped {
                    self.reply("Measurement saved");
                    self.event(StateEvent::CaptureSaved);
                } else {
                    self.error("No measurement to save");
                }
            }
            "getcurrentframe" => self.serve_frame(),
            _ => self.error("Parse error"),
        }

        self.commands.push(text);
    }

    fn handle_xml(&mut self, xml: String) {
        trace!("SimServer received XML ({} bytes)", xml.len());
        self.reply("Setting parameters succeeded");
        self.commands.push(xml);
    }

    fn transition(&mut self, from: StateEvent, to: StateEvent, reply: &str) {
        if self.state == from && !self.frozen {
            self.state = to;
            self.reply(reply);
        } else {
            self.error(&format!("Not allowed in state {}", self.state));
        }
    }

    fn serve_frame(&mut self) {
        let n = self.frame_number;
        self.frame_number = self.frame_number.wrapping_add(1);

        let rotation = Rotation3::from_axis_angle(&Vector3::y_axis(), ROTATION_STEP_RAD * n as f32);
        let position_mm = Vector3::new(250.0, 100.0, 900.0);

        let frame = Frame {
            timestamp: n as u64 * FRAME_PERIOD_US,
            frame_number: n,
            markers: [
                Vector3::new(0.0, 0.0, 0.0),
                Vector3::new(50.0, 0.0, 0.0),
                Vector3::new(0.0, 0.0, 50.0),
            ]
            .iter()
            .map(|m| MarkerSample {
                position_mm: position_mm + rotation * *m,
            })
            .collect(),
            marker_flags: Some(ComponentFlags::default()),
            bodies: vec![RigidBodySample {
                position_mm,
                rotation: rotation.into_inner(),
            }],
            body_flags: Some(ComponentFlags::default()),
        };

        let mut bytes = codec::encode_data_packet(&frame);
        if self.data_packet_type != PacketType::Data as u32 {
            bytes[4..8].copy_from_slice(&self.data_packet_type.to_ne_bytes());
        }
        self.outbox.extend(bytes);
    }

    fn reply(&mut self, text: &str) {
        // The server terminates its strings with a NUL
        let bytes = codec::encode_reply(PacketType::Command, &format!("{}\0", text));
        self.outbox.extend(bytes);
    }

    fn error(&mut self, text: &str) {
        let bytes = codec::encode_reply(PacketType::Error, &format!("{}\0", text));
        self.outbox.extend(bytes);
    }

    fn event(&mut self, event: StateEvent) {
        self.outbox.extend(codec::encode_event(event));
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocap::Transport;
    use byteorder::NativeEndian;

    fn read_packet(server: &mut SimServer) -> (u32, Vec<u8>) {
        let mut header = [0u8; 8];
        server.read_exact(&mut header).unwrap();
        let header = codec::decode_header::<NativeEndian>(&header).unwrap();
        let mut body = vec![0u8; header.body_len()];
        server.read_exact(&mut body).unwrap();
        (header.packet_type, body)
    }

    #[test]
    fn test_session_state_machine() {
        let mut server = SimServer::new();
        let handle = server.handle();
        server.discard_pending().unwrap();

        server.write_all(&codec::encode_command("Start")).unwrap();
        let (ptype, _) = read_packet(&mut server);
        assert_eq!(ptype, PacketType::Error as u32);
        assert_eq!(handle.state(), StateEvent::ConnectionClosed);

        for (cmd, expected) in &[
            ("New", StateEvent::Connected),
            ("Start", StateEvent::CaptureStarted),
            ("Stop", StateEvent::CaptureStopped),
        ] {
            server.write_all(&codec::encode_command(cmd)).unwrap();
            let (ptype, _) = read_packet(&mut server);
            assert_eq!(ptype, PacketType::Command as u32);
            assert_eq!(handle.state(), *expected);
        }

        server.write_all(&codec::encode_command("Save trial")).unwrap();
        read_packet(&mut server);
        let (ptype, body) = read_packet(&mut server);
        assert_eq!(ptype, PacketType::Event as u32);
        assert_eq!(body, vec![StateEvent::CaptureSaved.id()]);

        server.write_all(&codec::encode_command("Close")).unwrap();
        read_packet(&mut server);
        assert_eq!(handle.state(), StateEvent::ConnectionClosed);
        assert_eq!(handle.count("Start"), 2);
    }

    #[test]
    fn test_split_writes() {
        let mut server = SimServer::new();
        let handle = server.handle();

        let bytes = codec::encode_command("GetState");
        server.write_all(&bytes[..5]).unwrap();
        assert!(handle.commands().is_empty());
        server.write_all(&bytes[5..]).unwrap();
        assert_eq!(handle.commands(), vec!["GetState".to_string()]);
    }

    #[test]
    fn test_rotating_body() {
        let mut server = SimServer::new();
        server.discard_pending().unwrap();

        server
            .write_all(&codec::encode_command("GetCurrentFrame 3D 6D"))
            .unwrap();
        server
            .write_all(&codec::encode_command("GetCurrentFrame 3D 6D"))
            .unwrap();

        let (_, first) = read_packet(&mut server);
        let (_, second) = read_packet(&mut server);
        let first = codec::decode_data_body(&first).unwrap();
        let second = codec::decode_data_body(&second).unwrap();

        assert_eq!(first.frame_number, 0);
        assert_eq!(second.frame_number, 1);
        assert_eq!(second.timestamp, FRAME_PERIOD_US);

        // Rotation about Y keeps the Y axis fixed
        let rot = second.bodies[0].rotation;
        assert!((rot[(1, 1)] - 1.0).abs() < 1e-6);
        assert!((rot[(0, 0)] - ROTATION_STEP_RAD.cos()).abs() < 1e-6);
    }

    #[test]
    fn test_shutdown() {
        let mut server = SimServer::new();
        let handle = server.handle();

        Transport::shutdown(&mut server).unwrap();

        assert!(!handle.is_open());
        assert!(server.write_all(b"abc").is_err());
        let mut buf = [0u8; 4];
        assert_eq!(server.read(&mut buf).unwrap(), 0);
    }
}
