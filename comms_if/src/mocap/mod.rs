//! # Motion Capture Interface
//!
//! This module implements the subset of the motion capture server's real-time protocol used by
//! the rig: session commands, state events, and on-demand 3D marker / 6D rigid body frames.
//!
//! Packets start with an 8 byte header `[size: u32][type: u32]`, where `size` includes the header
//! itself. Packets sent to the server use big endian headers, packets sent by the server are in
//! host order.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod client;
pub mod codec;
pub mod sim;
mod transport;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;

// ------------------------------------------------------------------------------------------------
// EXPORTS
// ------------------------------------------------------------------------------------------------

pub use client::{MocapClient, MocapError, MocapParams};
pub use codec::CodecError;
pub use transport::Transport;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Size of every packet header in bytes.
pub const HEADER_SIZE: usize = 8;

/// Default port of the server's real-time interface.
pub const DEFAULT_PORT: u16 = 22223;

/// Component type ID of a 3D marker set.
pub const COMPONENT_3D: u32 = 1;

/// Component type ID of a 6D rigid body set.
pub const COMPONENT_6D: u32 = 5;

/// Command requesting the current frame with the components used by the rig.
pub const CMD_GET_CURRENT_FRAME: &str = "GetCurrentFrame 3D 6D";

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A packet header as found on the wire.
///
/// The type is kept raw since the server may send types this client doesn't know.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Total size of the packet including this header, in bytes.
    pub size: u32,

    /// Raw packet type, see [`PacketType`].
    pub packet_type: u32,
}

/// One pose frame returned by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Server timestamp, in microseconds.
    pub timestamp: u64,

    /// Server frame number.
    pub frame_number: u32,

    /// Labelled 3D markers, in server order.
    pub markers: Vec<MarkerSample>,

    /// Flags of the 3D component, `None` if the frame had no 3D component.
    pub marker_flags: Option<ComponentFlags>,

    /// 6D rigid bodies, in server order.
    pub bodies: Vec<RigidBodySample>,

    /// Flags of the 6D component, `None` if the frame had no 6D component.
    pub body_flags: Option<ComponentFlags>,
}

/// A single 3D marker position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarkerSample {
    /// Units: millimeters
    pub position_mm: Vector3<f32>,
}

/// A single 6D rigid body.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RigidBodySample {
    /// Units: millimeters
    pub position_mm: Vector3<f32>,

    /// Orientation of the body in the capture volume.
    pub rotation: Matrix3<f32>,
}

/// Per-component flags sent ahead of the component's data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentFlags {
    pub drop_rate: u16,
    pub out_of_sync_rate: u16,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Packet types defined by the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PacketType {
    Error = 0,
    Command = 1,
    Xml = 2,
    Data = 3,
    NoMoreData = 4,
    C3dFile = 5,
    Event = 6,
    Discover = 7,
    QtmFile = 8,
}

/// Session state reported by the server.
///
/// ID 5 is reserved by the server and never reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateEvent {
    Connected = 1,
    ConnectionClosed = 2,
    CaptureStarted = 3,
    CaptureStopped = 4,
    CalibrationStarted = 6,
    CalibrationStopped = 7,
    RtFromFileStarted = 8,
    RtFromFileStopped = 9,
    WaitingForTrigger = 10,
    CameraSettingsChanged = 11,
    ShuttingDown = 12,
    CaptureSaved = 13,
}

/// Result of polling the server's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatePoll {
    /// The server reported this state.
    Known(StateEvent),

    /// No usable event was read within the retry bound. The caller must not assume that any
    /// transition has happened.
    Indeterminate,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Frame {
    /// Orientation of the first rigid body, if the frame contains one with finite values.
    pub fn first_body_rotation(&self) -> Option<Matrix3<f64>> {
        let rot = self.bodies.first()?.rotation.map(|v| v as f64);

        if rot.iter().all(|v| v.is_finite()) {
            Some(rot)
        } else {
            None
        }
    }
}

impl PacketType {
    pub fn from_u32(value: u32) -> Option<Self> {
        use PacketType::*;

        Some(match value {
            0 => Error,
            1 => Command,
            2 => Xml,
            3 => Data,
            4 => NoMoreData,
            5 => C3dFile,
            6 => Event,
            7 => Discover,
            8 => QtmFile,
            _ => return None,
        })
    }
}

impl PacketHeader {
    /// Returns true if the header carries the given packet type.
    pub fn is(&self, packet_type: PacketType) -> bool {
        self.packet_type == packet_type as u32
    }

    /// Number of bytes following the header.
    pub fn body_len(&self) -> usize {
        (self.size as usize).saturating_sub(HEADER_SIZE)
    }
}

impl StateEvent {
    /// All events, in ID order.
    pub const ALL: [StateEvent; 12] = [
        StateEvent::Connected,
        StateEvent::ConnectionClosed,
        StateEvent::CaptureStarted,
        StateEvent::CaptureStopped,
        StateEvent::CalibrationStarted,
        StateEvent::CalibrationStopped,
        StateEvent::RtFromFileStarted,
        StateEvent::RtFromFileStopped,
        StateEvent::WaitingForTrigger,
        StateEvent::CameraSettingsChanged,
        StateEvent::ShuttingDown,
        StateEvent::CaptureSaved,
    ];

    /// Map a state ID sent by the server into an event.
    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|e| e.id() == id)
    }

    pub fn id(&self) -> u8 {
        *self as u8
    }

    /// Human readable name of the state, as shown on the status display.
    pub fn name(&self) -> &'static str {
        use StateEvent::*;

        match self {
            Connected => "Connected",
            ConnectionClosed => "Connection Closed",
            CaptureStarted => "Capture Started",
            CaptureStopped => "Capture Stopped",
            CalibrationStarted => "Calibration Started",
            CalibrationStopped => "Calibration Stopped",
            RtFromFileStarted => "RT From File Started",
            RtFromFileStopped => "RT From File Stopped",
            WaitingForTrigger => "Waiting For Trigger",
            CameraSettingsChanged => "Camera Settings Changed",
            ShuttingDown => "QTM Shutting Down",
            CaptureSaved => "Capture Saved",
        }
    }
}

impl fmt::Display for StateEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl fmt::Display for StatePoll {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatePoll::Known(e) => write!(f, "{}", e),
            StatePoll::Indeterminate => write!(f, "Indeterminate"),
        }
    }
}
