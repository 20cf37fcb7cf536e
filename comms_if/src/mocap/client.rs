//! # Motion Capture Client
//!
//! Framed request/reply exchange with the capture server over a [`Transport`].

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use byteorder::NativeEndian;
use log::{debug, info, trace, warn};
use serde::Deserialize;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use super::{
    codec::{self, CodecError},
    transport::{is_timeout, Transport},
    Frame, PacketHeader, PacketType, StateEvent, StatePoll, CMD_GET_CURRENT_FRAME, DEFAULT_PORT,
    HEADER_SIZE,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Largest packet the client will accept. Anything larger is treated as a corrupt header.
const MAX_PACKET_SIZE: u32 = 16 * 1024 * 1024;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Connection parameters for the capture server.
#[derive(Debug, Clone, Deserialize)]
pub struct MocapParams {
    /// Hostname or IP address of the server.
    pub host: String,

    pub port: u16,

    /// Protocol version requested after the handshake.
    pub protocol_version: String,

    /// Maximum capture duration configured on the server.
    ///
    /// Units: seconds
    pub capture_time_s: f64,

    /// How long to wait for the connection and the handshake message.
    ///
    /// Units: milliseconds
    pub handshake_timeout_ms: u64,

    /// Timeout applied to every read after the handshake.
    ///
    /// Units: milliseconds
    pub read_timeout_ms: u64,

    /// Number of packet headers to read while waiting for a state event.
    pub state_poll_attempts: u32,
}

/// Client for the capture server's real-time protocol.
///
/// The client owns the transport exclusively. Callers that share it between threads must wrap
/// the whole client in a lock so that request/reply exchanges are never interleaved.
pub struct MocapClient {
    transport: Option<Box<dyn Transport>>,
    params: MocapParams,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum MocapError {
    #[error("Could not connect to the capture server: {0}")]
    Connection(io::Error),

    #[error("The capture server did not send a handshake message")]
    NoHandshake,

    #[error("The client is not connected to the server")]
    NotConnected,

    #[error("Could not exchange data with the server: {0}")]
    Io(io::Error),

    #[error("The server sent a malformed packet: {0}")]
    Protocol(CodecError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for MocapParams {
    fn default() -> Self {
        Self {
            host: String::from("127.0.0.1"),
            port: DEFAULT_PORT,
            protocol_version: String::from("1.13"),
            capture_time_s: 600.0,
            handshake_timeout_ms: 2000,
            read_timeout_ms: 500,
            state_poll_attempts: 5,
        }
    }
}

impl MocapClient {
    /// Open a TCP connection to the server described by `params` and initialise the session.
    pub fn connect(params: &MocapParams) -> Result<Self, MocapError> {
        let timeout = Duration::from_millis(params.handshake_timeout_ms);

        let addrs = (params.host.as_str(), params.port)
            .to_socket_addrs()
            .map_err(MocapError::Connection)?;

        let mut last_err = io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("{} did not resolve to any address", params.host),
        );

        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true).map_err(MocapError::Connection)?;
                    info!("Connected to capture server at {}", addr);
                    return Self::connect_with(Box::new(stream), params);
                }
                Err(e) => {
                    debug!("Could not connect to {}: {}", addr, e);
                    last_err = e;
                }
            }
        }

        Err(MocapError::Connection(last_err))
    }

    /// Initialise a session over an already open transport.
    ///
    /// Reads the handshake, negotiates the protocol version and configures the capture duration.
    pub fn connect_with(
        transport: Box<dyn Transport>,
        params: &MocapParams,
    ) -> Result<Self, MocapError> {
        let mut client = Self {
            transport: Some(transport),
            params: params.clone(),
        };

        // Handshake
        client
            .transport_mut()?
            .set_read_timeout(Some(Duration::from_millis(params.handshake_timeout_ms)))
            .map_err(MocapError::Connection)?;

        let handshake = match client.read_reply() {
            Ok(s) if !s.is_empty() => s,
            Ok(_) => return Err(MocapError::NoHandshake),
            Err(MocapError::Io(e)) if is_timeout(&e) => return Err(MocapError::NoHandshake),
            Err(MocapError::Io(e)) => return Err(MocapError::Connection(e)),
            Err(e) => return Err(e),
        };
        info!("Server handshake: {}", handshake);

        client
            .transport_mut()?
            .set_read_timeout(Some(Duration::from_millis(params.read_timeout_ms)))
            .map_err(MocapError::Connection)?;

        // Version negotiation
        client.send_command(&format!("version {}", params.protocol_version))?;
        let reply = client.read_reply()?;
        info!("Version reply: {}", reply);

        // Capture duration
        client.send_xml(&format!(
            "<QTM_Settings><General><Capture_Time>{}</Capture_Time></General></QTM_Settings>",
            params.capture_time_s
        ))?;

        Ok(client)
    }

    /// Returns true until [`MocapClient::disconnect`] is called.
    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    pub fn params(&self) -> &MocapParams {
        &self.params
    }

    /// Send a command packet. No reply is read.
    pub fn send_command(&mut self, text: &str) -> Result<(), MocapError> {
        debug!("Sending command \"{}\"", text);
        self.write_packet(&codec::encode_command(text))
    }

    /// Send an XML settings packet inside a take/release control bracket.
    pub fn send_xml(&mut self, xml: &str) -> Result<(), MocapError> {
        self.take_control()?;

        debug!("Sending XML ({} bytes)", xml.len());
        self.write_packet(&codec::encode_xml(xml))?;
        let reply = self.read_reply()?;
        info!("XML reply: {}", reply);

        self.release_control()
    }

    /// Request master control of the server and drain the reply.
    ///
    /// Unread packets left over from earlier commands are discarded first.
    pub fn take_control(&mut self) -> Result<(), MocapError> {
        self.flush()?;
        self.send_command("TakeControl")?;
        let reply = self.read_reply()?;
        debug!("TakeControl reply: {}", reply);
        Ok(())
    }

    /// Release master control of the server and drain the reply.
    pub fn release_control(&mut self) -> Result<(), MocapError> {
        self.send_command("ReleaseControl")?;
        let reply = self.read_reply()?;
        debug!("ReleaseControl reply: {}", reply);
        Ok(())
    }

    /// Read one packet and return it as text.
    ///
    /// Event packets are returned as the name of the state they carry.
    pub fn read_reply(&mut self) -> Result<String, MocapError> {
        let (header, body) = self.read_packet()?;

        if header.is(PacketType::Event) {
            let id = codec::decode_event_body(&body).map_err(MocapError::Protocol)?;
            return Ok(StateEvent::from_id(id)
                .map(|e| e.to_string())
                .unwrap_or_else(|| format!("Unknown state {}", id)));
        }

        let text = codec::decode_text(&body);
        if header.is(PacketType::Error) {
            warn!("Server reported an error: {}", text);
        }

        Ok(text)
    }

    /// Read the next packet as a pose frame.
    ///
    /// Returns `Ok(None)` if the packet was not a data packet or could not be decoded. In that case
    /// any buffered bytes are discarded so the next request starts on a packet boundary.
    pub fn read_frame(&mut self) -> Result<Option<Frame>, MocapError> {
        let (header, body) = match self.read_packet() {
            Ok(p) => p,
            Err(MocapError::Protocol(e)) => {
                warn!("Discarding malformed packet: {}", e);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if !header.is(PacketType::Data) {
            warn!(
                "Expected a data packet but got packet type {}, discarding",
                header.packet_type
            );
            self.flush()?;
            return Ok(None);
        }

        match codec::decode_data_body(&body) {
            Ok(frame) => Ok(Some(frame)),
            Err(e) => {
                warn!("Could not decode data packet: {}", e);
                self.flush()?;
                Ok(None)
            }
        }
    }

    /// Request the current frame with 3D and 6D components and read the reply.
    pub fn request_frame(&mut self) -> Result<Option<Frame>, MocapError> {
        self.flush()?;
        self.write_packet(&codec::encode_command(CMD_GET_CURRENT_FRAME))?;
        self.read_frame()
    }

    /// Poll the server's session state.
    ///
    /// Up to `state_poll_attempts` packets are read looking for an event. Timeouts count as
    /// attempts. If no event is found [`StatePoll::Indeterminate`] is returned.
    pub fn read_state_event(&mut self) -> Result<StatePoll, MocapError> {
        self.flush()?;
        self.send_command("GetState")?;

        self.read_event()
    }

    /// Read packets until an event arrives, without sending anything.
    ///
    /// Non-event packets are skipped. The same attempt bound as [`MocapClient::read_state_event`]
    /// applies.
    pub fn read_event(&mut self) -> Result<StatePoll, MocapError> {
        let attempts = self.params.state_poll_attempts.max(1);

        for attempt in 1..=attempts {
            match self.read_packet() {
                Ok((header, body)) if header.is(PacketType::Event) => {
                    let id = match codec::decode_event_body(&body) {
                        Ok(id) => id,
                        Err(e) => {
                            warn!("Malformed event packet: {}", e);
                            continue;
                        }
                    };

                    return Ok(match StateEvent::from_id(id) {
                        Some(event) => {
                            trace!("Event: {}", event);
                            StatePoll::Known(event)
                        }
                        None => {
                            warn!("Server reported unknown state ID {}", id);
                            StatePoll::Indeterminate
                        }
                    });
                }
                Ok((header, _)) => trace!(
                    "Skipping packet of type {} while waiting for an event (attempt {}/{})",
                    header.packet_type,
                    attempt,
                    attempts
                ),
                Err(MocapError::Io(e)) if is_timeout(&e) => {
                    trace!("Event read timed out (attempt {}/{})", attempt, attempts)
                }
                Err(MocapError::Protocol(e)) => {
                    warn!("Malformed packet while waiting for an event: {}", e)
                }
                Err(e) => return Err(e),
            }
        }

        warn!("No state event after {} attempts", attempts);
        Ok(StatePoll::Indeterminate)
    }

    /// Discard any received but unread bytes.
    pub fn flush(&mut self) -> Result<(), MocapError> {
        self.transport_mut()?
            .discard_pending()
            .map_err(MocapError::Io)
    }

    /// Close the connection. Calling this on a closed client does nothing.
    pub fn disconnect(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            match transport.shutdown() {
                Ok(()) => info!("Disconnected from capture server"),
                Err(e) => debug!("Error while shutting down the connection: {}", e),
            }
        }
    }

    fn transport_mut(&mut self) -> Result<&mut Box<dyn Transport>, MocapError> {
        self.transport.as_mut().ok_or(MocapError::NotConnected)
    }

    fn write_packet(&mut self, bytes: &[u8]) -> Result<(), MocapError> {
        let transport = self.transport_mut()?;

        transport.write_all(bytes).map_err(MocapError::Io)?;
        transport.flush().map_err(MocapError::Io)
    }

    /// Read one complete packet, returning its header and body.
    fn read_packet(&mut self) -> Result<(PacketHeader, Vec<u8>), MocapError> {
        let mut header_bytes = [0u8; HEADER_SIZE];
        self.transport_mut()?
            .read_exact(&mut header_bytes)
            .map_err(MocapError::Io)?;

        let header = match codec::decode_header::<NativeEndian>(&header_bytes) {
            Ok(h) if h.size <= MAX_PACKET_SIZE => h,
            Ok(h) => {
                self.flush()?;
                return Err(MocapError::Protocol(CodecError::BadPacketSize(h.size)));
            }
            Err(e) => {
                self.flush()?;
                return Err(MocapError::Protocol(e));
            }
        };

        let mut body = vec![0u8; header.body_len()];
        self.transport_mut()?
            .read_exact(&mut body)
            .map_err(MocapError::Io)?;

        Ok((header, body))
    }
}

impl Drop for MocapClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
