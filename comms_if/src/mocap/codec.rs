//! # Wire codec
//!
//! Encoding and decoding of protocol packets. Outgoing command and XML packets have big endian
//! headers; data and event packets from the server are decoded in host order.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use byteorder::{BigEndian, ByteOrder, NativeEndian, ReadBytesExt, WriteBytesExt};
use log::trace;
use nalgebra::{Matrix3, Vector3};
use std::io::{Cursor, Seek, SeekFrom};

use super::{
    ComponentFlags, Frame, MarkerSample, PacketHeader, PacketType, RigidBodySample, StateEvent,
    COMPONENT_3D, COMPONENT_6D, HEADER_SIZE,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Size of the data packet preamble: two timestamp words, frame number, component count.
const DATA_PREAMBLE_SIZE: usize = 16;

/// Size of a component header plus its count and flags.
const COMPONENT_PREAMBLE_SIZE: usize = 16;

/// Bytes per marker: X, Y, Z.
const MARKER_SIZE: usize = 3 * 4;

/// Bytes per rigid body: X, Y, Z then a 3x3 rotation.
const BODY_SIZE: usize = 12 * 4;

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Errors raised when a packet does not match the expected layout.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Packet ended before all declared fields were read")]
    Truncated,

    #[error("Declared packet size {0} is invalid")]
    BadPacketSize(u32),

    #[error("Component of type {component_type} declares an invalid size of {size} bytes")]
    BadComponentSize { component_type: u32, size: u32 },

    #[error("Expected a packet of type {expected:?}, found type {found}")]
    WrongType { expected: PacketType, found: u32 },
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Host order reader over a packet body which reports short reads as [`CodecError::Truncated`].
struct PayloadReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> PayloadReader<'a> {
    fn new(payload: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(payload),
        }
    }

    fn position(&self) -> usize {
        self.cursor.position() as usize
    }

    fn seek(&mut self, pos: usize) -> Result<(), CodecError> {
        if pos > self.cursor.get_ref().len() {
            return Err(CodecError::Truncated);
        }
        self.cursor
            .seek(SeekFrom::Start(pos as u64))
            .map(|_| ())
            .map_err(|_| CodecError::Truncated)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        self.cursor.read_u8().map_err(|_| CodecError::Truncated)
    }

    fn u16(&mut self) -> Result<u16, CodecError> {
        self.cursor
            .read_u16::<NativeEndian>()
            .map_err(|_| CodecError::Truncated)
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        self.cursor
            .read_u32::<NativeEndian>()
            .map_err(|_| CodecError::Truncated)
    }

    fn f32(&mut self) -> Result<f32, CodecError> {
        self.cursor
            .read_f32::<NativeEndian>()
            .map_err(|_| CodecError::Truncated)
    }

    fn vector3(&mut self) -> Result<Vector3<f32>, CodecError> {
        Ok(Vector3::new(self.f32()?, self.f32()?, self.f32()?))
    }

    fn flags(&mut self) -> Result<ComponentFlags, CodecError> {
        Ok(ComponentFlags {
            drop_rate: self.u16()?,
            out_of_sync_rate: self.u16()?,
        })
    }
}

// ------------------------------------------------------------------------------------------------
// ENCODING
// ------------------------------------------------------------------------------------------------

/// Encode a command packet to be sent to the server.
pub fn encode_command(text: &str) -> Vec<u8> {
    encode_text::<BigEndian>(PacketType::Command, text)
}

/// Encode an XML settings packet to be sent to the server.
pub fn encode_xml(xml: &str) -> Vec<u8> {
    encode_text::<BigEndian>(PacketType::Xml, xml)
}

/// Encode a textual reply as sent by the server (host order header).
pub fn encode_reply(packet_type: PacketType, text: &str) -> Vec<u8> {
    encode_text::<NativeEndian>(packet_type, text)
}

/// Encode an event packet as sent by the server.
pub fn encode_event(event: StateEvent) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + 1);
    write_header::<NativeEndian>(&mut buf, HEADER_SIZE + 1, PacketType::Event as u32);
    buf.push(event.id());
    buf
}

/// Encode a frame as a data packet as sent by the server.
///
/// The 3D component is written if the frame has marker flags or markers, followed by the 6D
/// component under the same rule. Rotations are written in the same layout they are read in, so
/// that decoding the result gives back the same frame.
pub fn encode_data_packet(frame: &Frame) -> Vec<u8> {
    let with_3d = frame.marker_flags.is_some() || !frame.markers.is_empty();
    let with_6d = frame.body_flags.is_some() || !frame.bodies.is_empty();

    let size_3d = COMPONENT_PREAMBLE_SIZE + frame.markers.len() * MARKER_SIZE;
    let size_6d = COMPONENT_PREAMBLE_SIZE + frame.bodies.len() * BODY_SIZE;

    let mut size = HEADER_SIZE + DATA_PREAMBLE_SIZE;
    if with_3d {
        size += size_3d;
    }
    if with_6d {
        size += size_6d;
    }

    let mut buf = Vec::with_capacity(size);
    write_header::<NativeEndian>(&mut buf, size, PacketType::Data as u32);

    // The timestamp words are sent high word first
    put_u32(&mut buf, (frame.timestamp >> 32) as u32);
    put_u32(&mut buf, frame.timestamp as u32);
    put_u32(&mut buf, frame.frame_number);
    put_u32(&mut buf, with_3d as u32 + with_6d as u32);

    if with_3d {
        put_component_preamble(
            &mut buf,
            size_3d,
            COMPONENT_3D,
            frame.markers.len(),
            frame.marker_flags.unwrap_or_default(),
        );
        for m in &frame.markers {
            put_f32s(&mut buf, m.position_mm.as_slice());
        }
    }

    if with_6d {
        put_component_preamble(
            &mut buf,
            size_6d,
            COMPONENT_6D,
            frame.bodies.len(),
            frame.body_flags.unwrap_or_default(),
        );
        for b in &frame.bodies {
            put_f32s(&mut buf, b.position_mm.as_slice());
            put_f32s(&mut buf, b.rotation.as_slice());
        }
    }

    buf
}

// ------------------------------------------------------------------------------------------------
// DECODING
// ------------------------------------------------------------------------------------------------

/// Decode a packet header in the given byte order.
pub fn decode_header<B: ByteOrder>(bytes: &[u8]) -> Result<PacketHeader, CodecError> {
    if bytes.len() < HEADER_SIZE {
        return Err(CodecError::Truncated);
    }

    let header = PacketHeader {
        size: B::read_u32(&bytes[0..4]),
        packet_type: B::read_u32(&bytes[4..8]),
    };

    if (header.size as usize) < HEADER_SIZE {
        return Err(CodecError::BadPacketSize(header.size));
    }

    Ok(header)
}

/// Decode a complete command or XML packet, as encoded by [`encode_command`] or [`encode_xml`].
///
/// Returns the header and the packet text.
pub fn decode_command(bytes: &[u8]) -> Result<(PacketHeader, String), CodecError> {
    let header = decode_header::<BigEndian>(bytes)?;

    if bytes.len() < header.size as usize {
        return Err(CodecError::Truncated);
    }

    Ok((header, decode_text(&bytes[HEADER_SIZE..header.size as usize])))
}

/// Decode the body of a textual packet, dropping the trailing NULs the server appends.
pub fn decode_text(body: &[u8]) -> String {
    String::from_utf8_lossy(body)
        .trim_end_matches('\0')
        .to_string()
}

/// Decode the body of an event packet into the raw state ID.
pub fn decode_event_body(body: &[u8]) -> Result<u8, CodecError> {
    PayloadReader::new(body).u8()
}

/// Decode the body (everything after the header) of a data packet into a frame.
///
/// Components other than 3D markers and 6D bodies are skipped using their declared size.
pub fn decode_data_body(body: &[u8]) -> Result<Frame, CodecError> {
    let mut r = PayloadReader::new(body);

    // The two timestamp words are swapped before widening to 64 bits
    let ts_high = r.u32()?;
    let ts_low = r.u32()?;
    let timestamp = ((ts_high as u64) << 32) | ts_low as u64;

    let frame_number = r.u32()?;
    let num_components = r.u32()?;

    let mut frame = Frame {
        timestamp,
        frame_number,
        markers: Vec::new(),
        marker_flags: None,
        bodies: Vec::new(),
        body_flags: None,
    };

    for _ in 0..num_components {
        let start = r.position();
        let size = r.u32()?;
        let component_type = r.u32()?;
        let end = start + size as usize;

        if (size as usize) < HEADER_SIZE || end > body.len() {
            return Err(CodecError::BadComponentSize {
                component_type,
                size,
            });
        }

        match component_type {
            COMPONENT_3D => {
                let count = r.u32()?;
                frame.marker_flags = Some(r.flags()?);
                for _ in 0..count {
                    frame.markers.push(MarkerSample {
                        position_mm: r.vector3()?,
                    });
                }
            }
            COMPONENT_6D => {
                let count = r.u32()?;
                frame.body_flags = Some(r.flags()?);
                for _ in 0..count {
                    let position_mm = r.vector3()?;
                    let mut rot = [0f32; 9];
                    for v in rot.iter_mut() {
                        *v = r.f32()?;
                    }
                    frame.bodies.push(RigidBodySample {
                        position_mm,
                        // Transposed with respect to the row-major wire layout
                        rotation: Matrix3::from_column_slice(&rot),
                    });
                }
            }
            other => trace!("Skipping component of type {} ({} bytes)", other, size),
        }

        if r.position() > end {
            return Err(CodecError::BadComponentSize {
                component_type,
                size,
            });
        }
        r.seek(end)?;
    }

    Ok(frame)
}

/// Decode a complete data packet including its header.
pub fn decode_data_packet(bytes: &[u8]) -> Result<Frame, CodecError> {
    let header = decode_header::<NativeEndian>(bytes)?;

    if !header.is(PacketType::Data) {
        return Err(CodecError::WrongType {
            expected: PacketType::Data,
            found: header.packet_type,
        });
    }
    if bytes.len() < header.size as usize {
        return Err(CodecError::Truncated);
    }

    decode_data_body(&bytes[HEADER_SIZE..header.size as usize])
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn encode_text<B: ByteOrder>(packet_type: PacketType, text: &str) -> Vec<u8> {
    let size = text.len() + HEADER_SIZE;
    let mut buf = Vec::with_capacity(size);
    write_header::<B>(&mut buf, size, packet_type as u32);
    buf.extend_from_slice(text.as_bytes());
    buf
}

fn write_header<B: ByteOrder>(buf: &mut Vec<u8>, size: usize, packet_type: u32) {
    // Writes into a Vec cannot fail
    buf.write_u32::<B>(size as u32).ok();
    buf.write_u32::<B>(packet_type).ok();
}

fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.write_u32::<NativeEndian>(value).ok();
}

fn put_f32s(buf: &mut Vec<u8>, values: &[f32]) {
    for v in values {
        buf.write_f32::<NativeEndian>(*v).ok();
    }
}

fn put_component_preamble(
    buf: &mut Vec<u8>,
    size: usize,
    component_type: u32,
    count: usize,
    flags: ComponentFlags,
) {
    put_u32(buf, size as u32);
    put_u32(buf, component_type);
    put_u32(buf, count as u32);
    buf.write_u16::<NativeEndian>(flags.drop_rate).ok();
    buf.write_u16::<NativeEndian>(flags.out_of_sync_rate).ok();
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn test_frame() -> Frame {
        Frame {
            timestamp: 0x0000_0001_0000_2710,
            frame_number: 42,
            markers: vec![
                MarkerSample {
                    position_mm: Vector3::new(10.5, -20.25, 300.0),
                },
                MarkerSample {
                    position_mm: Vector3::new(0.0, 1.0, 2.0),
                },
            ],
            marker_flags: Some(ComponentFlags {
                drop_rate: 3,
                out_of_sync_rate: 1,
            }),
            bodies: vec![RigidBodySample {
                position_mm: Vector3::new(100.0, 200.0, 300.0),
                rotation: Matrix3::new(0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0),
            }],
            body_flags: Some(ComponentFlags::default()),
        }
    }

    #[test]
    fn test_command_round_trip() {
        for text in &["GetState", "Save trial_3_FAL", "version 1.13", ""] {
            let bytes = encode_command(text);

            assert_eq!(bytes.len(), text.len() + 8);
            assert_eq!(&bytes[4..8], &[0, 0, 0, 1]);

            let (header, decoded) = decode_command(&bytes).unwrap();
            assert_eq!(header.size as usize, text.len() + 8);
            assert!(header.is(PacketType::Command));
            assert_eq!(&decoded, text);
        }
    }

    #[test]
    fn test_xml_header() {
        let xml = "<QTM_Settings></QTM_Settings>";
        let bytes = encode_xml(xml);

        assert_eq!(BigEndian::read_u32(&bytes[0..4]) as usize, xml.len() + 8);
        assert_eq!(BigEndian::read_u32(&bytes[4..8]), 2);
    }

    #[test]
    fn test_data_round_trip() {
        let frame = test_frame();
        let bytes = encode_data_packet(&frame);

        let decoded = decode_data_packet(&bytes).unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(encode_data_packet(&decoded), bytes);
    }

    #[test]
    fn test_data_layout() {
        // Build a packet by hand with one marker and one body
        let mut body = Vec::new();
        put_u32(&mut body, 7); // timestamp high word
        put_u32(&mut body, 9); // timestamp low word
        put_u32(&mut body, 1234);
        put_u32(&mut body, 2);
        put_component_preamble(&mut body, 16 + 12, COMPONENT_3D, 1, ComponentFlags::default());
        put_f32s(&mut body, &[1.0, 2.0, 3.0]);
        put_component_preamble(&mut body, 16 + 48, COMPONENT_6D, 1, ComponentFlags::default());
        put_f32s(&mut body, &[4.0, 5.0, 6.0]);
        put_f32s(&mut body, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);

        let mut bytes = Vec::new();
        write_header::<NativeEndian>(&mut bytes, body.len() + 8, 3);
        bytes.extend_from_slice(&body);

        let frame = decode_data_packet(&bytes).unwrap();

        assert_eq!(frame.timestamp, (7u64 << 32) | 9);
        assert_eq!(frame.frame_number, 1234);
        assert_eq!(frame.markers[0].position_mm, Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(frame.bodies[0].position_mm, Vector3::new(4.0, 5.0, 6.0));

        // Consumed transposed: the first wire row becomes the first column
        assert_eq!(frame.bodies[0].rotation[(0, 0)], 1.0);
        assert_eq!(frame.bodies[0].rotation[(1, 0)], 2.0);
        assert_eq!(frame.bodies[0].rotation[(0, 1)], 4.0);
        assert_eq!(frame.bodies[0].rotation[(2, 2)], 9.0);

        assert_eq!(encode_data_packet(&frame), bytes);
    }

    #[test]
    fn test_unknown_component_skipped() {
        let mut body = Vec::new();
        put_u32(&mut body, 0);
        put_u32(&mut body, 1);
        put_u32(&mut body, 5);
        put_u32(&mut body, 2);
        // Unknown component type 12 with 4 bytes of payload
        put_u32(&mut body, 12);
        put_u32(&mut body, 12);
        put_u32(&mut body, 0xDEAD_BEEF);
        put_component_preamble(&mut body, 16 + 12, COMPONENT_3D, 1, ComponentFlags::default());
        put_f32s(&mut body, &[1.0, 1.0, 1.0]);

        let frame = decode_data_body(&body).unwrap();
        assert_eq!(frame.markers.len(), 1);
        assert!(frame.bodies.is_empty());
        assert_eq!(frame.body_flags, None);
    }

    #[test]
    fn test_malformed_data() {
        let bytes = encode_data_packet(&test_frame());

        // Truncated anywhere inside the body must be reported, not panic
        for len in 8..bytes.len() {
            assert!(decode_data_body(&bytes[8..len]).is_err());
        }

        // Component size smaller than its header
        let mut body = Vec::new();
        put_u32(&mut body, 0);
        put_u32(&mut body, 0);
        put_u32(&mut body, 0);
        put_u32(&mut body, 1);
        put_u32(&mut body, 4);
        put_u32(&mut body, COMPONENT_3D);
        assert_eq!(
            decode_data_body(&body),
            Err(CodecError::BadComponentSize {
                component_type: COMPONENT_3D,
                size: 4
            })
        );
    }

    #[test]
    fn test_wrong_type() {
        let bytes = encode_event(StateEvent::CaptureStarted);

        assert_eq!(
            decode_data_packet(&bytes),
            Err(CodecError::WrongType {
                expected: PacketType::Data,
                found: 6
            })
        );

        let header = decode_header::<NativeEndian>(&bytes).unwrap();
        assert_eq!(decode_event_body(&bytes[8..header.size as usize]), Ok(3));
    }

    #[test]
    fn test_reply_text() {
        let bytes = encode_reply(PacketType::Command, "Version set to 1.13\0");
        let header = decode_header::<NativeEndian>(&bytes).unwrap();

        assert_eq!(decode_text(&bytes[8..]), "Version set to 1.13");
        assert_eq!(header.body_len(), 20);
    }
}
