use bytes::Bytes;

use crate::state::{ParseError, ParseErrorKind};


/// Packet header size: 3-byte little-endian payload length + 1-byte sequence id
pub const PACKET_HEADER_SIZE: usize = 4;

/// Largest payload length the 24-bit length field can express
pub const MAX_PACKET_PAYLOAD: usize = 0x00FF_FFFF;

/// Line terminator for the line-oriented variant
pub const CRLF: &[u8; 2] = b"\r\n";

/// Parsed length-prefixed packet header.
///
/// `command` is the first payload byte. It is `None` for zero-length packets,
/// which are valid and still produce a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Declared payload length (command byte included)
    pub length:      u32,
    pub sequence_id: u8,
    pub command:     Option<u8>,
}

/// Header of a decoded frame, one variant per wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameHeader {
    Packet(PacketHeader),
    /// CRLF-terminated text command
    Line,
}

/// One complete protocol message reconstructed from the byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header:   FrameHeader,
    /// Payload after the command byte (packets) or line text without CRLF
    pub body:     Bytes,
    /// Bytes this frame occupied on the wire, header and terminator included
    pub wire_len: usize,
}

impl Frame {
    /// Command byte for packet frames
    pub fn command(&self) -> Option<u8> {
        match self.header {
            FrameHeader::Packet(h) => h.command,
            FrameHeader::Line => None,
        }
    }

    /// Sequence id for packet frames
    pub fn sequence_id(&self) -> Option<u8> {
        match self.header {
            FrameHeader::Packet(h) => Some(h.sequence_id),
            FrameHeader::Line => None,
        }
    }

    /// Returns true if this frame came from the line-oriented variant
    pub fn is_line(&self) -> bool {
        matches!(self.header, FrameHeader::Line)
    }

    /// Body decoded as text, replacing invalid UTF-8 sequences
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Parse the 4-byte packet header.
///
/// The command byte is read only when the declared length is non-zero and the
/// byte is already buffered; callers that need the command must check that the
/// whole frame is present first.
pub fn parse_packet_header(buffer: &[u8]) -> Result<PacketHeader, ParseError> {
    if buffer.len() < PACKET_HEADER_SIZE {
        return Err(ParseError::new(ParseErrorKind::BufferTooSmall {
            needed: PACKET_HEADER_SIZE - buffer.len(),
        }));
    }

    let length = u32::from_le_bytes([buffer[0], buffer[1], buffer[2], 0]);
    let sequence_id = buffer[3];
    let command = if length > 0 {
        buffer.get(PACKET_HEADER_SIZE).copied()
    } else {
        None
    };

    Ok(PacketHeader {
        length,
        sequence_id,
        command,
    })
}

/// Encode a packet: header followed by `payload` (command byte included).
pub fn encode_packet(sequence_id: u8, payload: &[u8]) -> Result<Vec<u8>, ParseError> {
    if payload.len() > MAX_PACKET_PAYLOAD {
        return Err(ParseError::with_sequence(
            ParseErrorKind::FrameTooLarge {
                declared: payload.len(),
                limit:    MAX_PACKET_PAYLOAD,
            },
            sequence_id,
        ));
    }

    let len = (payload.len() as u32).to_le_bytes();
    let mut packet = Vec::with_capacity(PACKET_HEADER_SIZE + payload.len());
    packet.extend_from_slice(&[len[0], len[1], len[2], sequence_id]);
    packet.extend_from_slice(payload);
    Ok(packet)
}

/// Position of the first CRLF in `buffer`, if any
pub(crate) fn find_crlf(buffer: &[u8]) -> Option<usize> {
    buffer.windows(CRLF.len()).position(|w| w == CRLF)
}
