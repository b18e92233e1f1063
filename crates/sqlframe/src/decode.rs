use bytes::Bytes;

use crate::frame::*;
use crate::state::{FrameLimits, ParseError, ParseErrorKind, Protocol};

/// Residue that could not be trusted and was discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Malformed {
    /// Bytes discarded, counted from the end of the last complete frame
    pub discarded: usize,
    pub error:     ParseError,
}

/// Result of one decode pass over a residue buffer.
///
/// Invariant: `consumed + discarded() + leftover == input length`, where
/// `leftover` is what the caller must retain for the next pass. `need_more`
/// and `malformed` are never both set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decoded {
    /// Complete frames in arrival order
    pub frames:    Vec<Frame>,
    /// Bytes covered by `frames`
    pub consumed:  usize,
    /// Additional bytes required before the next frame can be decoded
    pub need_more: Option<usize>,
    /// Set when the remaining residue is malformed
    pub malformed: Option<Malformed>,
}

impl Decoded {
    /// Bytes dropped as malformed (0 if none)
    pub fn discarded(&self) -> usize {
        self.malformed.as_ref().map_or(0, |m| m.discarded)
    }
}

/// Pure decoder over an accumulated residue.
///
/// Implementations never mutate the input and never panic on malformed
/// length fields.
pub trait FrameDecoder {
    fn decode(&self, residue: &[u8]) -> Decoded;

    /// Decode a residue whose first `scanned` bytes were already searched by
    /// a previous pass without completing a frame.
    fn decode_resume(&self, residue: &[u8], scanned: usize) -> Decoded {
        let _ = scanned;
        self.decode(residue)
    }
}

/// Decoder for `[3-byte LE length][sequence id][command][payload]` packets.
#[derive(Debug, Clone, Copy)]
pub struct LengthPrefixedDecoder {
    max_payload_len: usize,
}

impl LengthPrefixedDecoder {
    pub fn new(limits: &FrameLimits) -> Self {
        Self {
            max_payload_len: limits.max_payload_len.min(MAX_PACKET_PAYLOAD),
        }
    }
}

impl FrameDecoder for LengthPrefixedDecoder {
    fn decode(&self, residue: &[u8]) -> Decoded {
        let mut decoded = Decoded::default();
        let mut pos = 0;

        while pos < residue.len() {
            let rest = &residue[pos..];
            let header = match parse_packet_header(rest) {
                Ok(h) => h,
                Err(_) => {
                    decoded.need_more = Some(PACKET_HEADER_SIZE - rest.len());
                    break;
                },
            };

            let length = header.length as usize;
            if length > self.max_payload_len {
                decoded.malformed = Some(Malformed {
                    discarded: rest.len(),
                    error:     ParseError::with_sequence(
                        ParseErrorKind::FrameTooLarge {
                            declared: length,
                            limit:    self.max_payload_len,
                        },
                        header.sequence_id,
                    ),
                });
                break;
            }

            let total = PACKET_HEADER_SIZE + length;
            if rest.len() < total {
                decoded.need_more = Some(total - rest.len());
                break;
            }

            // Command byte is part of the declared length; body is the rest
            let body_start = if length > 0 {
                PACKET_HEADER_SIZE + 1
            } else {
                PACKET_HEADER_SIZE
            };
            decoded.frames.push(Frame {
                header:   FrameHeader::Packet(header),
                body:     Bytes::copy_from_slice(&rest[body_start..total]),
                wire_len: total,
            });
            decoded.consumed += total;
            pos += total;
        }

        decoded
    }
}

/// Decoder for CRLF-terminated text commands.
#[derive(Debug, Clone, Copy)]
pub struct LineDecoder {
    max_line_len: usize,
}

impl LineDecoder {
    pub fn new(limits: &FrameLimits) -> Self {
        Self {
            max_line_len: limits.max_line_len,
        }
    }
}

impl FrameDecoder for LineDecoder {
    /// Without a complete line the decoder cannot know how many bytes are
    /// missing, so it always asks for one more, including on an empty
    /// residue.
    fn decode(&self, residue: &[u8]) -> Decoded {
        self.decode_resume(residue, 0)
    }

    /// Only the first line's search starts late: one byte before `scanned`,
    /// since a trailing '\r' may pair with the first new byte.
    fn decode_resume(&self, residue: &[u8], scanned: usize) -> Decoded {
        let mut decoded = Decoded::default();
        let mut pos = 0;
        let mut skip = scanned.saturating_sub(1).min(residue.len());

        loop {
            let rest = &residue[pos..];
            let found = find_crlf(&rest[skip..]).map(|offset| offset + skip);
            skip = 0;
            match found {
                Some(end) if end <= self.max_line_len => {
                    let total = end + CRLF.len();
                    decoded.frames.push(Frame {
                        header:   FrameHeader::Line,
                        body:     Bytes::copy_from_slice(&rest[..end]),
                        wire_len: total,
                    });
                    decoded.consumed += total;
                    pos += total;
                },
                Some(end) => {
                    decoded.malformed = Some(line_too_long(end, rest.len(), self.max_line_len));
                    break;
                },
                // A trailing '\r' may still be completed by the next byte
                None if rest.len() > self.max_line_len + 1 => {
                    decoded.malformed =
                        Some(line_too_long(rest.len(), rest.len(), self.max_line_len));
                    break;
                },
                None => {
                    decoded.need_more = Some(1);
                    break;
                },
            }
        }

        decoded
    }
}

fn line_too_long(len: usize, discarded: usize, limit: usize) -> Malformed {
    Malformed {
        discarded,
        error: ParseError::new(ParseErrorKind::LineTooLong { len, limit }),
    }
}

/// Decoder selected once per connection from its [`Protocol`].
#[derive(Debug, Clone, Copy)]
pub enum WireDecoder {
    LengthPrefixed(LengthPrefixedDecoder),
    Line(LineDecoder),
}

impl WireDecoder {
    pub fn new(protocol: Protocol, limits: FrameLimits) -> Self {
        match protocol {
            Protocol::LengthPrefixed => Self::LengthPrefixed(LengthPrefixedDecoder::new(&limits)),
            Protocol::Line => Self::Line(LineDecoder::new(&limits)),
        }
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            Self::LengthPrefixed(_) => Protocol::LengthPrefixed,
            Self::Line(_) => Protocol::Line,
        }
    }
}

impl FrameDecoder for WireDecoder {
    fn decode(&self, residue: &[u8]) -> Decoded {
        match self {
            Self::LengthPrefixed(d) => d.decode(residue),
            Self::Line(d) => d.decode(residue),
        }
    }

    fn decode_resume(&self, residue: &[u8], scanned: usize) -> Decoded {
        match self {
            Self::LengthPrefixed(d) => d.decode(residue),
            Self::Line(d) => d.decode_resume(residue, scanned),
        }
    }
}

/// Decode `buffer` with a fresh decoder for `protocol` and default limits.
///
/// Stateless convenience for one-shot inspection; connection handling should
/// go through [`FrameState`](crate::FrameState) so partial frames are kept.
pub fn decode_frames(protocol: Protocol, buffer: &[u8]) -> Decoded {
    WireDecoder::new(protocol, FrameLimits::default()).decode(buffer)
}
