use bytes::{Buf, BytesMut};
use thiserror::Error;

use crate::decode::{Decoded, FrameDecoder, Malformed, WireDecoder};
use crate::frame::{CRLF, MAX_PACKET_PAYLOAD, PACKET_HEADER_SIZE};

/// Wire protocol variant, selected once per connection from the listener's
/// protocol identifier and never re-detected from traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// `[3-byte LE length][sequence id][command][payload]` packets
    LengthPrefixed,
    /// CRLF-terminated text commands
    Line,
}

impl Protocol {
    /// Canonical protocol identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LengthPrefixed => "length-prefixed",
            Self::Line => "line",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognized protocol identifier
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown protocol identifier '{0}'")]
pub struct UnknownProtocol(pub String);

impl std::str::FromStr for Protocol {
    type Err = UnknownProtocol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "length-prefixed" | "mysql" | "tidb" => Ok(Self::LengthPrefixed),
            "line" | "r2d2" => Ok(Self::Line),
            other => Err(UnknownProtocol(other.to_string())),
        }
    }
}

/// Configurable limits for frame decoding.
///
/// These bound per-direction memory on untrusted input: a declared length or
/// an unterminated line above the limit makes the residue untrusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLimits {
    /// Maximum declared payload length of a packet (default: 1 MiB)
    pub max_payload_len: usize,
    /// Maximum length of a line, terminator excluded (default: 64 KiB)
    pub max_line_len:    usize,
    /// Maximum residue retained between calls (default: 2 MiB)
    pub max_buffer_size: usize,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_payload_len: 1024 * 1024,     // 1 MiB
            max_line_len:    64 * 1024,       // 64 KiB
            max_buffer_size: 2 * 1024 * 1024, // 2 MiB
        }
    }
}

impl FrameLimits {
    /// Smallest `max_buffer_size` that can hold every partial frame the
    /// payload and line limits allow.
    pub fn min_buffer_size(&self) -> usize {
        let packet = PACKET_HEADER_SIZE + self.max_payload_len.min(MAX_PACKET_PAYLOAD);
        let line = self.max_line_len.saturating_add(CRLF.len());
        packet.max(line)
    }

    /// Rejects a `max_buffer_size` too small for a legal frame to complete.
    pub fn validate(&self) -> Result<(), InvalidLimits> {
        let required = self.min_buffer_size();
        if self.max_buffer_size < required {
            return Err(InvalidLimits {
                max_buffer_size: self.max_buffer_size,
                required,
            });
        }
        Ok(())
    }
}

/// `max_buffer_size` below [`FrameLimits::min_buffer_size`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("max_buffer_size {max_buffer_size} is below the {required} bytes a partial frame may need")]
pub struct InvalidLimits {
    pub max_buffer_size: usize,
    pub required:        usize,
}

/// Decode phase of one direction.
///
/// Cycles `AwaitingHeader → AwaitingPayload → AwaitingHeader` while the
/// connection is open. Complete frames are handed out within the same
/// `feed()` call that completes them, so there is no resting "frame ready"
/// phase. `Errored` is terminal and only entered on malformed input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodePhase {
    /// No partial frame buffered, or fewer bytes than a packet header
    AwaitingHeader,
    /// Header known (or partial line buffered), waiting for the rest
    AwaitingPayload,
    /// Malformed input seen; the direction no longer accepts data
    Errored,
}

/// Per-direction framing state.
///
/// Holds the residue (bytes not yet forming a complete frame) across `feed()`
/// calls. Create one instance per direction; the owner must serialize calls.
#[derive(Debug)]
pub struct FrameState {
    decoder: WireDecoder,

    limits: FrameLimits,

    /// Bytes retained from previous calls
    residue: BytesMut,

    phase: DecodePhase,

    /// Total bytes accepted by `feed()`
    bytes_offered: u64,

    /// Total bytes handed out as frames or discarded as malformed
    bytes_consumed: u64,

    frames_decoded: u64,

    /// Residue bytes already searched without completing a frame
    scanned: usize,
}

impl FrameState {
    /// Create framing state with default limits.
    pub fn new(protocol: Protocol) -> Self {
        Self::with_limits(protocol, FrameLimits::default())
    }

    /// Create framing state with custom limits.
    pub fn with_limits(protocol: Protocol, limits: FrameLimits) -> Self {
        Self {
            decoder: WireDecoder::new(protocol, limits),
            limits,
            residue: BytesMut::new(),
            phase: DecodePhase::AwaitingHeader,
            bytes_offered: 0,
            bytes_consumed: 0,
            frames_decoded: 0,
            scanned: 0,
        }
    }

    /// Append `data` to the residue and decode every complete frame.
    ///
    /// Consumed and discarded bytes are removed from the residue; the rest is
    /// kept for the next call. Returns `Err` without retaining anything once
    /// the direction is errored. Malformed input is not an `Err`: it is
    /// reported in [`Decoded::malformed`] and moves the state to
    /// [`DecodePhase::Errored`]. A partial frame left over beyond
    /// `max_buffer_size` counts as malformed; complete frames decoded in the
    /// same call are still returned.
    pub fn feed(&mut self, data: &[u8]) -> Result<Decoded, ParseError> {
        if self.phase == DecodePhase::Errored {
            return Err(ParseError::new(ParseErrorKind::Errored));
        }

        self.residue.extend_from_slice(data);
        self.bytes_offered += data.len() as u64;

        let mut decoded = self.decoder.decode_resume(&self.residue, self.scanned);

        let advance = decoded.consumed + decoded.discarded();
        self.residue.advance(advance);
        self.bytes_consumed += advance as u64;
        self.frames_decoded += decoded.frames.len() as u64;

        if decoded.malformed.is_none() && self.residue.len() > self.limits.max_buffer_size {
            let size = self.residue.len();
            decoded.need_more = None;
            decoded.malformed = Some(Malformed {
                discarded: size,
                error:     ParseError::new(ParseErrorKind::BufferTooLarge {
                    size,
                    limit: self.limits.max_buffer_size,
                }),
            });
            self.bytes_consumed += size as u64;
            self.residue.clear();
        }
        self.scanned = self.residue.len();

        self.phase = if let Some(_malformed) = &decoded.malformed {
            crate::trace_warn!(
                "discarding {} bytes of malformed input: {}",
                _malformed.discarded,
                _malformed.error
            );
            DecodePhase::Errored
        } else {
            self.pending_phase()
        };

        crate::trace_debug!(
            frames = decoded.frames.len(),
            consumed = decoded.consumed,
            residue = self.residue.len(),
            "decoded buffer"
        );

        Ok(decoded)
    }

    fn pending_phase(&self) -> DecodePhase {
        match self.decoder.protocol() {
            Protocol::LengthPrefixed if self.residue.len() >= PACKET_HEADER_SIZE => {
                DecodePhase::AwaitingPayload
            },
            Protocol::LengthPrefixed => DecodePhase::AwaitingHeader,
            Protocol::Line if self.residue.is_empty() => DecodePhase::AwaitingHeader,
            Protocol::Line => DecodePhase::AwaitingPayload,
        }
    }

    /// Drop any retained residue (e.g., when the host resets the stream).
    /// An errored direction stays errored.
    pub fn clear(&mut self) {
        self.bytes_consumed += self.residue.len() as u64;
        self.residue.clear();
        self.scanned = 0;
        if self.phase != DecodePhase::Errored {
            self.phase = DecodePhase::AwaitingHeader;
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.decoder.protocol()
    }

    pub fn limits(&self) -> &FrameLimits {
        &self.limits
    }

    pub fn phase(&self) -> DecodePhase {
        self.phase
    }

    /// Returns true once malformed input has been seen
    pub fn is_errored(&self) -> bool {
        self.phase == DecodePhase::Errored
    }

    /// Number of bytes retained for the next call
    pub fn residue_len(&self) -> usize {
        self.residue.len()
    }

    /// Total bytes accepted so far
    pub fn bytes_offered(&self) -> u64 {
        self.bytes_offered
    }

    /// Total bytes consumed by frames, discarded as malformed, or cleared.
    /// Always equals `bytes_offered() - residue_len()`.
    pub fn bytes_consumed(&self) -> u64 {
        self.bytes_consumed
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }
}

/// Classification of parse errors (public API)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseErrorKind {
    /// Fewer bytes than a packet header are available
    #[error("buffer too small for packet header ({needed} more bytes needed)")]
    BufferTooSmall { needed: usize },
    /// Declared packet length exceeds the configured limit
    #[error("declared payload length {declared} exceeds limit {limit}")]
    FrameTooLarge { declared: usize, limit: usize },
    /// Line exceeds the configured limit without a terminator in range
    #[error("line of {len} bytes exceeds limit {limit}")]
    LineTooLong { len: usize, limit: usize },
    /// Partial frame left over beyond `max_buffer_size`
    #[error("residue of {size} bytes exceeds max_buffer_size {limit}")]
    BufferTooLarge { size: usize, limit: usize },
    /// Direction already saw malformed input and accepts no more data
    #[error("stream is errored after malformed input")]
    Errored,
}

/// Parse error with optional packet context (public API)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// What went wrong
    pub kind:        ParseErrorKind,
    /// Sequence id of the offending packet, if one was decoded
    pub sequence_id: Option<u8>,
}

impl ParseError {
    /// Create an error without packet context.
    pub fn new(kind: ParseErrorKind) -> Self {
        Self {
            kind,
            sequence_id: None,
        }
    }

    /// Create an error tied to the packet with the given sequence id.
    pub fn with_sequence(kind: ParseErrorKind, sequence_id: u8) -> Self {
        Self {
            kind,
            sequence_id: Some(sequence_id),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(seq) = self.sequence_id {
            write!(f, "[seq {seq}] {}", self.kind)
        } else {
            write!(f, "{}", self.kind)
        }
    }
}

impl std::error::Error for ParseError {}
