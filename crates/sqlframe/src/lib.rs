// Statement protocol framing crate
// Reassembles protocol frames from arbitrarily split or coalesced byte buffers

mod decode;
mod frame;
mod state;


#[cfg(feature = "tracing")]
macro_rules! trace_warn {
    ($($arg:tt)*) => { ::tracing::warn!($($arg)*) }
}
#[cfg(not(feature = "tracing"))]
macro_rules! trace_warn {
    ($($arg:tt)*) => {};
}
pub(crate) use trace_warn;

#[cfg(feature = "tracing")]
macro_rules! trace_debug {
    ($($arg:tt)*) => { ::tracing::debug!($($arg)*) }
}
#[cfg(not(feature = "tracing"))]
macro_rules! trace_debug {
    ($($arg:tt)*) => {};
}
pub(crate) use trace_debug;

pub use decode::{
    Decoded, FrameDecoder, LengthPrefixedDecoder, LineDecoder, Malformed, WireDecoder,
    decode_frames,
};
pub use frame::{
    CRLF, Frame, FrameHeader, MAX_PACKET_PAYLOAD, PACKET_HEADER_SIZE, PacketHeader,
    encode_packet, parse_packet_header,
};
pub use state::{
    DecodePhase, FrameLimits, FrameState, InvalidLimits, ParseError, ParseErrorKind, Protocol,
    UnknownProtocol,
};
