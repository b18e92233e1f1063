//! Fuzz target: Raw byte decoding
//!
//! Feeds completely random bytes to both frame decoders, whole and split.
//! The decoders must never panic and the byte accounting must always hold.

#![no_main]

use libfuzzer_sys::fuzz_target;
use sqlframe::{FrameLimits, FrameState, Protocol};

fn check(protocol: Protocol, chunks: &[&[u8]]) {
    let mut state = FrameState::with_limits(
        protocol,
        FrameLimits {
            max_payload_len: 4096,
            max_line_len:    4096,
            max_buffer_size: 16384,
        },
    );
    for chunk in chunks {
        if let Ok(decoded) = state.feed(chunk) {
            let covered: usize = decoded.frames.iter().map(|f| f.wire_len).sum();
            assert_eq!(covered, decoded.consumed);
        }
        assert_eq!(
            state.bytes_consumed() + state.residue_len() as u64,
            state.bytes_offered()
        );
    }
}

fuzz_target!(|data: &[u8]| {
    for protocol in [Protocol::LengthPrefixed, Protocol::Line] {
        check(protocol, &[data]);

        // Also try split delivery to test residue handling
        if data.len() > 10 {
            let mid = data.len() / 2;
            check(protocol, &[&data[..mid], &data[mid..]]);
        }
    }
});
