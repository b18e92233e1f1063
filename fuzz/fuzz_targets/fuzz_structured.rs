//! Fuzz target: Structured packet generation
//!
//! Generates well-formed length-prefixed packets with random commands and
//! statement text using the Arbitrary trait. Frames must come out the same
//! regardless of how the stream is split.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use sqlframe::{FrameState, Protocol, encode_packet};

/// A structured packet for fuzzing
#[derive(Debug, Arbitrary)]
struct FuzzPacket {
    sequence_id: u8,
    command:     u8,
    text:        String,
    /// Emit a zero-length packet instead
    empty:       bool,
}

impl FuzzPacket {
    fn to_bytes(&self) -> Vec<u8> {
        if self.empty {
            return vec![0, 0, 0, self.sequence_id];
        }
        let mut payload = vec![self.command];
        // Keep well under the default payload limit
        payload.extend(self.text.bytes().take(8192));
        encode_packet(self.sequence_id, &payload).unwrap_or_default()
    }
}

#[derive(Debug, Arbitrary)]
struct FuzzStream {
    packets:    Vec<FuzzPacket>,
    chunk_size: u8,
}

fn frames(chunks: impl Iterator<Item = Vec<u8>>) -> Vec<(Vec<u8>, usize)> {
    let mut state = FrameState::new(Protocol::LengthPrefixed);
    let mut out = Vec::new();
    for chunk in chunks {
        let decoded = state.feed(&chunk).expect("well-formed stream");
        assert!(decoded.malformed.is_none());
        out.extend(decoded.frames.into_iter().map(|f| (f.body.to_vec(), f.wire_len)));
    }
    out
}

fuzz_target!(|stream: FuzzStream| {
    let data: Vec<u8> = stream.packets.iter().flat_map(FuzzPacket::to_bytes).collect();
    let chunk_size = usize::from(stream.chunk_size.max(1));

    let whole = frames(std::iter::once(data.clone()));
    let split = frames(data.chunks(chunk_size).map(<[u8]>::to_vec));
    assert_eq!(whole.len(), stream.packets.len());
    assert_eq!(whole, split);
});
