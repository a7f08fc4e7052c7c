//! Property-based tests for the frame codec's public contract.
//!
//! Complements the in-module proptests in `src/frame.rs` with the
//! rejection property (P3) and larger-body round trips that are more at
//! home as black-box, crate-external tests.

use bytes::Bytes;
use gateway_proto::{Frame, FrameDecoder, MessageClass, DEFAULT_COMPRESS_THRESHOLD, MAX_BODY_BYTES};
use proptest::prelude::*;

fn arbitrary_frame_with_body(max_len: usize) -> impl Strategy<Value = Frame> {
    (
        any::<i32>(),
        any::<i64>(),
        any::<i64>(),
        prop::collection::vec(any::<u8>(), 0..max_len),
    )
        .prop_map(|(message_type, sequence, timestamp_ms, body)| {
            Frame::new(message_type, sequence, timestamp_ms, Bytes::from(body))
        })
}

proptest! {
    /// P1: decode(encode(f)) == f for any body within the size cap.
    #[test]
    fn prop_round_trip_near_compression_threshold(
        frame in arbitrary_frame_with_body(4096),
    ) {
        let mut buf = Vec::new();
        frame.encode(&mut buf, DEFAULT_COMPRESS_THRESHOLD).expect("encode should succeed");
        let decoded = Frame::decode(&buf).expect("decode should succeed");
        prop_assert_eq!(decoded, frame);
    }

    /// P3: any stream whose first four bytes aren't the magic yields
    /// `Malformed` and extracts no frames, regardless of the rest.
    #[test]
    fn prop_bad_magic_never_yields_frames(tail in prop::collection::vec(any::<u8>(), 25..128)) {
        let mut buf = vec![0xDEu8, 0xAD, 0xBE, 0xEF];
        buf.extend(tail);
        let mut decoder = FrameDecoder::new();
        prop_assert!(decoder.push(&buf).is_err());
    }
}

#[test]
fn max_body_frame_round_trips() {
    let body = Bytes::from(vec![9u8; MAX_BODY_BYTES as usize]);
    let frame = Frame::new(1, 1, 1, body.clone());
    let mut buf = Vec::new();
    frame.encode(&mut buf, DEFAULT_COMPRESS_THRESHOLD).expect("encode");
    let decoded = Frame::decode(&buf).expect("decode");
    assert_eq!(decoded.body.len(), body.len());
}

#[test]
fn message_type_drives_classification_end_to_end() {
    let frame = Frame::new(150, 1, 1, Bytes::new());
    assert_eq!(MessageClass::of(frame.message_type), MessageClass::Player);
}
