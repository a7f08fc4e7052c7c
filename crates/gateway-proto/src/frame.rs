//! The application-layer frame and its streaming decoder.

use bytes::{Bytes, BytesMut};

use crate::{
    error::{ProtocolError, Result},
    header::{FrameHeader, MAX_BODY_BYTES},
};

/// Body size, above which `encode` compresses with Snappy.
pub const DEFAULT_COMPRESS_THRESHOLD: usize = 1024;

/// One application-layer message.
///
/// The body is opaque to the codec; only `message_type` is read by the
/// dispatcher to classify the frame. Equality and round-trip properties are
/// defined over these logical fields, not over whether the wire form was
/// compressed — compression is an encoding detail the codec is free to pick.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Application message type; see [`crate::MessageClass::of`].
    pub message_type: i32,
    /// Per-sender monotonic sequence number.
    pub sequence: i64,
    /// Sender-stamped timestamp, milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    /// Opaque payload, already decompressed if it arrived compressed.
    pub body: Bytes,
}

impl Frame {
    /// Builds a new frame. `body` must already be decompressed and within
    /// [`crate::header::MAX_BODY_BYTES`]; `encode` validates this.
    pub fn new(message_type: i32, sequence: i64, timestamp_ms: i64, body: Bytes) -> Self {
        Self { message_type, sequence, timestamp_ms, body }
    }

    /// Encodes this frame to `dst`, compressing the body with Snappy when it
    /// exceeds `compress_threshold` bytes. Never mutates `self`.
    pub fn encode(&self, dst: &mut Vec<u8>, compress_threshold: usize) -> Result<()> {
        if self.body.len() > MAX_BODY_BYTES as usize {
            return Err(ProtocolError::Oversize {
                size: self.body.len() as i64,
                max: MAX_BODY_BYTES,
            });
        }

        let (compressed, wire_body) = if self.body.len() > compress_threshold {
            let mut encoder = snap::raw::Encoder::new();
            let packed = encoder
                .compress_vec(&self.body)
                .map_err(|e| ProtocolError::DecompressFailed(e.to_string()))?;
            (true, packed)
        } else {
            (false, self.body.to_vec())
        };

        if wire_body.len() > MAX_BODY_BYTES as usize {
            return Err(ProtocolError::Oversize {
                size: wire_body.len() as i64,
                max: MAX_BODY_BYTES,
            });
        }

        let mut header =
            FrameHeader::new(self.message_type, self.sequence, self.timestamp_ms, wire_body.len() as u32);
        header.set_compressed(compressed);

        dst.extend_from_slice(&header.to_bytes());
        dst.extend_from_slice(&wire_body);
        Ok(())
    }

    /// Decodes exactly one frame from the front of `buf`, with no trailing
    /// bytes permitted. Prefer [`FrameDecoder`] for streaming input.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        match decode_one(buf)? {
            Some((frame, consumed)) if consumed == buf.len() => Ok(frame),
            Some(_) => Err(ProtocolError::Malformed("trailing bytes after frame".to_string())),
            None => Err(ProtocolError::Malformed("truncated frame".to_string())),
        }
    }
}

/// Attempts to decode one frame from the front of `buf`.
///
/// Returns `Ok(None)` if `buf` holds fewer than a full header, or a header
/// plus not-yet-complete body — the caller should wait for more bytes. Never
/// consumes a partial frame.
fn decode_one(buf: &[u8]) -> Result<Option<(Frame, usize)>> {
    if buf.len() < FrameHeader::SIZE {
        return Ok(None);
    }
    let header = FrameHeader::from_prefix(buf)?;
    let body_len = header.body_length() as usize;
    let total = FrameHeader::SIZE + body_len;
    if buf.len() < total {
        return Ok(None);
    }

    let raw_body = &buf[FrameHeader::SIZE..total];
    let body = if header.is_compressed() {
        let mut decoder = snap::raw::Decoder::new();
        let decompressed = decoder
            .decompress_vec(raw_body)
            .map_err(|e| ProtocolError::DecompressFailed(e.to_string()))?;
        if decompressed.len() > MAX_BODY_BYTES as usize {
            return Err(ProtocolError::Oversize {
                size: decompressed.len() as i64,
                max: MAX_BODY_BYTES,
            });
        }
        Bytes::from(decompressed)
    } else {
        Bytes::copy_from_slice(raw_body)
    };

    let frame = Frame::new(header.message_type(), header.sequence(), header.timestamp_ms(), body);
    Ok(Some((frame, total)))
}

/// Accumulates bytes off a streaming transport (a TCP socket) and yields
/// complete frames as they become available.
///
/// This is the component the decode contract in §4.1 describes: fed an
/// arbitrary byte buffer containing zero or more complete frames plus a
/// partial tail, it must yield exactly the complete frames and retain the
/// tail for the next call.
#[derive(Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    /// Creates an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bytes currently buffered but not yet forming a whole frame.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Appends newly-read bytes and decodes every complete frame now
    /// available. On the first malformed or oversize frame, the error is
    /// returned and the connection should be closed by the caller — no
    /// further frames are extracted from the offending buffer state.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<Frame>> {
        self.buffer.extend_from_slice(bytes);

        let mut frames = Vec::new();
        loop {
            match decode_one(&self.buffer) {
                Ok(Some((frame, consumed))) => {
                    let _ = self.buffer.split_to(consumed);
                    frames.push(frame);
                },
                Ok(None) => break,
                Err(err) => return Err(err),
            }
        }
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::header::MAGIC;

    fn arbitrary_frame() -> impl Strategy<Value = Frame> {
        (
            any::<i32>(),
            any::<i64>(),
            any::<i64>(),
            prop::collection::vec(any::<u8>(), 0..2048),
        )
            .prop_map(|(message_type, sequence, timestamp_ms, body)| {
                Frame::new(message_type, sequence, timestamp_ms, Bytes::from(body))
            })
    }

    proptest! {
        #[test]
        fn frame_round_trip(frame in arbitrary_frame()) {
            let mut buf = Vec::new();
            frame.encode(&mut buf, DEFAULT_COMPRESS_THRESHOLD).expect("encode");
            let decoded = Frame::decode(&buf).expect("decode");
            prop_assert_eq!(decoded, frame);
        }

        /// P2: any concatenation of encoded frames, split at arbitrary byte
        /// boundaries and fed incrementally, yields exactly the original
        /// sequence and fully consumes the input.
        #[test]
        fn streaming_decode_yields_original_sequence(
            frames in prop::collection::vec(arbitrary_frame(), 0..8),
            split_at in 0usize..64,
        ) {
            let mut wire = Vec::new();
            for frame in &frames {
                frame.encode(&mut wire, DEFAULT_COMPRESS_THRESHOLD).expect("encode");
            }

            let split = split_at.min(wire.len());
            let mut decoder = FrameDecoder::new();
            let mut got = decoder.push(&wire[..split]).expect("push first half");
            got.extend(decoder.push(&wire[split..]).expect("push second half"));

            prop_assert_eq!(got, frames);
            prop_assert_eq!(decoder.buffered_len(), 0);
        }

        #[test]
        fn byte_by_byte_streaming_never_loses_or_duplicates_frames(
            frames in prop::collection::vec(arbitrary_frame(), 0..4),
        ) {
            let mut wire = Vec::new();
            for frame in &frames {
                frame.encode(&mut wire, DEFAULT_COMPRESS_THRESHOLD).expect("encode");
            }

            let mut decoder = FrameDecoder::new();
            let mut got = Vec::new();
            for byte in &wire {
                got.extend(decoder.push(std::slice::from_ref(byte)).expect("push byte"));
            }

            prop_assert_eq!(got, frames);
            prop_assert_eq!(decoder.buffered_len(), 0);
        }
    }

    #[test]
    fn rejects_bad_magic_with_no_frames() {
        let mut buf = vec![0u8; FrameHeader::SIZE];
        buf[..4].copy_from_slice(&(MAGIC ^ 0xFFFF_FFFF).to_be_bytes());
        let mut decoder = FrameDecoder::new();
        assert!(matches!(decoder.push(&buf), Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn rejects_oversize_body_length() {
        let header = FrameHeader::new(1, 1, 1, MAX_BODY_BYTES + 1);
        let mut decoder = FrameDecoder::new();
        assert!(matches!(
            decoder.push(&header.to_bytes()),
            Err(ProtocolError::Oversize { .. })
        ));
    }

    #[test]
    fn short_buffer_yields_zero_frames_and_consumes_nothing() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(&[0u8; 10]).expect("push");
        assert!(frames.is_empty());
        assert_eq!(decoder.buffered_len(), 10);
    }

    #[test]
    fn header_present_but_body_incomplete_waits() {
        let header = FrameHeader::new(1, 1, 1, 10);
        let mut decoder = FrameDecoder::new();
        let mut bytes = header.to_bytes().to_vec();
        bytes.extend_from_slice(&[0u8; 5]); // only half the body
        let frames = decoder.push(&bytes).expect("push");
        assert!(frames.is_empty());
        assert_eq!(decoder.buffered_len(), bytes.len());
    }

    #[test]
    fn large_body_is_compressed_on_encode() {
        let body = Bytes::from(vec![7u8; DEFAULT_COMPRESS_THRESHOLD + 1]);
        let frame = Frame::new(1, 1, 1, body.clone());
        let mut buf = Vec::new();
        frame.encode(&mut buf, DEFAULT_COMPRESS_THRESHOLD).expect("encode");
        let header = FrameHeader::from_prefix(&buf).expect("header");
        assert!(header.is_compressed());
        assert!((header.body_length() as usize) < body.len());

        let decoded = Frame::decode(&buf).expect("decode");
        assert_eq!(decoded.body, body);
    }
}
