//! The 29-byte frame header.
//!
//! Every field is stored as a raw big-endian byte array so the in-memory
//! layout matches the wire layout exactly and the header can be cast
//! zero-copy out of an untrusted buffer via `zerocopy`.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::{ProtocolError, Result};

/// Magic constant identifying the start of a frame.
pub const MAGIC: u32 = 0x1234_5678;

/// Bit0 of `flags`: body is Snappy-compressed.
pub const FLAG_COMPRESSED: u8 = 0b0000_0001;

/// Maximum decoded body size, in bytes (10 MiB).
pub const MAX_BODY_BYTES: u32 = 10 * 1024 * 1024;

/// On-wire frame header. Field order and sizes match §4.1 of the wire spec
/// exactly: magic(4) + message_type(4) + sequence(8) + timestamp_ms(8) +
/// flags(1) + body_length(4) = 29 bytes.
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct FrameHeader {
    magic: [u8; 4],
    message_type: [u8; 4],
    sequence: [u8; 8],
    timestamp_ms: [u8; 8],
    flags: [u8; 1],
    body_length: [u8; 4],
}

impl FrameHeader {
    /// Size of the header on the wire, in bytes.
    pub const SIZE: usize = 29;

    /// Builds a header for a frame about to be sent.
    pub fn new(message_type: i32, sequence: i64, timestamp_ms: i64, body_len: u32) -> Self {
        Self {
            magic: MAGIC.to_be_bytes(),
            message_type: message_type.to_be_bytes(),
            sequence: sequence.to_be_bytes(),
            timestamp_ms: timestamp_ms.to_be_bytes(),
            flags: [0],
            body_length: body_len.to_be_bytes(),
        }
    }

    /// Marks this header's body as Snappy-compressed.
    pub fn set_compressed(&mut self, compressed: bool) {
        if compressed {
            self.flags[0] |= FLAG_COMPRESSED;
        } else {
            self.flags[0] &= !FLAG_COMPRESSED;
        }
    }

    /// Casts a validated header out of the front of `bytes`.
    ///
    /// Validates magic, then the body length bound, cheapest checks first.
    /// Does not look at whether `bytes` actually contains the full body —
    /// callers needing streaming semantics use [`crate::frame::FrameDecoder`].
    pub fn from_prefix(bytes: &[u8]) -> Result<&Self> {
        if bytes.len() < Self::SIZE {
            return Err(ProtocolError::Malformed(format!(
                "buffer too short for header: {} < {}",
                bytes.len(),
                Self::SIZE
            )));
        }
        let (header, _rest) = Self::ref_from_prefix(bytes)
            .map_err(|_| ProtocolError::Malformed("header cast failed".to_string()))?;
        if header.magic() != MAGIC {
            return Err(ProtocolError::Malformed(format!(
                "bad magic: {:#010x}",
                header.magic()
            )));
        }
        let len = header.body_length_raw();
        if len < 0 || len as u32 > MAX_BODY_BYTES {
            return Err(ProtocolError::Oversize {
                size: len as i64,
                max: MAX_BODY_BYTES,
            });
        }
        Ok(header)
    }

    /// Serializes this header to its 29-byte wire form.
    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[..Self::SIZE].copy_from_slice(self.as_bytes());
        out
    }

    /// Magic value as read off the wire.
    pub fn magic(&self) -> u32 {
        u32::from_be_bytes(self.magic)
    }

    /// Application message type. Determines [`crate::MessageClass`].
    pub fn message_type(&self) -> i32 {
        i32::from_be_bytes(self.message_type)
    }

    /// Per-sender monotonic sequence number.
    pub fn sequence(&self) -> i64 {
        i64::from_be_bytes(self.sequence)
    }

    /// Sender-stamped timestamp, milliseconds since the Unix epoch.
    pub fn timestamp_ms(&self) -> i64 {
        i64::from_be_bytes(self.timestamp_ms)
    }

    /// Raw flags byte.
    pub fn flags(&self) -> u8 {
        self.flags[0]
    }

    /// Whether bit0 of `flags` (compressed) is set.
    pub fn is_compressed(&self) -> bool {
        self.flags[0] & FLAG_COMPRESSED != 0
    }

    /// Body length as transmitted (signed, per the wire layout).
    fn body_length_raw(&self) -> i64 {
        i32::from_be_bytes(self.body_length) as i64
    }

    /// Body length, already validated to be within bounds.
    pub fn body_length(&self) -> u32 {
        self.body_length_raw() as u32
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn arbitrary_header() -> impl Strategy<Value = FrameHeader> {
        (any::<i32>(), any::<i64>(), any::<i64>(), 0u32..MAX_BODY_BYTES).prop_map(
            |(message_type, sequence, timestamp_ms, body_len)| {
                FrameHeader::new(message_type, sequence, timestamp_ms, body_len)
            },
        )
    }

    proptest! {
        #[test]
        fn header_round_trip(header in arbitrary_header()) {
            let bytes = header.to_bytes();
            let decoded = FrameHeader::from_prefix(&bytes).expect("from_prefix should succeed");
            prop_assert_eq!(*decoded, header);
        }
    }

    #[test]
    fn header_size() {
        assert_eq!(FrameHeader::SIZE, 29);
    }

    #[test]
    fn reject_short_buffer() {
        let buf = [0u8; 10];
        assert!(matches!(
            FrameHeader::from_prefix(&buf),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn reject_invalid_magic() {
        let header = FrameHeader::new(1, 1, 1, 0);
        let mut bytes = header.to_bytes();
        bytes[0] ^= 0xFF;
        assert!(matches!(
            FrameHeader::from_prefix(&bytes),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn reject_oversize_body_length() {
        let header = FrameHeader::new(1, 1, 1, MAX_BODY_BYTES + 1);
        let bytes = header.to_bytes();
        assert!(matches!(
            FrameHeader::from_prefix(&bytes),
            Err(ProtocolError::Oversize { .. })
        ));
    }

    #[test]
    fn reject_negative_body_length() {
        let mut header = FrameHeader::new(1, 1, 1, 0);
        header.body_length = (-1i32).to_be_bytes();
        let bytes = header.to_bytes();
        assert!(matches!(
            FrameHeader::from_prefix(&bytes),
            Err(ProtocolError::Oversize { .. })
        ));
    }

    #[test]
    fn compressed_flag_round_trips() {
        let mut header = FrameHeader::new(1, 1, 1, 0);
        assert!(!header.is_compressed());
        header.set_compressed(true);
        assert!(header.is_compressed());
        header.set_compressed(false);
        assert!(!header.is_compressed());
    }
}
