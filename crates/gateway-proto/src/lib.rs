//! Wire framing for the game gateway: the 29-byte frame header, the
//! streaming frame decoder, and message-type classification.
//!
//! This crate has no I/O and no async runtime dependency — it is pure
//! encode/decode logic so it can be fuzzed and property-tested in isolation.

mod constants;
mod error;
mod frame;
mod header;
mod message_class;

pub use constants::{
    AUTH_OK_MESSAGE_TYPE, ERROR_INTERNAL, ERROR_SERVER_BUSY, ERROR_UNAUTHORIZED,
    HEARTBEAT_MESSAGE_TYPE,
};
pub use error::{ProtocolError, Result};
pub use frame::{Frame, FrameDecoder, DEFAULT_COMPRESS_THRESHOLD};
pub use header::{FrameHeader, FLAG_COMPRESSED, MAGIC, MAX_BODY_BYTES};
pub use message_class::MessageClass;
