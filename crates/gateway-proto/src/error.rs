//! Protocol-level error types.

use thiserror::Error;

/// Errors produced while encoding or decoding frames.
///
/// All variants are connection-fatal per §7 of the wire spec: a peer that
/// produces one of these must have its connection closed by the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Bad magic, negative length, or any other structurally broken header.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// Declared or decompressed body size exceeds the configured maximum.
    #[error("oversize frame: {size} bytes exceeds max {max}")]
    Oversize {
        /// The offending size (may be the declared body length, which can
        /// read as negative on the wire before validation).
        size: i64,
        /// The configured maximum, in bytes.
        max: u32,
    },

    /// Declared-compressed body failed to decompress.
    #[error("decompress failed: {0}")]
    DecompressFailed(String),
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, ProtocolError>;
