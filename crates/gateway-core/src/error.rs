//! Error types for the connection lifecycle state machine.

use std::time::Duration;

use thiserror::Error;

use crate::connection::ConnectionState;

/// Errors produced by [`crate::connection::Connection`] operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Attempted an operation invalid for the current state.
    #[error("invalid state transition: cannot {operation} from {state:?}")]
    InvalidState {
        /// State the connection was in when the operation was attempted.
        state: ConnectionState,
        /// The operation that was attempted.
        operation: String,
    },

    /// No inbound bytes for `read_idle`; connection-fatal.
    #[error("read idle timeout after {elapsed:?}")]
    ReadIdleTimeout {
        /// How long the connection was idle on read.
        elapsed: Duration,
    },

    /// Wraps a protocol-level decode failure (always connection-fatal).
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ConnectionError {
    /// Whether this error is transient (the connection simply aged out, as
    /// opposed to a peer sending something structurally invalid). Both kinds
    /// are connection-fatal; this only affects how they are logged/counted.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ReadIdleTimeout { .. })
    }
}

impl From<gateway_proto::ProtocolError> for ConnectionError {
    fn from(err: gateway_proto::ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_timeout_is_transient() {
        assert!(ConnectionError::ReadIdleTimeout { elapsed: Duration::from_secs(61) }
            .is_transient());
    }

    #[test]
    fn protocol_and_state_errors_are_not_transient() {
        assert!(!ConnectionError::Protocol("bad magic".to_string()).is_transient());
        assert!(!ConnectionError::InvalidState {
            state: ConnectionState::Created,
            operation: "auth".to_string(),
        }
        .is_transient());
    }
}
