//! Top-level error types for the gateway server.

use thiserror::Error;

use gateway_core::ConnectionError;
use gateway_proto::ProtocolError;

/// Errors surfaced by the connection registry, auth registry, and
/// dispatcher. Connection-scoped; never fatal to the process.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// `send`/`lookup` referenced a connection id the registry has no entry
    /// for. Transient: the connection may have just closed.
    #[error("connection {0} not found")]
    ConnectionNotFound(u64),

    /// The connection's outbound queue was full. The dispatcher decides,
    /// per message class, whether this is survivable (chat) or fatal (auth).
    #[error("outbound queue full for connection {0}")]
    QueueFull(u64),

    /// A frame failed to decode. Connection-fatal; caller must close.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The connection lifecycle state machine rejected an operation.
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Listener bind failed at startup. Process-fatal: exit code 1.
    #[error("failed to bind {addr}: {source}")]
    BindFailed {
        /// The address the listener attempted to bind.
        addr: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Graceful shutdown did not complete within the configured deadline.
    /// Process-fatal: exit code 2.
    #[error("shutdown deadline exceeded with {stragglers} connections still open")]
    ShutdownTimeout {
        /// How many connections were force-closed.
        stragglers: usize,
    },
}
