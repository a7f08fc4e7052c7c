//! Well-known `message_type` values the gateway itself produces or consumes,
//! as opposed to application message types which are opaque to this crate.

/// System keep-alive frame, sent by the connection manager on write-idle.
pub const HEARTBEAT_MESSAGE_TYPE: i32 = 1;

/// Sent in response to a successful `SystemAuth` frame.
pub const AUTH_OK_MESSAGE_TYPE: i32 = 3;

/// A non-auth frame arrived on an unauthenticated connection.
pub const ERROR_UNAUTHORIZED: i32 = 9002;

/// A frame was rejected by the rate limiter.
pub const ERROR_SERVER_BUSY: i32 = 9003;

/// Routing failed: no pool configured, or no healthy endpoint.
pub const ERROR_INTERNAL: i32 = 9999;
