//! The gateway binary's supporting library: registries, rate limiting,
//! dispatch, connection I/O, and process orchestration.

pub mod auth;
pub mod capabilities;
pub mod config;
pub mod error;
pub mod manager;
pub mod ratelimit;
pub mod registry;
pub mod router;
pub mod stats;
pub mod supervisor;
pub mod system_env;

/// Coarse wall-clock milliseconds since the Unix epoch. Used for rate
/// limiting and auth bookkeeping, which need an epoch-anchored timestamp
/// rather than the opaque `Environment::Instant` used for idle-timeout math.
pub fn current_unix_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
