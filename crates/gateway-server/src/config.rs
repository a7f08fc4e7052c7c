//! Flat configuration, loaded from environment variables per §6.
//!
//! File-based config loading is an external collaborator (spec.md §1) — this
//! module only defines the typed keys and their defaults; a deployment's
//! file-to-env bridge is expected to set the same variable names before the
//! binary starts.

use std::{net::SocketAddr, time::Duration};

/// All tunable gateway behavior, loaded once at startup.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// `listen.addr` / `GATEWAY_LISTEN_ADDR`.
    pub listen_addr: SocketAddr,
    /// `limits.max_connections` / `GATEWAY_MAX_CONNECTIONS`.
    pub max_connections: usize,
    /// `limits.global_qps` / `GATEWAY_GLOBAL_QPS`.
    pub global_qps: u64,
    /// `limits.global_burst` / `GATEWAY_GLOBAL_BURST`.
    pub global_burst: u64,
    /// `timeouts.read_idle_sec` / `GATEWAY_READ_IDLE_SEC`.
    pub read_idle: Duration,
    /// `timeouts.write_idle_sec` / `GATEWAY_WRITE_IDLE_SEC`.
    pub write_idle: Duration,
    /// `timeouts.shutdown_sec` / `GATEWAY_SHUTDOWN_SEC`.
    pub shutdown_deadline: Duration,
    /// `frame.max_body_bytes` / `GATEWAY_MAX_BODY_BYTES`.
    pub max_body_bytes: u32,
    /// `frame.compress_threshold` / `GATEWAY_COMPRESS_THRESHOLD`.
    pub compress_threshold: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8090".parse().expect("valid default address"),
            max_connections: 100_000,
            global_qps: 10_000,
            global_burst: 20_000,
            read_idle: Duration::from_secs(60),
            write_idle: Duration::from_secs(30),
            shutdown_deadline: Duration::from_secs(30),
            max_body_bytes: 10 * 1024 * 1024,
            compress_threshold: 1024,
        }
    }
}

impl GatewayConfig {
    /// Loads configuration from environment variables, falling back to
    /// defaults for anything unset. Malformed values fall back to the
    /// default rather than panicking — an invalid env var should not be
    /// able to take the whole process down before logging is even set up.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            listen_addr: env_parse("GATEWAY_LISTEN_ADDR", defaults.listen_addr),
            max_connections: env_parse("GATEWAY_MAX_CONNECTIONS", defaults.max_connections),
            global_qps: env_parse("GATEWAY_GLOBAL_QPS", defaults.global_qps),
            global_burst: env_parse("GATEWAY_GLOBAL_BURST", defaults.global_burst),
            read_idle: env_parse_secs("GATEWAY_READ_IDLE_SEC", defaults.read_idle),
            write_idle: env_parse_secs("GATEWAY_WRITE_IDLE_SEC", defaults.write_idle),
            shutdown_deadline: env_parse_secs("GATEWAY_SHUTDOWN_SEC", defaults.shutdown_deadline),
            max_body_bytes: env_parse("GATEWAY_MAX_BODY_BYTES", defaults.max_body_bytes),
            compress_threshold: env_parse("GATEWAY_COMPRESS_THRESHOLD", defaults.compress_threshold),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|value| value.parse().ok()).unwrap_or(default)
}

fn env_parse_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = GatewayConfig::default();
        assert_eq!(config.listen_addr.port(), 8090);
        assert_eq!(config.max_connections, 100_000);
        assert_eq!(config.global_qps, 10_000);
        assert_eq!(config.global_burst, 20_000);
        assert_eq!(config.read_idle, Duration::from_secs(60));
        assert_eq!(config.write_idle, Duration::from_secs(30));
        assert_eq!(config.shutdown_deadline, Duration::from_secs(30));
        assert_eq!(config.max_body_bytes, 10 * 1024 * 1024);
        assert_eq!(config.compress_threshold, 1024);
    }

    #[test]
    fn env_parse_falls_back_on_malformed_value() {
        // SAFETY: test runs single-threaded with respect to this var.
        unsafe { std::env::set_var("GATEWAY_TEST_MALFORMED", "not-a-number") };
        let value: u64 = env_parse("GATEWAY_TEST_MALFORMED", 42);
        assert_eq!(value, 42);
        unsafe { std::env::remove_var("GATEWAY_TEST_MALFORMED") };
    }
}
