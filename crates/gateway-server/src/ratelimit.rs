//! Token-bucket rate limiter (C4): global, per-IP, and per-identity scopes.
//!
//! No teacher analog exists (the teacher repo has no rate limiting); this is
//! implemented directly against §4.4's pseudocode rather than via an
//! off-the-shelf crate such as `governor` (present in the sibling
//! `gattaca-com-flux` example), because the testable properties (P4-P6)
//! pin down the bucket's exact fractional-token dynamics, which a GCRA-based
//! limiter does not expose. The `Arc<Mutex<...>>`-shared, lazy-insert shape
//! follows the teacher's general "shared registry" idiom
//! (`key_package_registry::KeyPackageRegistry`).

use std::{
    collections::HashMap,
    net::IpAddr,
    sync::Mutex,
};

/// Idle duration after which a per-IP or per-identity bucket is evicted.
pub const DEFAULT_IDLE_EVICTION_MS: u64 = 5 * 60 * 1000;

/// Which scope rejected a frame, for counters and optional error replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateScope {
    /// The process-wide bucket rejected.
    Global,
    /// The source IP's bucket rejected.
    Ip,
    /// The authenticated identity's bucket rejected.
    Identity,
}

/// Outcome of [`RateLimiter::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmitDecision {
    /// Whether every applicable scope admitted the frame.
    pub admitted: bool,
    /// The first scope that rejected, if any. Later scopes are never
    /// charged once an earlier one rejects (§4.4's short-circuit rule).
    pub rejected_scope: Option<RateScope>,
}

/// A single real-valued token bucket. Refill is time-proportional and
/// capped at `capacity`, matching I3.
#[derive(Debug, Clone, Copy)]
struct TokenBucket {
    capacity: f64,
    refill_rate_per_sec: f64,
    tokens: f64,
    last_refill_ms: u64,
    last_access_ms: u64,
}

impl TokenBucket {
    fn new(capacity: f64, refill_rate_per_sec: f64, now_ms: u64) -> Self {
        Self {
            capacity,
            refill_rate_per_sec,
            tokens: capacity,
            last_refill_ms: now_ms,
            last_access_ms: now_ms,
        }
    }

    /// The exact algorithm from §4.4: refill proportional to elapsed time,
    /// capped at capacity, then admit if at least one token is available.
    fn allow(&mut self, now_ms: u64) -> bool {
        let elapsed = now_ms.saturating_sub(self.last_refill_ms);
        if elapsed > 0 {
            let refilled = elapsed as f64 * self.refill_rate_per_sec / 1000.0;
            self.tokens = (self.tokens + refilled).min(self.capacity);
            self.last_refill_ms = now_ms;
        }
        self.last_access_ms = now_ms;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Derives the per-IP and per-identity bucket parameters from the global
/// qps/burst configuration, per §4.4.
#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    /// `limits.global_qps`.
    pub global_qps: u64,
    /// `limits.global_burst`.
    pub global_burst: u64,
}

impl RateLimiterConfig {
    fn ip_capacity(&self) -> f64 {
        (self.global_qps as f64 / 10.0) * 2.0
    }

    fn ip_refill(&self) -> f64 {
        (self.global_qps as f64 / 10.0).max(1.0)
    }

    fn identity_capacity(&self) -> f64 {
        (self.global_qps as f64 / 100.0).max(10.0) * 2.0
    }

    fn identity_refill(&self) -> f64 {
        (self.global_qps as f64 / 100.0).max(10.0)
    }
}

/// The three-scope rate limiter: one global bucket, lazily-created per-IP
/// and per-identity buckets.
pub struct RateLimiter {
    config: RateLimiterConfig,
    global: Mutex<TokenBucket>,
    per_ip: Mutex<HashMap<IpAddr, TokenBucket>>,
    per_identity: Mutex<HashMap<String, TokenBucket>>,
}

impl RateLimiter {
    /// Builds a limiter with its global bucket already initialized (full)
    /// as of `now_ms`.
    pub fn new(config: RateLimiterConfig, now_ms: u64) -> Self {
        let global = TokenBucket::new(config.global_burst as f64, config.global_qps as f64, now_ms);
        Self {
            config,
            global: Mutex::new(global),
            per_ip: Mutex::new(HashMap::new()),
            per_identity: Mutex::new(HashMap::new()),
        }
    }

    /// Evaluates the global -> ip -> identity pipeline, short-circuiting on
    /// the first rejection (I4).
    pub fn admit(&self, ip: IpAddr, identity: Option<&str>, now_ms: u64) -> AdmitDecision {
        if !self.allow_global(now_ms) {
            return AdmitDecision { admitted: false, rejected_scope: Some(RateScope::Global) };
        }
        if !self.allow_ip(ip, now_ms) {
            return AdmitDecision { admitted: false, rejected_scope: Some(RateScope::Ip) };
        }
        if let Some(identity) = identity {
            if !self.allow_identity(identity, now_ms) {
                return AdmitDecision { admitted: false, rejected_scope: Some(RateScope::Identity) };
            }
        }
        AdmitDecision { admitted: true, rejected_scope: None }
    }

    /// Evaluates the global bucket alone.
    pub fn allow_global(&self, now_ms: u64) -> bool {
        self.global.lock().expect("rate limiter mutex poisoned").allow(now_ms)
    }

    /// Evaluates the per-IP bucket, lazily creating it full on first use.
    pub fn allow_ip(&self, ip: IpAddr, now_ms: u64) -> bool {
        let mut buckets = self.per_ip.lock().expect("rate limiter mutex poisoned");
        buckets
            .entry(ip)
            .or_insert_with(|| {
                TokenBucket::new(self.config.ip_capacity(), self.config.ip_refill(), now_ms)
            })
            .allow(now_ms)
    }

    /// Evaluates the per-identity bucket, lazily creating it full on first
    /// use.
    pub fn allow_identity(&self, identity: &str, now_ms: u64) -> bool {
        let mut buckets = self.per_identity.lock().expect("rate limiter mutex poisoned");
        buckets
            .entry(identity.to_string())
            .or_insert_with(|| {
                TokenBucket::new(
                    self.config.identity_capacity(),
                    self.config.identity_refill(),
                    now_ms,
                )
            })
            .allow(now_ms)
    }

    /// Removes per-IP and per-identity buckets idle for more than
    /// `idle_threshold_ms`. The global bucket is never evicted. Intended to
    /// run from a periodic supervisor tick (default every 60s, per §4.4).
    pub fn sweep(&self, now_ms: u64, idle_threshold_ms: u64) {
        self.per_ip
            .lock()
            .expect("rate limiter mutex poisoned")
            .retain(|_, bucket| now_ms.saturating_sub(bucket.last_access_ms) <= idle_threshold_ms);
        self.per_identity
            .lock()
            .expect("rate limiter mutex poisoned")
            .retain(|_, bucket| now_ms.saturating_sub(bucket.last_access_ms) <= idle_threshold_ms);
    }

    /// Current number of live per-IP / per-identity buckets, for the
    /// metrics snapshot.
    pub fn bucket_counts(&self) -> (usize, usize) {
        (
            self.per_ip.lock().expect("rate limiter mutex poisoned").len(),
            self.per_identity.lock().expect("rate limiter mutex poisoned").len(),
        )
    }
}
