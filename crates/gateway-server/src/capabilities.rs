//! Injected capabilities: the external collaborators spec.md §1 and §9 name
//! as out of scope for this gateway, expressed as traits so a real
//! deployment can supply its own identity provider and downstream transport
//! without the gateway knowing anything about either. Grounded in the
//! teacher's `Storage: Clone + Send + Sync + 'static` capability-trait shape
//! (`lockframe-server::storage::Storage`).

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use gateway_proto::Frame;
use tracing::{info, warn};

/// The outcome of a successful auth attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthOutcome {
    /// The identity the token resolved to.
    pub identity: String,
}

/// Validates auth tokens. Token minting/validation is named in spec.md §3 as
/// an injected capability backed by a persistence layer out of scope here.
pub trait AuthCapability: Send + Sync + 'static {
    /// Validates `token`. `Ok(None)` means the token is well-formed but not
    /// recognized (invalid credentials, not a transport failure).
    fn validate(&self, token: &str) -> Result<Option<AuthOutcome>, String>;
}

/// In-memory stand-in for a real identity provider: a fixed token -> identity
/// map. Not a real auth backend — production deployments inject their own
/// [`AuthCapability`] backed by whatever persistence layer issues tokens.
#[derive(Default)]
pub struct StaticAuthenticator {
    tokens: HashMap<String, String>,
}

impl StaticAuthenticator {
    /// Builds an authenticator that accepts exactly the given token/identity
    /// pairs.
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }
}

impl AuthCapability for StaticAuthenticator {
    fn validate(&self, token: &str) -> Result<Option<AuthOutcome>, String> {
        Ok(self.tokens.get(token).map(|identity| AuthOutcome { identity: identity.clone() }))
    }
}

/// Forwards frames to a downstream service pool. The dispatcher (C6) invokes
/// this after routing and endpoint selection; it does not wait for a reply.
/// This is spec.md §4.6's `send_downstream(pool_id, endpoint, conn_id,
/// frame)` capability — the RPC transport itself is out of scope (§9's first
/// open question) and implementers must not invent retry/buffering behavior
/// beyond what is stated.
pub trait SendDownstream: Send + Sync + 'static {
    /// Hands `frame` to `endpoint` in `pool_id`, tagged with the originating
    /// `conn_id` so an asynchronous reply can be routed back via
    /// `ConnectionRegistry::send`.
    fn send(&self, pool_id: &str, endpoint: &str, conn_id: u64, frame: &Frame);
}

/// A [`SendDownstream`] that only logs and counts dispatches. The default
/// wiring for the binary and for tests; real deployments inject their RPC
/// client instead. Cheaply `Clone`-able (the counter is `Arc`-shared) so a
/// test can keep a handle after moving one clone into the [`Dispatcher`](crate::router::Dispatcher).
#[derive(Default, Clone)]
pub struct LoggingDownstream {
    dispatched: Arc<Mutex<u64>>,
    /// `sequence` of every frame handed to [`SendDownstream::send`], in the
    /// order `send` was called — lets tests assert dispatch order, not just
    /// a final count.
    sequences: Arc<Mutex<Vec<i64>>>,
}

impl LoggingDownstream {
    /// Creates a downstream sender with a zeroed dispatch counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total frames handed to [`SendDownstream::send`] so far.
    pub fn dispatched_count(&self) -> u64 {
        *self.dispatched.lock().expect("downstream counter mutex poisoned")
    }

    /// The `sequence` field of every dispatched frame, in dispatch order.
    pub fn dispatched_sequences(&self) -> Vec<i64> {
        self.sequences.lock().expect("downstream sequence mutex poisoned").clone()
    }
}

impl SendDownstream for LoggingDownstream {
    fn send(&self, pool_id: &str, endpoint: &str, conn_id: u64, frame: &Frame) {
        *self.dispatched.lock().expect("downstream counter mutex poisoned") += 1;
        self.sequences.lock().expect("downstream sequence mutex poisoned").push(frame.sequence);
        info!(
            pool_id,
            endpoint,
            conn_id,
            message_type = frame.message_type,
            "dispatched frame downstream"
        );
    }
}

/// Optional write-through mirror of opaque per-connection state to an
/// external cache, for cross-gateway session sharing. Per §9's second open
/// question the source only ever writes and never rehydrates a transport
/// handle from it; this trait intentionally has no read method and no
/// default implementation is wired into the supervisor.
pub trait SessionMirror: Send + Sync + 'static {
    /// Writes an opaque snapshot for `conn_id`. Best-effort: failures are
    /// logged by the implementation, never propagated to the hot path.
    fn put(&self, conn_id: u64, snapshot: &[u8]);
}

/// A [`SessionMirror`] that only logs, for deployments with no external
/// cache wired in yet.
pub struct NoopSessionMirror;

impl SessionMirror for NoopSessionMirror {
    fn put(&self, conn_id: u64, snapshot: &[u8]) {
        warn!(conn_id, bytes = snapshot.len(), "session mirror not configured, dropping write");
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    #[test]
    fn static_authenticator_resolves_known_token() {
        let mut tokens = HashMap::new();
        tokens.insert("tok-1".to_string(), "u1".to_string());
        let auth = StaticAuthenticator::new(tokens);

        assert_eq!(
            auth.validate("tok-1").expect("validate"),
            Some(AuthOutcome { identity: "u1".to_string() })
        );
        assert_eq!(auth.validate("unknown").expect("validate"), None);
    }

    #[test]
    fn logging_downstream_counts_dispatches() {
        let downstream = LoggingDownstream::new();
        let frame = Frame::new(102, 1, 1, Bytes::new());
        downstream.send("logic", "127.0.0.1:9100", 7, &frame);
        downstream.send("logic", "127.0.0.1:9100", 8, &frame);
        assert_eq!(downstream.dispatched_count(), 2);
    }
}
