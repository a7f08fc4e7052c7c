//! Dispatcher / router (C6): auth gate, rate gate, auth special-case,
//! pool routing with round-robin + health filtering, and forwarding to the
//! injected downstream capability.
//!
//! Grounded on the general shape of the teacher's `ServerDriver::
//! process_event` (decode incoming event, run a pipeline of checks, return
//! what happened) and `RoomManager`/`Sequencer`'s per-key cached state; the
//! endpoint-health-plus-round-robin content itself is new, since the teacher
//! routes by room membership rather than downstream pool health.

use std::{
    collections::HashMap,
    net::IpAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use bytes::Bytes;
use gateway_proto::{Frame, MessageClass, ERROR_INTERNAL, ERROR_SERVER_BUSY, ERROR_UNAUTHORIZED};

use crate::{
    auth::AuthRegistry, capabilities::AuthCapability, capabilities::SendDownstream,
    ratelimit::RateLimiter, ratelimit::RateScope, registry::ConnectionRegistry,
};

struct Endpoint {
    address: String,
    healthy: bool,
}

struct Pool {
    endpoints: Vec<Endpoint>,
    cursor: AtomicUsize,
}

/// Per-pool ordered endpoint lists with a round-robin cursor, keyed by pool
/// name (`logic`, `chat`, `payment`, ...).
pub struct RouteTable {
    pools: HashMap<String, Mutex<Pool>>,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteTable {
    /// Creates a route table with no pools configured.
    pub fn new() -> Self {
        Self { pools: HashMap::new() }
    }

    /// Registers `pool` with the given endpoint addresses, all initially
    /// marked healthy.
    pub fn configure_pool(&mut self, pool: &str, endpoints: Vec<String>) {
        let endpoints =
            endpoints.into_iter().map(|address| Endpoint { address, healthy: true }).collect();
        self.pools.insert(pool.to_string(), Mutex::new(Pool { endpoints, cursor: AtomicUsize::new(0) }));
    }

    /// Marks `endpoint` in `pool` healthy or unhealthy. Updated out-of-band
    /// by a periodic health check; the dispatcher only ever reads health.
    pub fn mark_healthy(&self, pool: &str, endpoint: &str, healthy: bool) {
        let Some(pool) = self.pools.get(pool) else { return };
        let mut pool = pool.lock().expect("route table mutex poisoned");
        for candidate in &mut pool.endpoints {
            if candidate.address == endpoint {
                candidate.healthy = healthy;
            }
        }
    }

    /// Selects the next healthy endpoint in `pool` via round robin. Returns
    /// `None` if the pool doesn't exist, is empty, or every endpoint in a
    /// full cycle is unhealthy.
    pub fn select(&self, pool: &str) -> Option<String> {
        let pool = self.pools.get(pool)?;
        let pool = pool.lock().expect("route table mutex poisoned");
        if pool.endpoints.is_empty() {
            return None;
        }
        let len = pool.endpoints.len();
        for _ in 0..len {
            let index = pool.cursor.fetch_add(1, Ordering::Relaxed) % len;
            let candidate = &pool.endpoints[index];
            if candidate.healthy {
                return Some(candidate.address.clone());
            }
        }
        None
    }
}

/// What happened to a frame passed through [`Dispatcher::dispatch`].
///
/// Every variant that may produce a reply to the *sender's own connection*
/// (an auth-ok ack or a 9000+ error frame) carries that frame as `reply`
/// instead of sending it directly: only the caller (`gateway_server::
/// manager`) owns the sender's [`gateway_core::Connection`] state machine
/// and its stats handle, so only it can record the write against the right
/// idle clock and counters. Forwards to a downstream pool are the
/// exception — those go straight through [`crate::capabilities::
/// SendDownstream`] since no reply to the sender is involved at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Forwarded to `pool_id`/`endpoint`.
    Dispatched { pool: String, endpoint: String },
    /// A `SystemAuth` frame was processed; `evicted` is the prior
    /// connection's id if a single-device-login eviction occurred (I2).
    /// `reply` is the auth-ok/auth-rejected frame for the sender.
    AuthHandled { accepted: bool, evicted: Option<u64>, reply: Option<Frame> },
    /// Dropped: restricted class on an unauthenticated connection (P8).
    /// `reply` is the optional `ERROR_UNAUTHORIZED` frame for the sender.
    DroppedAuth { reply: Option<Frame> },
    /// Dropped: rejected by the rate limiter at `scope`. `reply` is the
    /// optional `ERROR_SERVER_BUSY` frame for the sender.
    DroppedRate { scope: RateScope, reply: Option<Frame> },
    /// Dropped: no pool configured or no healthy endpoint for this class.
    /// `reply` is the optional `ERROR_INTERNAL` frame for the sender.
    DroppedRoute { reply: Option<Frame> },
}

/// Whether the dispatcher emits an error frame (9000+ range) on a drop, per
/// §7's "class-dependent opt-in" language.
#[derive(Clone, Copy, Debug)]
pub struct DispatcherConfig {
    /// Emit `ERROR_UNAUTHORIZED`/`ERROR_SERVER_BUSY`/`ERROR_INTERNAL` frames
    /// back to the client on the corresponding drop path.
    pub emit_error_frames: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self { emit_error_frames: true }
    }
}

/// Ties the auth registry, rate limiter, route table, and downstream
/// capability together into the five-step pipeline from §4.6.
pub struct Dispatcher<A: AuthCapability, D: SendDownstream> {
    config: DispatcherConfig,
    connections: ConnectionRegistry,
    auth_registry: AuthRegistry,
    rate_limiter: Arc<RateLimiter>,
    routes: RouteTable,
    auth_capability: A,
    downstream: D,
}

impl<A: AuthCapability, D: SendDownstream> Dispatcher<A, D> {
    /// Wires a dispatcher from its five collaborators. `rate_limiter` is an
    /// `Arc` so the supervisor's idle-bucket sweep (§4.4) shares the exact
    /// same buckets the dispatcher charges against, rather than a second,
    /// independently-ticking limiter.
    pub fn new(
        config: DispatcherConfig,
        connections: ConnectionRegistry,
        auth_registry: AuthRegistry,
        rate_limiter: Arc<RateLimiter>,
        routes: RouteTable,
        auth_capability: A,
        downstream: D,
    ) -> Self {
        Self { config, connections, auth_registry, rate_limiter, routes, auth_capability, downstream }
    }

    /// Runs one decoded frame from `conn_id` (accepted from `remote_ip`)
    /// through the five-step pipeline: auth gate, rate gate, auth
    /// special-case, route, forward. Never sends anything to `conn_id`
    /// itself — any reply the sender should receive comes back as
    /// `DispatchOutcome`'s `reply` field for the caller to send and
    /// account for against the owning `Connection` (see the type's doc).
    pub fn dispatch(&self, conn_id: u64, remote_ip: IpAddr, frame: Frame, now_ms: u64) -> DispatchOutcome {
        let class = MessageClass::of(frame.message_type);

        // Step 1: auth gate.
        if !class.is_auth_exempt() && !self.auth_registry.is_authenticated(conn_id) {
            return DispatchOutcome::DroppedAuth { reply: self.error_reply(ERROR_UNAUTHORIZED) };
        }

        // Step 2: rate gate.
        let identity = self.auth_registry.identity_for(conn_id);
        let decision = self.rate_limiter.admit(remote_ip, identity.as_deref(), now_ms);
        if !decision.admitted {
            return DispatchOutcome::DroppedRate {
                scope: decision.rejected_scope.expect("rejected decisions carry a scope"),
                reply: self.error_reply(ERROR_SERVER_BUSY),
            };
        }

        // Step 3: system/auth special case.
        if class == MessageClass::SystemAuth {
            return self.handle_auth_frame(conn_id, &frame, now_ms);
        }

        // Step 4: route.
        let Some(pool) = class.pool_name() else {
            return DispatchOutcome::DroppedRoute { reply: self.error_reply(ERROR_INTERNAL) };
        };

        // Step 5: select endpoint.
        let Some(endpoint) = self.routes.select(pool) else {
            return DispatchOutcome::DroppedRoute { reply: self.error_reply(ERROR_INTERNAL) };
        };

        // Step 6: forward, fire-and-forget.
        self.downstream.send(pool, &endpoint, conn_id, &frame);
        DispatchOutcome::Dispatched { pool: pool.to_string(), endpoint }
    }

    fn handle_auth_frame(&self, conn_id: u64, frame: &Frame, now_ms: u64) -> DispatchOutcome {
        // The wire convention for a `SystemAuth` frame's opaque body: the
        // raw UTF-8 bearer token. Real deployments may parse a richer
        // payload inside their own `AuthCapability`; the dispatcher never
        // interprets more than this.
        let token = String::from_utf8_lossy(&frame.body).to_string();

        let outcome = match self.auth_capability.validate(&token) {
            Ok(Some(outcome)) => outcome,
            _ => {
                return DispatchOutcome::AuthHandled {
                    accepted: false,
                    evicted: None,
                    reply: self.error_reply(ERROR_UNAUTHORIZED),
                };
            },
        };

        let evicted = self.auth_registry.authenticate(conn_id, outcome.identity, token, now_ms);
        if let Some(evicted_conn) = evicted {
            self.connections.close(evicted_conn);
        }

        let reply = Frame::new(gateway_proto::AUTH_OK_MESSAGE_TYPE, 0, now_ms as i64, Bytes::new());
        DispatchOutcome::AuthHandled { accepted: true, evicted, reply: Some(reply) }
    }

    /// Builds the optional 9000+ error frame for a drop path, honoring
    /// `config.emit_error_frames`. Never sends it — see [`DispatchOutcome`].
    fn error_reply(&self, message_type: i32) -> Option<Frame> {
        if !self.config.emit_error_frames {
            return None;
        }
        Some(Frame::new(message_type, 0, 0, Bytes::new()))
    }
}
