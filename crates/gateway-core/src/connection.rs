//! The per-connection lifecycle state machine (part of C5).
//!
//! Pure and I/O-free: callers feed it `now` and events, it returns
//! [`ConnectionAction`]s to execute. The production I/O loop
//! (`gateway_server::manager`) owns the socket and drives this machine;
//! tests drive it with a fake clock with no sleeping involved.

use std::time::Duration;

use bytes::Bytes;
use gateway_proto::{Frame, HEARTBEAT_MESSAGE_TYPE};

use crate::{env::Environment, error::ConnectionError};

/// Default duration without inbound bytes before a connection is closed.
pub const DEFAULT_READ_IDLE: Duration = Duration::from_secs(60);
/// Default duration without outbound bytes before a heartbeat is sent.
pub const DEFAULT_WRITE_IDLE: Duration = Duration::from_secs(30);

/// Lifecycle state, matching the diagram in §4.5 exactly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted but not yet registered with the connection registry.
    Created,
    /// Registered, not yet authenticated.
    Active,
    /// Passed a `SystemAuth` frame; identity bound in the auth registry.
    Authed,
    /// Closing: draining the outbound queue before full teardown.
    Closing,
    /// Fully torn down. Terminal.
    Closed,
}

/// Per-connection idle/heartbeat timing configuration.
#[derive(Clone, Copy, Debug)]
pub struct ConnectionConfig {
    /// No inbound bytes for this long closes the connection.
    pub read_idle: Duration,
    /// No outbound bytes for this long triggers a heartbeat.
    pub write_idle: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self { read_idle: DEFAULT_READ_IDLE, write_idle: DEFAULT_WRITE_IDLE }
    }
}

/// The effect of a state-machine step the I/O loop must carry out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Enqueue this frame for the writer.
    SendFrame(Frame),
    /// Begin the close cascade with this human-readable reason.
    Close {
        /// Why the connection is being closed.
        reason: String,
    },
}

/// The per-connection lifecycle state machine.
pub struct Connection<E: Environment> {
    id: u64,
    state: ConnectionState,
    config: ConnectionConfig,
    last_read_at: E::Instant,
    last_write_at: E::Instant,
}

impl<E: Environment> Connection<E> {
    /// Creates a new connection in `Created` state.
    pub fn new(id: u64, now: E::Instant, config: ConnectionConfig) -> Self {
        Self { id, state: ConnectionState::Created, config, last_read_at: now, last_write_at: now }
    }

    /// The opaque connection id assigned by the accept loop.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether the connection has reached the terminal `Closed` state.
    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    /// `Created` -> `Active`, once the connection is registered with C2.
    pub fn activate(&mut self) -> Result<(), ConnectionError> {
        if self.state != ConnectionState::Created {
            return Err(ConnectionError::InvalidState {
                state: self.state,
                operation: "activate".to_string(),
            });
        }
        self.state = ConnectionState::Active;
        Ok(())
    }

    /// `Active` -> `Authed`, once C3 accepts the identity.
    pub fn mark_authenticated(&mut self) -> Result<(), ConnectionError> {
        if self.state != ConnectionState::Active {
            return Err(ConnectionError::InvalidState {
                state: self.state,
                operation: "mark_authenticated".to_string(),
            });
        }
        self.state = ConnectionState::Authed;
        Ok(())
    }

    /// Records that bytes were read from the socket at `now`.
    pub fn record_read(&mut self, now: E::Instant) {
        self.last_read_at = now;
    }

    /// Records that bytes were written to the socket at `now`.
    pub fn record_write(&mut self, now: E::Instant) {
        self.last_write_at = now;
    }

    /// Begins the close cascade. Idempotent: closing an already-closing or
    /// already-closed connection is a no-op, matching §4.5's "close is
    /// idempotent" requirement.
    pub fn begin_close(&mut self) {
        if matches!(self.state, ConnectionState::Closing | ConnectionState::Closed) {
            return;
        }
        self.state = ConnectionState::Closing;
    }

    /// `Closing` -> `Closed`, once the writer has drained (or the drain
    /// deadline elapsed).
    pub fn finish_close(&mut self) -> Result<(), ConnectionError> {
        if self.state != ConnectionState::Closing {
            return Err(ConnectionError::InvalidState {
                state: self.state,
                operation: "finish_close".to_string(),
            });
        }
        self.state = ConnectionState::Closed;
        Ok(())
    }

    /// Periodic tick: checks read-idle, then write-idle. Returns the actions
    /// the I/O loop must perform. Once `Closing`/`Closed`, always returns
    /// nothing — the I/O loop owns teardown from that point on.
    pub fn tick(&mut self, now: E::Instant) -> Vec<ConnectionAction> {
        if matches!(self.state, ConnectionState::Closing | ConnectionState::Closed) {
            return Vec::new();
        }

        let idle = now - self.last_read_at;
        if idle >= self.config.read_idle {
            self.begin_close();
            return vec![ConnectionAction::Close {
                reason: format!("read idle timeout after {idle:?}"),
            }];
        }

        let write_idle = now - self.last_write_at;
        if write_idle >= self.config.write_idle {
            self.last_write_at = now;
            let heartbeat = Frame::new(HEARTBEAT_MESSAGE_TYPE, 0, 0, Bytes::new());
            return vec![ConnectionAction::SendFrame(heartbeat)];
        }

        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        cell::Cell,
        sync::{Arc, Mutex},
        time::Duration,
    };

    use super::*;

    /// A fake clock advanced explicitly by tests, with deterministic
    /// "randomness" (sequential counter) so assertions are reproducible.
    #[derive(Clone)]
    struct TestEnv {
        now: Arc<Mutex<Duration>>,
        counter: Arc<Mutex<u64>>,
    }

    impl TestEnv {
        fn new() -> Self {
            Self { now: Arc::new(Mutex::new(Duration::ZERO)), counter: Arc::new(Mutex::new(0)) }
        }

        fn advance(&self, by: Duration) -> Duration {
            let mut now = self.now.lock().expect("lock");
            *now += by;
            *now
        }
    }

    impl Environment for TestEnv {
        type Instant = Duration;

        fn now(&self) -> Self::Instant {
            *self.now.lock().expect("lock")
        }

        async fn sleep(&self, _duration: Duration) {}

        fn random_bytes(&self, buffer: &mut [u8]) {
            let mut counter = self.counter.lock().expect("lock");
            for byte in buffer.iter_mut() {
                *byte = (*counter % 256) as u8;
                *counter += 1;
            }
        }
    }

    fn conn_at(env: &TestEnv, config: ConnectionConfig) -> Connection<TestEnv> {
        Connection::new(1, env.now(), config)
    }

    #[test]
    fn lifecycle_happy_path() {
        let env = TestEnv::new();
        let mut conn = conn_at(&env, ConnectionConfig::default());
        assert_eq!(conn.state(), ConnectionState::Created);

        conn.activate().expect("activate");
        assert_eq!(conn.state(), ConnectionState::Active);

        conn.mark_authenticated().expect("authenticate");
        assert_eq!(conn.state(), ConnectionState::Authed);

        conn.begin_close();
        assert_eq!(conn.state(), ConnectionState::Closing);

        conn.finish_close().expect("finish_close");
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(conn.is_closed());
    }

    #[test]
    fn cannot_authenticate_before_active() {
        let env = TestEnv::new();
        let mut conn = conn_at(&env, ConnectionConfig::default());
        assert!(conn.mark_authenticated().is_err());
    }

    #[test]
    fn close_is_idempotent() {
        let env = TestEnv::new();
        let mut conn = conn_at(&env, ConnectionConfig::default());
        conn.activate().expect("activate");
        conn.begin_close();
        conn.begin_close();
        conn.begin_close();
        assert_eq!(conn.state(), ConnectionState::Closing);
    }

    #[test]
    fn finish_close_requires_closing_state() {
        let env = TestEnv::new();
        let mut conn = conn_at(&env, ConnectionConfig::default());
        assert!(conn.finish_close().is_err());
    }

    /// P10: a connection with no inbound bytes for `read_idle` transitions
    /// to closing (and is reported for close) within `read_idle + 1s`.
    #[test]
    fn idle_tick_closes_connection() {
        let env = TestEnv::new();
        let config = ConnectionConfig { read_idle: Duration::from_secs(60), ..Default::default() };
        let mut conn = conn_at(&env, config);
        conn.activate().expect("activate");

        let now = env.advance(Duration::from_secs(59));
        assert!(conn.tick(now).is_empty());
        assert_eq!(conn.state(), ConnectionState::Active);

        let now = env.advance(Duration::from_secs(2));
        let actions = conn.tick(now);
        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0], ConnectionAction::Close { .. }));
        assert_eq!(conn.state(), ConnectionState::Closing);
    }

    #[test]
    fn write_idle_emits_heartbeat_not_close() {
        let env = TestEnv::new();
        let config = ConnectionConfig {
            read_idle: Duration::from_secs(600),
            write_idle: Duration::from_secs(30),
        };
        let mut conn = conn_at(&env, config);
        conn.activate().expect("activate");

        let now = env.advance(Duration::from_secs(31));
        let actions = conn.tick(now);
        assert_eq!(actions.len(), 1);
        match &actions[0] {
            ConnectionAction::SendFrame(frame) => {
                assert_eq!(frame.message_type, HEARTBEAT_MESSAGE_TYPE);
            },
            other => panic!("expected heartbeat, got {other:?}"),
        }
        assert_eq!(conn.state(), ConnectionState::Active);
    }

    #[test]
    fn reading_resets_idle_clock() {
        let env = TestEnv::new();
        let config = ConnectionConfig { read_idle: Duration::from_secs(60), ..Default::default() };
        let mut conn = conn_at(&env, config);
        conn.activate().expect("activate");

        let now = env.advance(Duration::from_secs(59));
        conn.record_read(now);
        let now = env.advance(Duration::from_secs(59));
        assert!(conn.tick(now).is_empty());
        assert_eq!(conn.state(), ConnectionState::Active);
    }

    #[test]
    fn ticking_a_closing_connection_is_a_no_op() {
        let env = TestEnv::new();
        let mut conn = conn_at(&env, ConnectionConfig::default());
        conn.activate().expect("activate");
        conn.begin_close();
        let now = env.advance(Duration::from_secs(1000));
        assert!(conn.tick(now).is_empty());
        assert_eq!(conn.state(), ConnectionState::Closing);
    }

    #[test]
    fn random_bytes_fills_whole_buffer() {
        let env = TestEnv::new();
        let mut buf = [0u8; 16];
        let before = Cell::new(buf);
        env.random_bytes(&mut buf);
        assert_ne!(buf, before.get());
    }
}
