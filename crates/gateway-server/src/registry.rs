//! Connection registry (C2): connection-id -> transport handle, and back.
//!
//! Grounded on `ConnectionRegistry` from the teacher's session/room registry:
//! the same `Arc<Mutex<Inner>>`-shared, cheaply-`Clone`-able shape, here
//! mapping connection ids to a bounded outbound queue instead of a session to
//! a set of rooms.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use gateway_proto::Frame;
use tokio::{
    sync::{mpsc, watch},
    task::AbortHandle,
};

/// Outbound queue depth for a single connection's writer.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Why [`ConnectionRegistry::send`] failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// No connection with that id is registered.
    NotFound,
    /// The connection's writer has already shut down.
    Closed,
    /// The connection's outbound queue is at capacity.
    QueueFull,
}

/// What the registry holds for each live connection: enough to reach its
/// writer task, never the socket itself — the connection manager retains
/// exclusive ownership of the transport (§9's cyclic-reference note).
struct Entry {
    remote_addr: SocketAddr,
    outbound: mpsc::Sender<Frame>,
    close: watch::Sender<bool>,
    /// Reader/writer task handles, attached once the manager spawns them.
    /// Used only by [`ConnectionRegistry::force_close_stragglers`] to abort
    /// a connection that ignored its cooperative close signal.
    tasks: Option<(AbortHandle, AbortHandle)>,
}

struct Inner {
    next_id: u64,
    connections: HashMap<u64, Entry>,
}

/// Maps `ConnectionID -> transport handle` and supports targeted send,
/// broadcast, and a coordinated close-all for shutdown.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<Mutex<Inner>>,
    active: Arc<AtomicU64>,
}

/// Receivers the caller (the connection manager) needs to actually drive
/// the connection's writer and watch for a close request.
pub struct Registration {
    /// The newly assigned, process-unique connection id (I5).
    pub id: u64,
    /// The writer task's end of the outbound queue.
    pub outbound: mpsc::Receiver<Frame>,
    /// Signals `true` once the registry requests this connection close.
    pub close: watch::Receiver<bool>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    /// Creates an empty registry. IDs are assigned starting at 1 and are
    /// never reused for the lifetime of this registry (I5).
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner { next_id: 1, connections: HashMap::new() })),
            active: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Registers a newly accepted connection and returns its id plus the
    /// receivers needed to drive it.
    pub fn register(&self, remote_addr: SocketAddr) -> Registration {
        let (outbound_tx, outbound_rx) = mpsc::channel(DEFAULT_QUEUE_CAPACITY);
        let (close_tx, close_rx) = watch::channel(false);

        let mut inner = self.inner.lock().expect("registry mutex poisoned");
        let id = inner.next_id;
        inner.next_id += 1;
        inner
            .connections
            .insert(id, Entry { remote_addr, outbound: outbound_tx, close: close_tx, tasks: None });
        drop(inner);

        self.active.fetch_add(1, Ordering::Relaxed);
        Registration { id, outbound: outbound_rx, close: close_rx }
    }

    /// Records the reader/writer task handles for an already-registered
    /// connection, so a future [`ConnectionRegistry::force_close_stragglers`]
    /// can actually abort them. No-op if the connection is already gone.
    pub fn attach_tasks(&self, id: u64, reader: AbortHandle, writer: AbortHandle) {
        let mut inner = self.inner.lock().expect("registry mutex poisoned");
        if let Some(entry) = inner.connections.get_mut(&id) {
            entry.tasks = Some((reader, writer));
        }
    }

    /// Removes a connection. No-op if absent (already unregistered).
    pub fn unregister(&self, id: u64) {
        let mut inner = self.inner.lock().expect("registry mutex poisoned");
        if inner.connections.remove(&id).is_some() {
            drop(inner);
            self.active.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// The remote address a connection was accepted from, if still live.
    pub fn remote_addr(&self, id: u64) -> Option<SocketAddr> {
        let inner = self.inner.lock().expect("registry mutex poisoned");
        inner.connections.get(&id).map(|entry| entry.remote_addr)
    }

    /// Enqueues `frame` for connection `id`'s writer. Never blocks: a full
    /// queue fails fast with [`SendError::QueueFull`] so one slow peer can
    /// never stall the caller.
    pub fn send(&self, id: u64, frame: Frame) -> Result<(), SendError> {
        let inner = self.inner.lock().expect("registry mutex poisoned");
        let Some(entry) = inner.connections.get(&id) else {
            return Err(SendError::NotFound);
        };
        match entry.outbound.try_send(frame) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(SendError::QueueFull),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SendError::Closed),
        }
    }

    /// Enqueues `frame` on every currently-registered connection. Returns
    /// the number that accepted it; per-connection failures are swallowed,
    /// matching the registry contract (broadcast never raises for one dead
    /// peer).
    pub fn broadcast(&self, frame: &Frame) -> usize {
        let inner = self.inner.lock().expect("registry mutex poisoned");
        inner
            .connections
            .values()
            .filter(|entry| entry.outbound.try_send(frame.clone()).is_ok())
            .count()
    }

    /// Signals a single connection to begin closing, e.g. the loser of a
    /// single-device-login race (I2). No-op if the connection is already
    /// gone.
    pub fn close(&self, id: u64) {
        let inner = self.inner.lock().expect("registry mutex poisoned");
        if let Some(entry) = inner.connections.get(&id) {
            let _ = entry.close.send(true);
        }
    }

    /// Signals every registered connection to begin closing. Does not wait
    /// for drains to complete — that is the connection manager's job.
    pub fn close_all(&self) {
        let inner = self.inner.lock().expect("registry mutex poisoned");
        for entry in inner.connections.values() {
            let _ = entry.close.send(true);
        }
    }

    /// Number of currently registered (non-closed) connections (I1).
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Relaxed) as usize
    }

    /// Aborts the reader/writer tasks of every still-registered connection
    /// and removes it from the registry, for stragglers that ignored
    /// [`ConnectionRegistry::close_all`]'s cooperative signal past the
    /// shutdown deadline. Returns the ids that were force-closed, so the
    /// caller can also deauthenticate them. A connection registered before
    /// its tasks were attached (a narrow startup race) is removed but has
    /// nothing to abort.
    pub fn force_close_stragglers(&self) -> Vec<u64> {
        let mut inner = self.inner.lock().expect("registry mutex poisoned");
        let ids: Vec<u64> = inner.connections.keys().copied().collect();
        for id in &ids {
            if let Some(entry) = inner.connections.remove(id) {
                if let Some((reader, writer)) = entry.tasks {
                    reader.abort();
                    writer.abort();
                }
            }
        }
        drop(inner);
        self.active.fetch_sub(ids.len() as u64, Ordering::Relaxed);
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:9000".parse().expect("valid address")
    }

    fn frame() -> Frame {
        Frame::new(1, 1, 1, bytes::Bytes::new())
    }

    #[test]
    fn register_assigns_increasing_ids() {
        let registry = ConnectionRegistry::new();
        let first = registry.register(addr());
        let second = registry.register(addr());
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_eq!(registry.active_count(), 2);
    }

    #[test]
    fn unregister_is_a_no_op_for_unknown_id() {
        let registry = ConnectionRegistry::new();
        registry.unregister(999);
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn unregister_decrements_active_count() {
        let registry = ConnectionRegistry::new();
        let reg = registry.register(addr());
        assert_eq!(registry.active_count(), 1);
        registry.unregister(reg.id);
        assert_eq!(registry.active_count(), 0);
        assert!(registry.remote_addr(reg.id).is_none());
    }

    #[test]
    fn send_to_unknown_id_fails_not_found() {
        let registry = ConnectionRegistry::new();
        assert_eq!(registry.send(42, frame()), Err(SendError::NotFound));
    }

    #[test]
    fn send_delivers_into_outbound_queue() {
        let registry = ConnectionRegistry::new();
        let mut reg = registry.register(addr());
        registry.send(reg.id, frame()).expect("send");
        let received = reg.outbound.try_recv().expect("frame delivered");
        assert_eq!(received.message_type, 1);
    }

    #[test]
    fn send_reports_queue_full_without_blocking() {
        let registry = ConnectionRegistry::new();
        let reg = registry.register(addr());
        for _ in 0..DEFAULT_QUEUE_CAPACITY {
            registry.send(reg.id, frame()).expect("send should fit in queue");
        }
        assert_eq!(registry.send(reg.id, frame()), Err(SendError::QueueFull));
    }

    #[test]
    fn broadcast_counts_only_live_connections() {
        let registry = ConnectionRegistry::new();
        let _a = registry.register(addr());
        let _b = registry.register(addr());
        let delivered = registry.broadcast(&frame());
        assert_eq!(delivered, 2);
    }

    #[test]
    fn broadcast_after_unregister_only_reaches_remaining() {
        let registry = ConnectionRegistry::new();
        let a = registry.register(addr());
        let _b = registry.register(addr());
        registry.unregister(a.id);
        assert_eq!(registry.broadcast(&frame()), 1);
    }

    #[test]
    fn close_signals_only_the_named_connection() {
        let registry = ConnectionRegistry::new();
        let mut a = registry.register(addr());
        let mut b = registry.register(addr());
        registry.close(a.id);
        assert!(*a.close.borrow_and_update());
        assert!(!*b.close.borrow_and_update());
    }

    #[test]
    fn close_all_signals_every_connection() {
        let registry = ConnectionRegistry::new();
        let mut a = registry.register(addr());
        let mut b = registry.register(addr());
        registry.close_all();
        assert!(*a.close.borrow_and_update());
        assert!(*b.close.borrow_and_update());
    }

    #[test]
    fn force_close_stragglers_removes_and_reports_remaining_ids() {
        let registry = ConnectionRegistry::new();
        let a = registry.register(addr());
        let b = registry.register(addr());
        registry.unregister(a.id);

        let mut stragglers = registry.force_close_stragglers();
        stragglers.sort_unstable();
        assert_eq!(stragglers, vec![b.id]);
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn force_close_stragglers_aborts_attached_tasks() {
        let runtime = tokio::runtime::Builder::new_current_thread().build().expect("runtime");
        runtime.block_on(async {
            let registry = ConnectionRegistry::new();
            let reg = registry.register(addr());
            let reader = tokio::spawn(futures_pending());
            let writer = tokio::spawn(futures_pending());
            registry.attach_tasks(reg.id, reader.abort_handle(), writer.abort_handle());

            registry.force_close_stragglers();

            assert!(reader.await.unwrap_err().is_cancelled());
            assert!(writer.await.unwrap_err().is_cancelled());
        });
    }

    async fn futures_pending() {
        std::future::pending::<()>().await
    }
}
