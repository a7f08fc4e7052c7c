//! Connection manager (C5): per-connection reader/writer tasks wiring a
//! [`gateway_core::Connection`] state machine to a real socket.
//!
//! Grounded on the teacher's per-connection task split (one reader task, one
//! writer task, joined by a bounded channel and a shared close signal) from
//! `lockframe-server::lib::handle_connection`; the frame decode loop and the
//! idle-tick driver are new, since the teacher's sessions are framed
//! differently and have no heartbeat/idle-close contract.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use gateway_core::{Connection, ConnectionAction, ConnectionConfig, ConnectionState, Environment};
use gateway_proto::{Frame, FrameDecoder, ProtocolError};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time,
};
use tracing::{debug, info, warn};

use crate::{
    auth::AuthRegistry,
    capabilities::{AuthCapability, SendDownstream},
    registry::ConnectionRegistry,
    router::Dispatcher,
    stats::GatewayStats,
    system_env::SystemEnv,
};

/// Deadline for draining a connection's outbound queue during close (§4.3).
const WRITER_DRAIN_DEADLINE: Duration = Duration::from_secs(2);
/// Deadline for a single outbound write before the connection is treated as
/// dead (§5's "outbound send deadline").
const OUTBOUND_WRITE_DEADLINE: Duration = Duration::from_secs(5);
/// How often the idle-tick driver checks read/write idle timeouts.
const TICK_INTERVAL: Duration = Duration::from_secs(1);
/// Read buffer size for a single `TcpStream::read` call.
const READ_BUFFER_BYTES: usize = 16 * 1024;

/// Everything a connection's tasks need beyond the socket itself.
pub struct ConnectionContext<A: AuthCapability, D: SendDownstream> {
    pub connections: ConnectionRegistry,
    pub auth_registry: AuthRegistry,
    pub dispatcher: Arc<Dispatcher<A, D>>,
    pub stats: Arc<GatewayStats>,
    pub env: SystemEnv,
    pub connection_config: ConnectionConfig,
    pub max_body_bytes: u32,
    pub compress_threshold: usize,
}

/// Accepts ownership of a freshly-connected socket, registers it, and spawns
/// its reader and writer tasks. Returns immediately; the connection runs to
/// completion in the background.
pub fn spawn_connection<A: AuthCapability, D: SendDownstream>(
    stream: TcpStream,
    remote_addr: SocketAddr,
    ctx: Arc<ConnectionContext<A, D>>,
) {
    let registration = ctx.connections.register(remote_addr);
    ctx.stats.record_connection();
    let conn_id = registration.id;

    let (read_half, write_half) = stream.into_split();

    let writer = tokio::spawn(run_writer(
        write_half,
        registration.outbound,
        registration.close.clone(),
        conn_id,
        ctx.compress_threshold,
    ));
    let reader = tokio::spawn(run_reader(read_half, registration.close, remote_addr, conn_id, ctx.clone()));
    // Recorded so a shutdown that outlasts the drain deadline can actually
    // abort a straggler's tasks (§4.5), not just report it.
    ctx.connections.attach_tasks(conn_id, reader.abort_handle(), writer.abort_handle());
}

/// Drains the outbound queue onto the socket until the close signal fires or
/// the queue's sender side is dropped. A write that doesn't land within
/// [`OUTBOUND_WRITE_DEADLINE`] is treated as a dead peer and ends the task.
async fn run_writer(
    mut write_half: tokio::net::tcp::OwnedWriteHalf,
    mut outbound: tokio::sync::mpsc::Receiver<Frame>,
    mut close: tokio::sync::watch::Receiver<bool>,
    conn_id: u64,
    compress_threshold: usize,
) {
    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                let mut buf = Vec::new();
                if let Err(error) = frame.encode(&mut buf, compress_threshold) {
                    warn!(conn_id, %error, "failed to encode outbound frame");
                    continue;
                }
                match time::timeout(OUTBOUND_WRITE_DEADLINE, write_half.write_all(&buf)).await {
                    Ok(Ok(())) => {},
                    Ok(Err(error)) => {
                        debug!(conn_id, %error, "write failed, closing connection");
                        break;
                    },
                    Err(_) => {
                        warn!(conn_id, "outbound write deadline exceeded, closing connection");
                        break;
                    },
                }
            },
            _ = close.changed() => {
                if *close.borrow() {
                    // Drain whatever is already queued before exiting, up to
                    // the drain deadline (§4.3's close cascade step b).
                    let _ = time::timeout(
                        WRITER_DRAIN_DEADLINE,
                        drain_remaining(&mut write_half, &mut outbound, compress_threshold),
                    )
                    .await;
                    break;
                }
            },
        }
    }
}

async fn drain_remaining(
    write_half: &mut tokio::net::tcp::OwnedWriteHalf,
    outbound: &mut tokio::sync::mpsc::Receiver<Frame>,
    compress_threshold: usize,
) {
    while let Ok(frame) = outbound.try_recv() {
        let mut buf = Vec::new();
        if frame.encode(&mut buf, compress_threshold).is_ok() {
            let _ = write_half.write_all(&buf).await;
        }
    }
}

/// Reads bytes off the socket, decodes frames, feeds them to the dispatcher,
/// and drives the connection's idle-timeout tick. Owns the
/// [`gateway_core::Connection`] state machine exclusively, per §9's
/// cyclic-reference resolution.
async fn run_reader<A: AuthCapability, D: SendDownstream>(
    mut read_half: tokio::net::tcp::OwnedReadHalf,
    mut close: tokio::sync::watch::Receiver<bool>,
    remote_addr: SocketAddr,
    conn_id: u64,
    ctx: Arc<ConnectionContext<A, D>>,
) {
    let mut connection = Connection::<SystemEnv>::new(conn_id, ctx.env.now(), ctx.connection_config);
    if let Err(error) = connection.activate() {
        warn!(conn_id, %error, "failed to activate connection");
        finish_close(conn_id, &ctx).await;
        return;
    }

    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; READ_BUFFER_BYTES];
    let mut ticker = time::interval(TICK_INTERVAL);

    loop {
        tokio::select! {
            read_result = read_half.read(&mut buf) => {
                match read_result {
                    Ok(0) => {
                        debug!(conn_id, "peer closed connection");
                        break;
                    },
                    Ok(n) => {
                        connection.record_read(ctx.env.now());
                        if !handle_bytes(&buf[..n], &mut decoder, remote_addr, conn_id, &ctx, &mut connection).await {
                            break;
                        }
                    },
                    Err(error) => {
                        debug!(conn_id, %error, "read failed, closing connection");
                        break;
                    },
                }
            },
            _ = ticker.tick() => {
                let actions = connection.tick(ctx.env.now());
                if !apply_actions(actions, conn_id, &ctx) {
                    break;
                }
            },
            _ = close.changed() => {
                if *close.borrow() {
                    debug!(conn_id, "connection closed by registry signal");
                    break;
                }
            },
        }
    }

    finish_close(conn_id, &ctx).await;
}

/// Decodes as many frames as `bytes` completes and dispatches each. Returns
/// `false` if a malformed/oversize frame means the connection must close
/// (protocol errors are connection-fatal per §7).
async fn handle_bytes<A: AuthCapability, D: SendDownstream>(
    bytes: &[u8],
    decoder: &mut FrameDecoder,
    remote_addr: SocketAddr,
    conn_id: u64,
    ctx: &Arc<ConnectionContext<A, D>>,
    connection: &mut Connection<SystemEnv>,
) -> bool {
    let frames = match decoder.push(bytes) {
        Ok(frames) => frames,
        Err(ProtocolError::Oversize { .. }) => {
            let count = ctx.stats.record_dropped_oversize();
            if crate::stats::should_log_sample(count) {
                warn!(conn_id, count, "dropping oversize frame, closing connection");
            }
            return false;
        },
        Err(error) => {
            let count = ctx.stats.record_dropped_malformed();
            if crate::stats::should_log_sample(count) {
                warn!(conn_id, count, %error, "dropping malformed frame, closing connection");
            }
            return false;
        },
    };

    let now_ms = crate::current_unix_ms();
    for frame in frames {
        let wire_len = frame.body.len();
        if wire_len as u32 > ctx.max_body_bytes {
            // Within the protocol's hard 10 MiB ceiling but over this
            // deployment's configured `frame.max_body_bytes` (§6).
            let count = ctx.stats.record_dropped_oversize();
            if crate::stats::should_log_sample(count) {
                warn!(conn_id, count, wire_len, "dropping frame over configured max_body_bytes");
            }
            return false;
        }
        ctx.stats.record_frame_in(wire_len);
        let outcome = ctx.dispatcher.dispatch(conn_id, remote_addr.ip(), frame, now_ms);
        if matches!(outcome, crate::router::DispatchOutcome::AuthHandled { accepted: true, .. })
            && connection.state() == ConnectionState::Active
        {
            // The dispatcher authenticated via C3 directly; mirror that into
            // this connection's own state machine so idle/close logic (and
            // anything inspecting `Connection::state`) agrees with C3.
            let _ = connection.mark_authenticated();
        }
        send_reply(&outcome, conn_id, connection, ctx);
        record_outcome(&outcome, conn_id, &ctx.stats);
    }
    true
}

/// Sends the reply frame (if any) carried by `outcome` back to the sender's
/// own connection, through the same registry-send-plus-accounting path as
/// heartbeats in [`apply_actions`], and marks the write against `connection`
/// so the write-idle clock actually reflects it.
fn send_reply<A: AuthCapability, D: SendDownstream>(
    outcome: &crate::router::DispatchOutcome,
    conn_id: u64,
    connection: &mut Connection<SystemEnv>,
    ctx: &Arc<ConnectionContext<A, D>>,
) {
    use crate::router::DispatchOutcome;
    let reply = match outcome {
        DispatchOutcome::AuthHandled { reply, .. }
        | DispatchOutcome::DroppedAuth { reply }
        | DispatchOutcome::DroppedRate { reply, .. }
        | DispatchOutcome::DroppedRoute { reply } => reply,
        DispatchOutcome::Dispatched { .. } => return,
    };
    let Some(frame) = reply else { return };
    let wire_len = frame.body.len();
    if ctx.connections.send(conn_id, frame.clone()).is_ok() {
        ctx.stats.record_frame_out(wire_len);
        connection.record_write(ctx.env.now());
    }
}

fn record_outcome(outcome: &crate::router::DispatchOutcome, conn_id: u64, stats: &GatewayStats) {
    use crate::router::DispatchOutcome;
    let (count, reason) = match outcome {
        DispatchOutcome::DroppedAuth { .. } => (stats.record_dropped_auth(), "auth"),
        DispatchOutcome::DroppedRate { scope, .. } => {
            (stats.record_dropped_rate(), match scope {
                crate::ratelimit::RateScope::Global => "rate(global)",
                crate::ratelimit::RateScope::Ip => "rate(ip)",
                crate::ratelimit::RateScope::Identity => "rate(identity)",
            })
        },
        DispatchOutcome::DroppedRoute { .. } => (stats.record_dropped_route(), "route"),
        DispatchOutcome::Dispatched { .. } | DispatchOutcome::AuthHandled { .. } => return,
    };
    if crate::stats::should_log_sample(count) {
        warn!(conn_id, count, reason, "dropping frame");
    }
}

/// Applies the actions returned by [`Connection::tick`]: forwards sends
/// through the registry and begins closing on a [`ConnectionAction::Close`].
/// Returns `false` once the connection should stop running.
fn apply_actions<A: AuthCapability, D: SendDownstream>(
    actions: Vec<ConnectionAction>,
    conn_id: u64,
    ctx: &Arc<ConnectionContext<A, D>>,
) -> bool {
    let mut keep_running = true;
    for action in actions {
        match action {
            ConnectionAction::SendFrame(frame) => {
                let wire_len = frame.body.len();
                if ctx.connections.send(conn_id, frame).is_ok() {
                    ctx.stats.record_frame_out(wire_len);
                }
            },
            ConnectionAction::Close { reason } => {
                debug!(conn_id, %reason, "connection idle timeout");
                keep_running = false;
            },
        }
    }
    keep_running
}

/// Runs the close cascade (§4.3): unregister from C2/C3, finish the state
/// machine, emit a close event.
async fn finish_close<A: AuthCapability, D: SendDownstream>(conn_id: u64, ctx: &Arc<ConnectionContext<A, D>>) {
    ctx.connections.close(conn_id);
    ctx.auth_registry.deauthenticate(conn_id);
    ctx.connections.unregister(conn_id);
    info!(conn_id, "connection closed");
}
