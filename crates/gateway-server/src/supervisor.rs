//! Process supervisor (C7): accept loop, background ticker jobs, and
//! graceful shutdown orchestration.
//!
//! Grounded on the teacher's `Server::run` top-level loop
//! (`lockframe-server::server`): an accept loop spawning per-connection
//! tasks, plus a handful of `tokio::spawn`'d ticker tasks for periodic
//! maintenance, all torn down together on a shutdown signal.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{oneshot, Notify};
use tokio::time;
use tracing::{info, warn};

use crate::{
    capabilities::{AuthCapability, SendDownstream},
    config::GatewayConfig,
    error::GatewayError,
    manager::{self, ConnectionContext},
    ratelimit::{RateLimiter, DEFAULT_IDLE_EVICTION_MS},
};

/// How often the rate limiter's idle buckets are swept (§4.4).
const RATE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Runs the gateway until `shutdown` is notified, then drains connections
/// for up to `config.shutdown_deadline` before returning.
///
/// `ready`, if given, is sent the listener's actual bound address once the
/// socket is up — callers that bind to port 0 (tests, ephemeral ports) have
/// no other way to learn which port was assigned.
///
/// Returns the number of connections still active when the deadline was
/// reached (stragglers force-closed), for the caller to decide the process
/// exit code.
pub async fn run<A: AuthCapability, D: SendDownstream>(
    config: GatewayConfig,
    ctx: Arc<ConnectionContext<A, D>>,
    rate_limiter: Arc<RateLimiter>,
    shutdown: Arc<Notify>,
    ready: Option<oneshot::Sender<SocketAddr>>,
) -> Result<usize, GatewayError> {
    let bind_failed = |source: std::io::Error| GatewayError::BindFailed {
        addr: config.listen_addr.to_string(),
        source,
    };
    let listener = TcpListener::bind(config.listen_addr).await.map_err(bind_failed)?;
    let bound_addr = listener.local_addr().map_err(bind_failed)?;
    info!(addr = %bound_addr, "gateway listening");
    if let Some(ready) = ready {
        let _ = ready.send(bound_addr);
    }

    let sweep_handle = tokio::spawn(run_rate_sweep(rate_limiter));

    let accept_result = accept_loop(listener, ctx.clone(), shutdown.clone(), config.max_connections).await;
    if let Err(error) = accept_result {
        warn!(%error, "accept loop ended with an error");
    }

    sweep_handle.abort();

    let stragglers = drain_or_force_close(&ctx, config.shutdown_deadline).await;
    Ok(stragglers)
}

/// Accepts connections until `shutdown` fires, spawning one reader/writer
/// pair per socket and refusing new connections once `max_connections` is
/// reached (§6's `limits.max_connections`).
async fn accept_loop<A: AuthCapability, D: SendDownstream>(
    listener: TcpListener,
    ctx: Arc<ConnectionContext<A, D>>,
    shutdown: Arc<Notify>,
    max_connections: usize,
) -> std::io::Result<()> {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, remote_addr) = accepted?;
                if ctx.connections.active_count() >= max_connections {
                    warn!(%remote_addr, max_connections, "refusing connection: at capacity");
                    drop(stream);
                    continue;
                }
                manager::spawn_connection(stream, remote_addr, ctx.clone());
            },
            _ = shutdown.notified() => {
                info!("shutdown requested, closing listener");
                return Ok(());
            },
        }
    }
}

/// Periodically evicts idle per-IP/per-identity rate-limiter buckets.
async fn run_rate_sweep(rate_limiter: Arc<RateLimiter>) {
    let mut ticker = time::interval(RATE_SWEEP_INTERVAL);
    loop {
        ticker.tick().await;
        let now_ms = crate::current_unix_ms();
        rate_limiter.sweep(now_ms, DEFAULT_IDLE_EVICTION_MS);
    }
}

/// Broadcasts a close-intent, then waits up to `deadline` for every
/// registered connection to drain on its own. Whatever remains at the
/// deadline has its reader/writer tasks aborted outright and the straggler
/// count is returned (P11).
async fn drain_or_force_close<A: AuthCapability, D: SendDownstream>(
    ctx: &Arc<ConnectionContext<A, D>>,
    deadline: Duration,
) -> usize {
    ctx.connections.close_all();

    let poll_interval = Duration::from_millis(100);
    let deadline_at = time::Instant::now() + deadline;
    while time::Instant::now() < deadline_at {
        if ctx.connections.active_count() == 0 {
            break;
        }
        time::sleep(poll_interval).await;
    }

    let stragglers = ctx.connections.force_close_stragglers();
    if !stragglers.is_empty() {
        warn!(stragglers = stragglers.len(), "aborting connections still active at shutdown deadline");
        for conn_id in &stragglers {
            ctx.auth_registry.deauthenticate(*conn_id);
        }
    }
    stragglers.len()
}

