//! Game gateway server binary.
//!
//! # Usage
//!
//! ```bash
//! gateway-server --listen 0.0.0.0:8090 \
//!     --logic-pool 127.0.0.1:9100,127.0.0.1:9101 \
//!     --chat-pool 127.0.0.1:9200
//! ```
//!
//! Configuration layers the same way the teacher's binary does: typed
//! defaults, overridable by environment variables (`GatewayConfig::from_env`,
//! §6), further overridable by the CLI flags below. Pool membership has no
//! env-var equivalent (lists don't flatten cleanly into single keys) and is
//! CLI-only.

use std::{net::SocketAddr, process::ExitCode, sync::Arc};

use clap::Parser;
use gateway_core::ConnectionConfig;
use gateway_server::{
    auth::AuthRegistry,
    capabilities::{LoggingDownstream, StaticAuthenticator},
    config::GatewayConfig,
    current_unix_ms,
    manager::ConnectionContext,
    ratelimit::{RateLimiter, RateLimiterConfig},
    registry::ConnectionRegistry,
    router::{Dispatcher, DispatcherConfig, RouteTable},
    stats::GatewayStats,
    supervisor,
    system_env::SystemEnv,
};
use tokio::sync::Notify;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Game gateway: TCP front edge terminating client connections and
/// dispatching framed messages to logic/chat/payment backend pools.
#[derive(Parser, Debug)]
#[command(name = "gateway-server")]
#[command(about = "Game gateway: auth, rate limiting, and downstream dispatch")]
#[command(version)]
struct Args {
    /// Client-facing listen address. Overrides `GATEWAY_LISTEN_ADDR`.
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Maximum concurrent connections. Overrides `GATEWAY_MAX_CONNECTIONS`.
    #[arg(long)]
    max_connections: Option<usize>,

    /// Comma-separated `host:port` endpoints for the logic pool
    /// (`routes.logic`).
    #[arg(long, value_delimiter = ',')]
    logic_pool: Vec<String>,

    /// Comma-separated `host:port` endpoints for the chat pool
    /// (`routes.chat`).
    #[arg(long, value_delimiter = ',')]
    chat_pool: Vec<String>,

    /// Comma-separated `host:port` endpoints for the payment pool
    /// (`routes.payment`).
    #[arg(long, value_delimiter = ',')]
    payment_pool: Vec<String>,

    /// Log level (trace, debug, info, warn, error), used when `RUST_LOG`
    /// isn't set.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let mut config = GatewayConfig::from_env();
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }
    if let Some(max_connections) = args.max_connections {
        config.max_connections = max_connections;
    }

    let mut routes = RouteTable::new();
    routes.configure_pool("logic", args.logic_pool);
    routes.configure_pool("chat", args.chat_pool);
    routes.configure_pool("payment", args.payment_pool);

    let now_ms = current_unix_ms();
    let connections = ConnectionRegistry::new();
    let auth_registry = AuthRegistry::new();
    let rate_limiter = Arc::new(RateLimiter::new(
        RateLimiterConfig { global_qps: config.global_qps, global_burst: config.global_burst },
        now_ms,
    ));
    let stats = Arc::new(GatewayStats::new(now_ms));

    // No identity provider or downstream RPC client is wired at this layer
    // (spec.md §1 names both as external collaborators). A deployment
    // building on this binary swaps these two for its own implementations.
    let dispatcher = Dispatcher::new(
        DispatcherConfig::default(),
        connections.clone(),
        auth_registry.clone(),
        rate_limiter.clone(),
        routes,
        StaticAuthenticator::default(),
        LoggingDownstream::new(),
    );

    let ctx = Arc::new(ConnectionContext {
        connections,
        auth_registry,
        dispatcher: Arc::new(dispatcher),
        stats,
        env: SystemEnv,
        connection_config: ConnectionConfig { read_idle: config.read_idle, write_idle: config.write_idle },
        max_body_bytes: config.max_body_bytes,
        compress_threshold: config.compress_threshold,
    });

    let shutdown = Arc::new(Notify::new());
    tokio::spawn(wait_for_shutdown_signal(shutdown.clone()));

    match supervisor::run(config, ctx, rate_limiter, shutdown, None).await {
        Ok(0) => ExitCode::SUCCESS,
        Ok(stragglers) => {
            tracing::warn!(stragglers, "shutdown deadline exceeded, connections force-closed");
            ExitCode::from(2)
        },
        Err(error) => {
            tracing::error!(%error, "fatal startup error");
            ExitCode::from(1)
        },
    }
}

/// Waits for Ctrl-C (or SIGTERM on Unix) and notifies the supervisor to
/// begin the graceful drain (§4.5, §5's shutdown deadline).
async fn wait_for_shutdown_signal(shutdown: Arc<Notify>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(error) => {
                tracing::warn!(%error, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                shutdown.notify_one();
                return;
            },
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = sigterm.recv() => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    tracing::info!("shutdown signal received");
    shutdown.notify_one();
}
