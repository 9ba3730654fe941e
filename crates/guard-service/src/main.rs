//! COP Guard
//!
//! Entry point for the token verification and access-decision gateway.

use guard_service::config::Config;
use guard_service::engine::AuthEngine;
use guard_service::routes::{self, init_metrics_recorder, AppState};
use guard_service::tasks::{start_jwks_refresh, start_rate_limit_sweeper};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "guard_service=info,guard=info,tower_http=info".into());

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env();
    init_tracing(config.as_ref().is_ok_and(|c| c.log_json));

    info!("Starting COP Guard");

    let config = config.map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        trust_sources = ?config.trust_sources.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
        clock_skew_seconds = config.clock_skew.as_secs(),
        require_mtls = config.require_mtls,
        "Configuration loaded successfully"
    );

    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics recorder: {}", e);
        e
    })?;

    let engine = Arc::new(AuthEngine::from_config(&config));
    engine.warm_up().await;

    let cancel_token = CancellationToken::new();

    let refresh_handle = tokio::spawn(start_jwks_refresh(
        Arc::clone(engine.cache()),
        config.jwks_refresh_interval,
        cancel_token.clone(),
    ));
    let sweeper_handle = tokio::spawn(start_rate_limit_sweeper(
        Arc::clone(engine.limiter()),
        config.rate_limit_window,
        cancel_token.clone(),
    ));

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;
    let drain_period = config.drain_period;

    let state = Arc::new(AppState {
        config,
        engine,
    });
    let app = routes::build_routes(state, metrics_handle);

    info!("COP Guard listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(drain_period))
    .await?;

    cancel_token.cancel();
    for (name, handle) in [("jwks_refresh", refresh_handle), ("rate_limit_sweeper", sweeper_handle)] {
        if let Err(e) = handle.await {
            warn!(task = name, error = %e, "Background task ended abnormally");
        }
    }

    info!("COP Guard shutdown complete");

    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
/// Returns when a shutdown signal is received and the drain period is complete.
async fn shutdown_signal(drain_period: Duration) {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    if drain_period.is_zero() {
        info!("Skipping drain period (GUARD_DRAIN_SECONDS=0)");
    } else {
        warn!("Draining connections for {} seconds...", drain_period.as_secs());
        tokio::time::sleep(drain_period).await;
        info!("Drain period complete");
    }
}
