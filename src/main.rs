//! COLA Sync Server
//!
//! Entry point: `--once` runs a single scrape-and-sync pass and exits;
//! otherwise an HTTP server waits for an external scheduler to trigger
//! runs via `/api/cron`.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cola_sync_server::config::Config;
use cola_sync_server::routes;
use cola_sync_server::run;
use cola_sync_server::state::AppState;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cola_sync_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration; fail fast before any network activity
    dotenvy::dotenv().ok();
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    tracing::info!("Starting COLA Sync Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Search product: {}", config.registry.product_name);
    tracing::info!("Sync strategy: {}", config.sync.policy);
    if config.storage.is_none() {
        tracing::warn!("Airtable credentials not found - sync disabled, export only");
    }

    // One-shot mode for ad-hoc runs
    if std::env::args().any(|arg| arg == "--once") {
        match run::execute(&config).await {
            Ok(outcome) => tracing::info!("{}", outcome.message),
            Err(e) => {
                tracing::error!("Sync run failed: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    let addr = SocketAddr::new(
        config
            .server
            .host
            .parse::<IpAddr>()
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
        config.server.port,
    );

    let app = routes::router(AppState::new(config)).layer(TraceLayer::new_for_http());

    tracing::info!("COLA Sync Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();

    tracing::info!("Server shutdown complete");
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
