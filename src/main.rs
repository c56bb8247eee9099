//! Device-financing loan engine server
//!
//! Serves the lending API and runs the background enforcement sweep and
//! webhook dispatcher.

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use devicelend_server::config::Config;
use devicelend_server::db;
use devicelend_server::enforcement::start_sweep_job;
use devicelend_server::notification::LogNotifier;
use devicelend_server::routes::app_router;
use devicelend_server::state::AppState;
use devicelend_server::store::{InMemoryLedger, SharedStore};
use devicelend_server::webhook::{HttpTransport, WebhookDispatcher};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!(environment = config.environment.as_str(), "Starting loan engine");

    let store: SharedStore = match &config.database_url {
        Some(_) => Arc::new(db::open_ledger(&config).await?),
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store; state is lost on restart");
            Arc::new(InMemoryLedger::new())
        }
    };

    let app_state = AppState::new(&config, store.clone(), Arc::new(LogNotifier));

    // Start enforcement sweep
    let mut scheduler = start_sweep_job(app_state.sweeper.clone(), config.enforcement.sweep_interval)
        .await
        .context("Failed to start enforcement scheduler")?;

    // Start webhook dispatcher in background
    let transport = HttpTransport::new().context("Failed to build webhook HTTP client")?;
    let dispatcher = Arc::new(WebhookDispatcher::new(
        store,
        Arc::new(transport),
        config.webhooks.clone(),
    ));
    tokio::spawn(async move {
        dispatcher.run().await;
        tracing::error!("Webhook dispatcher task exited unexpectedly");
    });

    let app = app_router(app_state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(configure_cors(&config)),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    tracing::info!("Server listening on {}", addr);
    tracing::info!("Health check at http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    // Serve with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    if let Err(e) = scheduler.shutdown().await {
        tracing::warn!("Enforcement scheduler did not shut down cleanly: {}", e);
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

fn configure_cors(config: &Config) -> CorsLayer {
    let allowed_origins_str = config.cors_allowed_origins.clone().unwrap_or_default();

    if allowed_origins_str.is_empty() {
        tracing::warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (permissive)");
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = allowed_origins_str
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
