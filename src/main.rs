//! Chama lending backend server

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};

use chama_backend::auth::AuthConfig;
use chama_backend::config::Config;
use chama_backend::loan::{default_detector, LoanService};
use chama_backend::mpesa::{MpesaClient, PaymentGateway, SimulatedGateway};
use chama_backend::notify::InAppNotifier;
use chama_backend::state::AppState;
use chama_backend::store::{InMemoryLoanStore, LoanStore, PgLoanStore};
use chama_backend::websocket::WsState;
use chama_backend::{app_router, db};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;

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

    tracing::info!(environment = config.environment.as_str(), "Starting chama backend");

    let store: Arc<dyn LoanStore> = match &config.database_url {
        Some(database_url) => {
            if let Some(masked) = config.database_url_masked() {
                tracing::info!("Connecting to database at {}", masked);
            }
            let pool = db::create_pool(database_url, config.db_max_connections)
                .await
                .context("Failed to connect to database")?;
            db::run_migrations(&pool)
                .await
                .context("Failed to run migrations")?;
            Arc::new(PgLoanStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory store");
            Arc::new(InMemoryLoanStore::new())
        }
    };

    let gateway: Arc<dyn PaymentGateway> = match config.mpesa.clone() {
        Some(mpesa) => {
            tracing::info!(shortcode = %mpesa.shortcode, "M-Pesa payouts enabled");
            Arc::new(MpesaClient::new(mpesa))
        }
        None => {
            tracing::warn!("M-Pesa credentials not set, payouts are simulated");
            Arc::new(SimulatedGateway)
        }
    };

    let ws_state = WsState::new();
    let notifications = Arc::new(InAppNotifier::new(ws_state.clone()));

    let loan_service = Arc::new(LoanService::new(
        store,
        notifications.clone(),
        gateway,
        config.default_grace_days,
    ));

    let app_state = AppState::new(
        loan_service.clone(),
        notifications,
        ws_state.clone(),
        Arc::new(AuthConfig::new(config.jwt_secret.clone())),
        config.webhook_secret.clone(),
    );

    let sweep_interval = config.default_sweep_interval;
    tokio::spawn(async move {
        default_detector(loan_service, ws_state, sweep_interval).await;
        tracing::error!("Default detector task exited unexpectedly");
    });

    let app = app_router(app_state).layer(configure_cors(config.cors_allowed_origins.as_deref()));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    tracing::info!("Server listening on {}", addr);
    tracing::info!("WebSocket available at ws://{}/ws", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

fn configure_cors(allowed_origins: Option<&str>) -> CorsLayer {
    let allowed_origins = allowed_origins.unwrap_or_default();

    if allowed_origins.trim().is_empty() {
        tracing::warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (permissive)");
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT])
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
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
