//! Chama lending backend
//!
//! Loan terms calculation, risk scoring and the loan lifecycle for
//! community savings groups, served over HTTP.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod investment;
pub mod loan;
pub mod middleware;
pub mod models;
pub mod mpesa;
pub mod notify;
pub mod routes;
pub mod state;
pub mod store;
pub mod websocket;

use axum::{routing::get, Router};

use state::AppState;

/// Full API router over `state`, with request tracing. CORS is left to the
/// caller.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(handlers::health_check))
        .route("/ws", get(websocket::ws_handler))
        .merge(routes::loan_routes())
        .merge(routes::mpesa_routes())
        .with_state(state)
        .layer(axum::middleware::from_fn(middleware::request_tracing))
}

async fn root() -> &'static str {
    "Chama Lending API Server"
}
