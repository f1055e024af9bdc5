//! M-Pesa callback routes

use axum::{routing::post, Router};

use crate::handlers::mpesa_callback;
use crate::state::AppState;

pub fn mpesa_routes() -> Router<AppState> {
    Router::new().route("/api/mpesa/callback", post(mpesa_callback))
}
