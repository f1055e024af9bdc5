//! Application state shared across handlers

use std::sync::Arc;

use crate::auth::AuthConfig;
use crate::loan::LoanService;
use crate::notify::InAppNotifier;
use crate::websocket::WsState;

use axum::extract::FromRef;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub loan_service: Arc<LoanService>,
    pub notifications: Arc<InAppNotifier>,
    pub ws_state: WsState,
    pub auth: Arc<AuthConfig>,
    pub webhook_secret: Option<String>,
}

impl AppState {
    pub fn new(
        loan_service: Arc<LoanService>,
        notifications: Arc<InAppNotifier>,
        ws_state: WsState,
        auth: Arc<AuthConfig>,
        webhook_secret: Option<String>,
    ) -> Self {
        Self {
            loan_service,
            notifications,
            ws_state,
            auth,
            webhook_secret,
        }
    }
}

impl FromRef<AppState> for WsState {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.ws_state.clone()
    }
}

impl FromRef<AppState> for Arc<LoanService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.loan_service.clone()
    }
}

impl FromRef<AppState> for Arc<AuthConfig> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.auth.clone()
    }
}
