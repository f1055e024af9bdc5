//! Background default detection

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use super::service::LoanService;
use crate::websocket::{LiveEvent, WsState};

/// Periodically mark overdue active loans as defaulted and announce each
/// one on the live feed. Runs until the task is dropped.
pub async fn default_detector(loan_service: Arc<LoanService>, ws_state: WsState, interval: Duration) {
    tracing::info!(interval_secs = interval.as_secs(), "Starting default detector");

    loop {
        tokio::time::sleep(interval).await;

        match loan_service.detect_defaults(Utc::now()).await {
            Ok(defaulted) => {
                for loan in defaulted {
                    ws_state.broadcast_event(LiveEvent::loan_updated(&loan));
                }
            }
            Err(e) => {
                tracing::error!("Error detecting defaults: {}", e);
            }
        }
    }
}
