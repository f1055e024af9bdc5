//! M-Pesa C2B confirmation callback

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;

use crate::error::ApiError;
use crate::mpesa::{C2bAck, C2bConfirmation};
use crate::state::AppState;
use crate::websocket::LiveEvent;

/// Safaricom cannot send custom headers, so the secret may also ride on
/// the registered callback URL as `?token=`.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    pub token: Option<String>,
}

fn authenticate(
    app_state: &AppState,
    headers: &HeaderMap,
    query: &CallbackQuery,
) -> Result<(), ApiError> {
    match &app_state.webhook_secret {
        Some(secret) if !secret.is_empty() => {
            let supplied = headers
                .get("X-Webhook-Secret")
                .and_then(|h| h.to_str().ok())
                .or(query.token.as_deref())
                .unwrap_or_default();

            if supplied != secret {
                return Err(ApiError::Unauthorized(
                    "Unauthorized webhook request".to_string(),
                ));
            }
            Ok(())
        }
        _ => {
            // Fail closed when no secret is configured
            tracing::error!("Webhook secret not configured - rejecting request");
            Err(ApiError::InternalError(
                "Webhook endpoint is not configured".to_string(),
            ))
        }
    }
}

/// Apply a customer payment to the loan named in the account reference.
///
/// Payments that cannot be applied are acknowledged with a rejection code
/// rather than an HTTP error, which is what the gateway expects.
pub async fn mpesa_callback(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<CallbackQuery>,
    Json(confirmation): Json<C2bConfirmation>,
) -> Result<Json<C2bAck>, ApiError> {
    authenticate(&app_state, &headers, &query)?;

    match app_state
        .loan_service
        .record_gateway_payment(&confirmation)
        .await
    {
        Ok(Some(loan)) => {
            app_state.ws_state.broadcast_event(LiveEvent::loan_updated(&loan));
            Ok(Json(C2bAck::accepted()))
        }
        Ok(None) => Ok(Json(C2bAck::accepted())),
        Err(e) => {
            tracing::warn!(
                trans_id = %confirmation.trans_id,
                bill_ref = %confirmation.bill_ref_number,
                "M-Pesa payment not applied: {}",
                e
            );
            Ok(Json(C2bAck::rejected(e.to_string())))
        }
    }
}
