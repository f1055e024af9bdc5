use axum::{extract::State, Json};

use crate::middleware::AuthenticatedUser;
use crate::models::ApiResponse;
use crate::notify::Notification;
use crate::state::AppState;

/// Recent in-app notifications for the caller, newest first
pub async fn list_notifications(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
) -> Json<ApiResponse<Vec<Notification>>> {
    let notifications = app_state.notifications.recent(user.actor.user_id).await;
    Json(ApiResponse::ok(notifications))
}
