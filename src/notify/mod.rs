//! Member notifications
//!
//! Loan workflow code only calls [`Notifier::notify`]. The in-app notifier
//! pushes to the WebSocket feed and keeps a short per-user history; email,
//! SMS and push channels are recorded as pending for an external sender.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::websocket::{LiveEvent, WsState};

/// Notifications kept per user by [`InAppNotifier`]
pub const RECENT_PER_USER: usize = 50;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Notification delivery failed: {0}")]
    Delivery(String),
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationCategory {
    Loan,
    Payment,
    Role,
    System,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Delivered,
    Failed,
}

/// Per-channel delivery state
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub in_app: DeliveryStatus,
    pub email: DeliveryStatus,
    pub sms: DeliveryStatus,
    pub push: DeliveryStatus,
}

impl Default for Delivery {
    fn default() -> Self {
        Self {
            in_app: DeliveryStatus::Delivered,
            email: DeliveryStatus::Pending,
            sms: DeliveryStatus::Pending,
            push: DeliveryStatus::Pending,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NotificationRequest {
    pub user_id: Uuid,
    pub loan_id: Option<Uuid>,
    pub title: String,
    pub message: String,
    pub category: NotificationCategory,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub loan_id: Option<Uuid>,
    pub title: String,
    pub message: String,
    pub category: NotificationCategory,
    pub delivery: Delivery,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(request: NotificationRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            loan_id: request.loan_id,
            title: request.title,
            message: request.message,
            category: request.category,
            delivery: Delivery::default(),
            read: false,
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, request: NotificationRequest) -> Result<Notification, NotifyError>;
}

/// In-app delivery over the WebSocket feed
pub struct InAppNotifier {
    ws_state: WsState,
    recent: RwLock<HashMap<Uuid, VecDeque<Notification>>>,
}

impl InAppNotifier {
    pub fn new(ws_state: WsState) -> Self {
        Self {
            ws_state,
            recent: RwLock::new(HashMap::new()),
        }
    }

    /// Most recent first
    pub async fn recent(&self, user_id: Uuid) -> Vec<Notification> {
        self.recent
            .read()
            .await
            .get(&user_id)
            .map(|list| list.iter().rev().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for InAppNotifier {
    async fn notify(&self, request: NotificationRequest) -> Result<Notification, NotifyError> {
        let notification = Notification::new(request);

        {
            let mut recent = self.recent.write().await;
            let list = recent.entry(notification.user_id).or_default();
            if list.len() == RECENT_PER_USER {
                list.pop_front();
            }
            list.push_back(notification.clone());
        }

        self.ws_state.broadcast_event(LiveEvent::Notification {
            notification: notification.clone(),
        });

        tracing::debug!(
            user_id = %notification.user_id,
            title = %notification.title,
            "Notification delivered in-app"
        );
        Ok(notification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(user_id: Uuid, title: &str) -> NotificationRequest {
        NotificationRequest {
            user_id,
            loan_id: None,
            title: title.to_string(),
            message: "body".to_string(),
            category: NotificationCategory::Loan,
        }
    }

    #[tokio::test]
    async fn test_in_app_delivered_others_pending() {
        let notifier = InAppNotifier::new(WsState::new());
        let user = Uuid::new_v4();
        let sent = notifier.notify(request(user, "Loan approved")).await.unwrap();

        assert_eq!(sent.delivery.in_app, DeliveryStatus::Delivered);
        assert_eq!(sent.delivery.email, DeliveryStatus::Pending);
        assert_eq!(sent.delivery.sms, DeliveryStatus::Pending);
        assert!(!sent.read);
    }

    #[tokio::test]
    async fn test_recent_is_bounded_and_newest_first() {
        let notifier = InAppNotifier::new(WsState::new());
        let user = Uuid::new_v4();
        for i in 0..RECENT_PER_USER + 5 {
            notifier.notify(request(user, &format!("n{}", i))).await.unwrap();
        }

        let recent = notifier.recent(user).await;
        assert_eq!(recent.len(), RECENT_PER_USER);
        assert_eq!(recent[0].title, format!("n{}", RECENT_PER_USER + 4));
        assert!(notifier.recent(Uuid::new_v4()).await.is_empty());
    }
}
