//! WebSocket feed of live loan events
//!
//! Clients subscribe to loan ids (an empty subscription means every loan).
//! Notifications are only pushed to the connection authenticated as the
//! recipient.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use uuid::Uuid;

use crate::loan::{Loan, LoanStatus};
use crate::middleware::OptionalUser;
use crate::notify::Notification;

/// Event pushed to connected clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LiveEvent {
    LoanUpdated {
        loan_id: Uuid,
        status: LoanStatus,
        version: i64,
    },
    Notification {
        notification: Notification,
    },
}

impl LiveEvent {
    pub fn loan_updated(loan: &Loan) -> Self {
        LiveEvent::LoanUpdated {
            loan_id: loan.id,
            status: loan.status,
            version: loan.version,
        }
    }
}

/// WebSocket server state
#[derive(Clone)]
pub struct WsState {
    pub tx: broadcast::Sender<LiveEvent>,
    pub clients: Arc<RwLock<HashMap<String, ClientInfo>>>,
}

#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub client_id: String,
    pub user_id: Option<Uuid>,
    pub subscribed_loans: Vec<Uuid>,
}

impl ClientInfo {
    fn wants(&self, event: &LiveEvent) -> bool {
        match event {
            LiveEvent::LoanUpdated { loan_id, .. } => {
                self.subscribed_loans.is_empty() || self.subscribed_loans.contains(loan_id)
            }
            LiveEvent::Notification { notification } => {
                self.user_id == Some(notification.user_id)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ClientMessage {
    Subscribe { loan_ids: Vec<Uuid> },
    Unsubscribe { loan_ids: Vec<Uuid> },
    Ping,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ServerMessage {
    Event { event: LiveEvent },
    Subscribed { loan_ids: Vec<Uuid> },
    Unsubscribed { loan_ids: Vec<Uuid> },
    Pong,
}

impl Default for WsState {
    fn default() -> Self {
        Self::new()
    }
}

impl WsState {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(100);
        Self {
            tx,
            clients: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Broadcast an event to every connected client. Having no listeners
    /// is not an error.
    pub fn broadcast_event(&self, event: LiveEvent) {
        if self.tx.receiver_count() == 0 {
            return;
        }
        if let Err(e) = self.tx.send(event) {
            tracing::warn!("Failed to broadcast event: {}", e);
        }
    }

    async fn register_client(&self, client_id: String, user_id: Option<Uuid>) {
        let mut clients = self.clients.write().await;
        clients.insert(
            client_id.clone(),
            ClientInfo {
                client_id,
                user_id,
                subscribed_loans: vec![],
            },
        );
    }

    async fn unregister_client(&self, client_id: &str) {
        self.clients.write().await.remove(client_id);
        tracing::info!("Client {} disconnected", client_id);
    }

    async fn update_subscriptions<F>(&self, client_id: &str, update: F)
    where
        F: FnOnce(&mut Vec<Uuid>),
    {
        let mut clients = self.clients.write().await;
        if let Some(client) = clients.get_mut(client_id) {
            update(&mut client.subscribed_loans);
        }
    }
}

/// Upgrade to a WebSocket. A bearer token is optional; without one the
/// client only receives loan updates.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<WsState>,
    OptionalUser(user): OptionalUser,
) -> Response {
    let user_id = user.map(|u| u.actor.user_id);
    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id))
}

async fn handle_socket(socket: WebSocket, state: WsState, user_id: Option<Uuid>) {
    let client_id = Uuid::new_v4().to_string();
    state.register_client(client_id.clone(), user_id).await;

    let (mut sender, mut receiver) = socket.split();
    let (internal_tx, mut internal_rx) = mpsc::channel::<ServerMessage>(32);

    let mut rx = state.tx.subscribe();
    let send_state = state.clone();
    let send_client_id = client_id.clone();

    let mut send_task = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                Ok(event) = rx.recv() => {
                    let wanted = send_state
                        .clients
                        .read()
                        .await
                        .get(&send_client_id)
                        .map_or(false, |client| client.wants(&event));
                    if !wanted {
                        continue;
                    }
                    ServerMessage::Event { event }
                }
                Some(msg) = internal_rx.recv() => msg,
                else => break,
            };

            if let Ok(text) = serde_json::to_string(&msg) {
                if sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        }
    });

    let recv_state = state.clone();
    let recv_client_id = client_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    let Ok(client_msg) = serde_json::from_str::<ClientMessage>(&text) else {
                        continue;
                    };
                    match client_msg {
                        ClientMessage::Subscribe { loan_ids } => {
                            let added = loan_ids.clone();
                            recv_state
                                .update_subscriptions(&recv_client_id, move |subs| {
                                    for id in added {
                                        if !subs.contains(&id) {
                                            subs.push(id);
                                        }
                                    }
                                })
                                .await;
                            let _ = internal_tx.send(ServerMessage::Subscribed { loan_ids }).await;
                        }
                        ClientMessage::Unsubscribe { loan_ids } => {
                            let removed = loan_ids.clone();
                            recv_state
                                .update_subscriptions(&recv_client_id, move |subs| {
                                    subs.retain(|id| !removed.contains(id))
                                })
                                .await;
                            let _ = internal_tx.send(ServerMessage::Unsubscribed { loan_ids }).await;
                        }
                        ClientMessage::Ping => {
                            let _ = internal_tx.send(ServerMessage::Pong).await;
                        }
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    state.unregister_client(&client_id).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{NotificationCategory, NotificationRequest};

    fn client(user_id: Option<Uuid>, loans: Vec<Uuid>) -> ClientInfo {
        ClientInfo {
            client_id: "c1".to_string(),
            user_id,
            subscribed_loans: loans,
        }
    }

    #[test]
    fn test_loan_events_follow_subscriptions() {
        let watched = Uuid::new_v4();
        let event = |loan_id| LiveEvent::LoanUpdated {
            loan_id,
            status: LoanStatus::Active,
            version: 3,
        };

        assert!(client(None, vec![]).wants(&event(Uuid::new_v4())));
        assert!(client(None, vec![watched]).wants(&event(watched)));
        assert!(!client(None, vec![watched]).wants(&event(Uuid::new_v4())));
    }

    #[test]
    fn test_notifications_only_reach_recipient() {
        let user = Uuid::new_v4();
        let notification = Notification::new(NotificationRequest {
            user_id: user,
            loan_id: None,
            title: "Loan approved".to_string(),
            message: "Your loan was approved".to_string(),
            category: NotificationCategory::Loan,
        });
        let event = LiveEvent::Notification { notification };

        assert!(client(Some(user), vec![]).wants(&event));
        assert!(!client(Some(Uuid::new_v4()), vec![]).wants(&event));
        assert!(!client(None, vec![]).wants(&event));
    }

    #[tokio::test]
    async fn test_broadcast_without_listeners_is_silent() {
        let state = WsState::new();
        state.broadcast_event(LiveEvent::LoanUpdated {
            loan_id: Uuid::new_v4(),
            status: LoanStatus::Pending,
            version: 1,
        });

        let mut rx = state.tx.subscribe();
        state.broadcast_event(LiveEvent::LoanUpdated {
            loan_id: Uuid::nil(),
            status: LoanStatus::Completed,
            version: 9,
        });
        assert!(matches!(
            rx.recv().await.unwrap(),
            LiveEvent::LoanUpdated { version: 9, .. }
        ));
    }
}
