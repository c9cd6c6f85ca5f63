//! WebSocket streaming of session snapshots.

use std::sync::Arc;

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use revlog_core::{Record, SnapshotStore};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::protocol::{ClientMessage, ServerMessage};

/// Called when a client asks for a new refresh cycle.
pub type RefreshHook = Arc<dyn Fn() + Send + Sync>;

/// WebSocket handler state.
pub struct WsState<R> {
    /// Store the connected clients follow.
    pub store: Arc<SnapshotStore<R>>,
    /// Invoked on `refresh` requests.
    pub on_refresh: RefreshHook,
}

impl<R> Clone for WsState<R> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            on_refresh: Arc::clone(&self.on_refresh),
        }
    }
}

impl<R> WsState<R> {
    /// Create new WebSocket state.
    #[must_use]
    pub fn new(store: Arc<SnapshotStore<R>>, on_refresh: RefreshHook) -> Self {
        Self { store, on_refresh }
    }
}

/// WebSocket upgrade handler.
///
/// Use this as an Axum route handler.
pub async fn ws_handler<R>(
    ws: WebSocketUpgrade,
    State(state): State<WsState<R>>,
) -> impl IntoResponse
where
    R: Record + Serialize,
{
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket<R>(socket: WebSocket, state: WsState<R>)
where
    R: Record + Serialize,
{
    let (mut sender, mut receiver) = socket.split();

    // Channel for sending messages to the client
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    // Spawn task to forward messages to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!("Failed to serialize message: {e}");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    // Current state first, then every live update
    let mut events = state.store.latest_plus_stream();
    let event_tx = tx.clone();
    let event_task = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match ServerMessage::from_event(&event) {
                Ok(msg) => {
                    if event_tx.send(msg).is_err() {
                        break;
                    }
                }
                Err(e) => tracing::error!("Failed to encode session event: {e}"),
            }
        }
    });

    // Handle incoming messages
    while let Some(msg) = receiver.next().await {
        let msg = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::error!("WebSocket error: {e}");
                break;
            }
        };

        let client_msg: ClientMessage = match serde_json::from_str(&msg) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("Invalid client message: {e}");
                let _ = tx.send(ServerMessage::Failure {
                    message: format!("Invalid message: {e}"),
                });
                continue;
            }
        };

        match client_msg {
            ClientMessage::Ping => {
                let _ = tx.send(ServerMessage::Pong);
            }
            ClientMessage::Refresh => (state.on_refresh)(),
        }
    }

    event_task.abort();
    send_task.abort();
}

/// Create the history WebSocket router.
///
/// # Example
/// ```ignore
/// let app = Router::new()
///     .merge(create_history_router(store, Arc::new(|| start_refresh())));
/// ```
#[must_use]
pub fn create_history_router<R>(store: Arc<SnapshotStore<R>>, on_refresh: RefreshHook) -> axum::Router
where
    R: Record + Serialize,
{
    axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler::<R>))
        .with_state(WsState::new(store, on_refresh))
}
