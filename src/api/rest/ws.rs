use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use serde::Deserialize;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::state::AppState;

#[derive(Deserialize)]
pub struct WsQuery {
    /// When set, only events addressed to this party are delivered.
    pub party_id: Option<Uuid>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.party_id))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, party_id: Option<Uuid>) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = BroadcastStream::new(state.gateway.subscribe());

    info!(party_id = ?party_id, "live channel client connected");

    let send_task = tokio::spawn(async move {
        while let Some(result) = events.next().await {
            let notification = match result {
                Ok(notification) => notification,
                // A slow client that lagged behind just misses the dropped
                // events; the session stays up.
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(party_id = ?party_id, skipped, "live channel client lagged");
                    continue;
                }
            };

            if let Some(party) = party_id {
                if notification.party_id != party {
                    continue;
                }
            }

            let json = match serde_json::to_string(&notification) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize notification for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    info!(party_id = ?party_id, "live channel client disconnected");
}
