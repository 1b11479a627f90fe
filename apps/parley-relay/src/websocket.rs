use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use metrics::counter;
use parley_proto::{ClientEvent, UserId};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::handlers::AppState;
use crate::router::{DropReason, RouteOutcome};
use crate::state::{Connection, RelayState};

#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    #[serde(rename = "userId", default)]
    user_id: Option<String>,
}

/// WebSocket upgrade handler for `/socket?userId=<id>`.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<ConnectQuery>,
    State(state): State<AppState>,
) -> Response {
    let user = UserId::parse_optional(query.user_id.as_deref());
    let relay = state.relay.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, user, relay))
}

async fn handle_socket(socket: WebSocket, user: Option<UserId>, relay: Arc<RelayState>) {
    let (mut sender, mut receiver) = socket.split();
    let Connection {
        handle,
        mut outbound,
    } = relay.connect(user.clone());
    counter!("parley_connections_total", 1);
    info!(session = %handle, user = ?user.as_ref().map(UserId::as_str), "websocket connected");

    let writer = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(err) => {
                    warn!(session = %handle, error = %err, "failed to encode event");
                    continue;
                }
            };
            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        debug!(session = %handle, "writer task finished");
    });

    while let Some(frame) = receiver.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                warn!(session = %handle, error = %err, "websocket read error");
                break;
            }
        };

        let text = match frame {
            Message::Text(text) => text,
            // Some clients send JSON in binary frames.
            Message::Binary(data) => match String::from_utf8(data) {
                Ok(text) => text,
                Err(_) => {
                    debug!(session = %handle, "ignoring non-UTF8 binary frame");
                    continue;
                }
            },
            Message::Close(_) => {
                debug!(session = %handle, "client closed websocket");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        let event = match serde_json::from_str::<ClientEvent>(&text) {
            Ok(event) => event,
            Err(err) => {
                warn!(session = %handle, error = %err, "ignoring malformed client event");
                continue;
            }
        };

        if let RouteOutcome::Dropped(DropReason::Anonymous) =
            relay.router().route_from_connection(user.as_ref(), event)
        {
            debug!(session = %handle, "signal from unidentified connection dropped");
        }
    }

    relay.disconnect(user.as_ref(), handle);
    writer.abort();
    info!(session = %handle, user = ?user.as_ref().map(UserId::as_str), "websocket disconnected");
}
