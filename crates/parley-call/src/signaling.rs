use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parley_proto::{socket_url, ClientEvent, ServerEvent, UserId};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, trace, warn};

use crate::error::SignalingError;
use crate::sink::SignalSink;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// A registered connection to the relay.
///
/// Presence snapshots land in a watch channel; every other relay event is
/// queued on the receiver returned by [`SignalingClient::connect`]. That
/// receiver closes when the relay connection does.
pub struct SignalingClient {
    user: UserId,
    send_tx: mpsc::UnboundedSender<ClientEvent>,
    presence: watch::Receiver<Vec<UserId>>,
    reader: JoinHandle<()>,
}

impl SignalingClient {
    pub async fn connect(
        relay_url: &str,
        user: UserId,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ServerEvent>), SignalingError> {
        let url = socket_url(relay_url, Some(user.as_str()));
        let (ws_stream, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url.as_str()))
            .await
            .map_err(|_| SignalingError::Timeout)??;
        debug!(url = %url, user = %user, "relay websocket connected");
        let (mut ws_write, mut ws_read) = ws_stream.split();

        let (send_tx, mut send_rx) = mpsc::unbounded_channel::<ClientEvent>();
        let (events_tx, events_rx) = mpsc::unbounded_channel::<ServerEvent>();
        let (presence_tx, presence) = watch::channel(Vec::new());

        tokio::spawn(async move {
            while let Some(event) = send_rx.recv().await {
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(err) => {
                        warn!(error = %err, "failed to encode client event");
                        continue;
                    }
                };
                if ws_write.send(Message::Text(text.into())).await.is_err() {
                    return;
                }
            }
            let _ = ws_write.send(Message::Close(None)).await;
        });

        let reader = tokio::spawn(async move {
            while let Some(frame) = ws_read.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text.as_str().to_owned(),
                    Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => text,
                        Err(_) => continue,
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => break,
                    Err(err) => {
                        warn!(error = %err, "relay websocket error");
                        break;
                    }
                };
                trace!(len = text.len(), "relay frame");
                match serde_json::from_str::<ServerEvent>(&text) {
                    Ok(ServerEvent::OnlineUsers(users)) => {
                        presence_tx.send_replace(users);
                    }
                    Ok(event) => {
                        if events_tx.send(event).is_err() {
                            debug!("relay event receiver dropped");
                        }
                    }
                    Err(err) => warn!(error = %err, "unrecognised relay frame"),
                }
            }
            debug!("relay websocket closed");
        });

        let client = Self {
            user,
            send_tx,
            presence,
            reader,
        };
        Ok((client, events_rx))
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }

    /// Latest presence snapshot pushed by the relay.
    pub fn online_users(&self) -> Vec<UserId> {
        self.presence.borrow().clone()
    }

    pub fn is_online(&self, user: &UserId) -> bool {
        self.presence.borrow().contains(user)
    }

    pub fn presence(&self) -> watch::Receiver<Vec<UserId>> {
        self.presence.clone()
    }
}

impl SignalSink for SignalingClient {
    fn send(&self, event: ClientEvent) -> Result<(), SignalingError> {
        trace!(kind = event.kind().as_str(), to = %event.target(), "sending signal");
        self.send_tx.send(event).map_err(|_| SignalingError::Closed)
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        // The writer exits and closes the socket once `send_tx` is dropped.
        self.reader.abort();
    }
}
