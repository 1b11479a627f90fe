use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use parley_proto::{socket_url, ClientEvent, ServerEvent, UserId};
use serde_json::json;
use tokio::time::{timeout, Duration, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

#[derive(Parser, Debug)]
#[command(name = "parley-relay")]
#[command(about = "Parley presence and signaling relay, plus a probe client")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect to a running relay and print the events it pushes
    Probe {
        /// Relay base URL (e.g. ws://localhost:8080)
        #[arg(short, long, default_value = "ws://localhost:8080")]
        url: String,

        /// Identity to register as; omit to connect anonymously
        #[arg(short = 'i', long)]
        user_id: Option<String>,

        /// Send an empty offer to this user after connecting
        #[arg(long)]
        offer_to: Option<String>,

        /// How long to listen before disconnecting
        #[arg(short, long, default_value_t = 10)]
        seconds: u64,
    },
}

pub async fn run_probe(
    url: String,
    user_id: Option<String>,
    offer_to: Option<String>,
    seconds: u64,
) -> Result<()> {
    let ws_url = socket_url(&url, user_id.as_deref());
    debug!("connecting probe to {}", ws_url);

    let (ws_stream, _) = timeout(Duration::from_secs(5), connect_async(ws_url.as_str()))
        .await
        .context("connection timeout - is the relay running?")?
        .with_context(|| format!("failed to connect to {ws_url}"))?;
    let (mut write, mut read) = ws_stream.split();

    if let Some(target) = offer_to {
        let offer = ClientEvent::Offer {
            offer: json!({ "type": "offer", "sdp": "" }),
            to: UserId::new(target),
        };
        write
            .send(Message::Text(serde_json::to_string(&offer)?.into()))
            .await
            .context("failed to send probe offer")?;
    }

    let deadline = Instant::now() + Duration::from_secs(seconds);
    loop {
        let frame = match tokio::time::timeout_at(deadline, read.next()).await {
            Err(_) => break,
            Ok(None) => {
                warn!("relay closed the connection");
                break;
            }
            Ok(Some(frame)) => frame.context("websocket error")?,
        };
        if let Message::Text(text) = frame {
            match serde_json::from_str::<ServerEvent>(text.as_str()) {
                Ok(event) => println!("{}", serde_json::to_string(&event)?),
                Err(err) => warn!("unrecognised relay frame: {err}"),
            }
        }
    }

    let _ = write.send(Message::Close(None)).await;
    Ok(())
}
