//! # WebSocket Notification Reader
//!
//! Connects to the daemon's notification socket and forwards decoded frames
//! as [`NetworkEvent`]s. The reader never reconnects on its own. Once the task
//! has exited, the client's liveness probe reports the link as dead, so the
//! next health check re-runs the handshake and resubscribes.

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

use super::client::NetworkError;
use super::events::NetworkEvent;

/// Opens the socket and spawns the read loop. Returns once connected.
pub async fn spawn_reader(
    url: &str,
    events: mpsc::UnboundedSender<NetworkEvent>,
) -> Result<JoinHandle<()>, NetworkError> {
    let (ws_stream, _) = connect_async(url)
        .await
        .map_err(|e| NetworkError::ConnectionBroken(format!("websocket: {e}")))?;
    tracing::info!("ws connection established");

    let handle = tokio::spawn(async move {
        let (_write, mut read) = ws_stream.split();
        while let Some(msg) = read.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    if !forward(text.as_str(), &events) {
                        break;
                    }
                }
                Ok(Message::Close(_)) => {
                    tracing::warn!("ws stream closed by daemon");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(error = %e, "ws read error");
                    break;
                }
            }
        }
        tracing::debug!("ws reader stopped");
    });
    Ok(handle)
}

/// Decodes and forwards one frame. Returns false once nobody is listening.
fn forward(raw: &str, events: &mpsc::UnboundedSender<NetworkEvent>) -> bool {
    match NetworkEvent::from_frame(raw) {
        Ok(event) => events.send(event).is_ok(),
        Err(e) => {
            tracing::warn!(error = %e, "dropping undecodable ws frame");
            true
        }
    }
}
