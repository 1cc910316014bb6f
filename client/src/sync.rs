use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

use crate::protocol::{ClientMessage, ControlAction, ControlPayload, ServerMessage};

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(12);

/// WebSocket transport for one seat. Outbound messages are queued on an
/// unbounded channel; a dropped connection simply stops the queue.
pub struct SyncClient {
    inner: Arc<SyncClientState>,
}

struct SyncClientState {
    tx: Mutex<Option<mpsc::UnboundedSender<WsMessage>>>,
}

impl SyncClient {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SyncClientState {
                tx: Mutex::new(None),
            }),
        }
    }

    /// Connect and start pumping. Returns a receiver that resolves when
    /// the socket closes. Inbound frames that do not parse as protocol
    /// messages are dropped.
    pub async fn connect<F>(&self, url: &str, on_message: F) -> Result<oneshot::Receiver<()>>
    where
        F: Fn(ServerMessage) + Send + Sync + 'static,
    {
        let (ws_stream, _) = connect_async(url)
            .await
            .context("Failed to connect to server")?;

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
        *self.inner.tx.lock() = Some(tx.clone());

        let (disconnect_tx, disconnect_rx) = oneshot::channel();
        let disconnect_signal = Arc::new(Mutex::new(Some(disconnect_tx)));

        // Sender task
        let send_inner = Arc::clone(&self.inner);
        let send_signal = Arc::clone(&disconnect_signal);
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if ws_sender.send(msg).await.is_err() {
                    break;
                }
            }
            send_inner.clear_transport();
            if let Some(tx) = send_signal.lock().take() {
                let _ = tx.send(());
            }
        });

        // Receiver task
        let handler = Arc::new(on_message);
        let recv_inner = Arc::clone(&self.inner);
        let recv_signal = Arc::clone(&disconnect_signal);
        tokio::spawn(async move {
            while let Some(msg) = ws_receiver.next().await {
                match msg {
                    Ok(WsMessage::Text(text)) => {
                        if let Ok(parsed) = serde_json::from_str::<ServerMessage>(&text) {
                            handler(parsed);
                        }
                    }
                    Ok(WsMessage::Close(_)) => break,
                    Err(_) => break,
                    _ => {}
                }
            }
            recv_inner.clear_transport();
            if let Some(tx) = recv_signal.lock().take() {
                let _ = tx.send(());
            }
        });

        // Keep-alive pings
        let ping_inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            loop {
                sleep(KEEPALIVE_INTERVAL).await;
                if ping_inner.enqueue_ws(WsMessage::Ping(Vec::new().into())).is_err() {
                    break;
                }
            }
        });

        Ok(disconnect_rx)
    }

    pub fn send_chat(&self, text: &str) -> Result<()> {
        self.send_message(&ClientMessage::Chat(text.to_string()))
    }

    pub fn set_video(&self, video: &str) -> Result<()> {
        self.send_message(&ClientMessage::SetVideo(video.to_string()))
    }

    pub fn control(&self, action: ControlAction, time: f64) -> Result<()> {
        self.send_message(&ClientMessage::Control(ControlPayload { action, time }))
    }

    fn send_message(&self, msg: &ClientMessage) -> Result<()> {
        let json = serde_json::to_string(msg).context("Failed to serialize message")?;
        if let Some(tx) = self.inner.tx.lock().clone() {
            tx.send(WsMessage::Text(json.into()))
                .context("Failed to queue message to socket")?;
        }
        Ok(())
    }
}

impl Default for SyncClient {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncClientState {
    fn clear_transport(&self) {
        *self.tx.lock() = None;
    }

    fn enqueue_ws(&self, message: WsMessage) -> Result<(), ()> {
        if let Some(tx) = self.tx.lock().clone() {
            tx.send(message).map_err(|_| ())
        } else {
            Err(())
        }
    }
}

/// Join URL for a room: `ws(s)://host/ws?room=...&name=...&pin=...`.
pub fn join_url(base: &str, room: &str, name: &str, pin: &str) -> String {
    format!(
        "{}/ws?room={}&name={}&pin={}",
        base.trim_end_matches('/'),
        urlencoding::encode(room),
        urlencoding::encode(name),
        urlencoding::encode(pin)
    )
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|dur| dur.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_url_encodes_query_values() {
        let url = join_url("ws://localhost:3000/", "movie night", "mia & ben", "12#4");
        assert_eq!(
            url,
            "ws://localhost:3000/ws?room=movie%20night&name=mia%20%26%20ben&pin=12%234"
        );
    }

    #[test]
    fn send_without_transport_is_a_quiet_no_op() {
        let client = SyncClient::new();
        assert!(client.send_chat("hello").is_ok());
    }
}
