use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, warn};

use crate::error::ChatError;

/// Seam between the connection manager and the realtime chat backend.
/// `connect` establishes a brand-new connection, `reconnect` revives a
/// previously established one in place, and `ping` is a lightweight
/// liveness probe that never errors the caller out of its retry ladder.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn connect(&self) -> Result<(), ChatError>;
    async fn reconnect(&self) -> Result<(), ChatError>;
    async fn disconnect(&self) -> Result<(), ChatError>;
    async fn ping(&self) -> Result<bool, ChatError>;
    async fn send(&self, message: &str) -> Result<(), ChatError>;
    fn responses(&self) -> broadcast::Receiver<Value>;
    fn is_connected(&self) -> bool;
}

/// Production transport over a websocket. Inbound payloads are parsed as
/// JSON and fanned out on a broadcast channel; outbound text goes through
/// an mpsc sender owned by the write task.
pub struct WsChatTransport {
    url: String,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    responses: broadcast::Sender<Value>,
    connected: Arc<Mutex<bool>>,
    // Bumped on every connect so a stale read task cannot clobber the
    // connected flag of a newer connection.
    epoch: Arc<AtomicU64>,
}

impl WsChatTransport {
    pub fn new(url: impl Into<String>) -> Self {
        let (responses, _) = broadcast::channel(256);
        Self {
            url: url.into(),
            outbound: Mutex::new(None),
            responses,
            connected: Arc::new(Mutex::new(false)),
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    async fn establish(&self) -> Result<(), ChatError> {
        let (ws_stream, _) = connect_async(&self.url)
            .await
            .map_err(|e| ChatError::Transport(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        *self.connected.lock() = true;

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        *self.outbound.lock() = Some(tx);

        let responses = self.responses.clone();
        let connected = Arc::clone(&self.connected);
        let current_epoch = Arc::clone(&self.epoch);

        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(WsMessage::Text(text)) => {
                        match serde_json::from_str::<Value>(&text) {
                            Ok(payload) => {
                                let _ = responses.send(payload);
                            }
                            Err(e) => debug!("Discarding non-JSON chat frame: {}", e),
                        }
                    }
                    Ok(WsMessage::Close(_)) | Err(_) => {
                        if current_epoch.load(Ordering::SeqCst) == epoch {
                            *connected.lock() = false;
                        }
                        break;
                    }
                    _ => {}
                }
            }
            if current_epoch.load(Ordering::SeqCst) == epoch {
                *connected.lock() = false;
            }
        });

        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = write.send(WsMessage::Text(msg)).await {
                    warn!("Chat socket write failed: {}", e);
                    break;
                }
            }
            let _ = write.send(WsMessage::Close(None)).await;
        });

        Ok(())
    }
}

#[async_trait]
impl ChatTransport for WsChatTransport {
    async fn connect(&self) -> Result<(), ChatError> {
        self.establish().await
    }

    async fn reconnect(&self) -> Result<(), ChatError> {
        if self.outbound.lock().is_none() {
            return Err(ChatError::NotConnected);
        }
        self.establish().await
    }

    async fn disconnect(&self) -> Result<(), ChatError> {
        // Dropping the sender ends the write task, which sends Close.
        self.outbound.lock().take();
        *self.connected.lock() = false;
        Ok(())
    }

    async fn ping(&self) -> Result<bool, ChatError> {
        Ok(self.is_connected())
    }

    async fn send(&self, message: &str) -> Result<(), ChatError> {
        let sender = self
            .outbound
            .lock()
            .clone()
            .ok_or(ChatError::NotConnected)?;
        sender
            .send(message.to_string())
            .map_err(|e| ChatError::Transport(e.to_string()))
    }

    fn responses(&self) -> broadcast::Receiver<Value> {
        self.responses.subscribe()
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock()
    }
}
