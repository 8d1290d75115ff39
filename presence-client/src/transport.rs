//! Relay transport. A [`Link`] is one live connection expressed as a pair of
//! channels; when the inbound channel closes, the connection is gone.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::{debug, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::error::ClientError;

pub struct Link {
    pub tx: mpsc::UnboundedSender<String>,
    pub rx: mpsc::UnboundedReceiver<Result<String, ClientError>>,
    pub guard: TaskGuard,
}

impl Link {
    pub fn new(
        tx: mpsc::UnboundedSender<String>,
        rx: mpsc::UnboundedReceiver<Result<String, ClientError>>,
    ) -> Self {
        Self {
            tx,
            rx,
            guard: TaskGuard::default(),
        }
    }

    /// Queue a text frame. Returns false once the writer side is gone.
    pub fn send(&self, text: String) -> bool {
        self.tx.send(text).is_ok()
    }
}

/// Aborts the tasks it holds when dropped.
#[derive(Default)]
pub struct TaskGuard(Vec<JoinHandle<()>>);

impl Drop for TaskGuard {
    fn drop(&mut self) {
        for task in &self.0 {
            task.abort();
        }
    }
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Link, ClientError>;
}

/// WebSocket connector (ws:// and wss:// through native-tls).
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Link, ClientError> {
        let (ws, _) = tokio::time::timeout(self.connect_timeout, connect_async(url))
            .await
            .map_err(|_| ClientError::Timeout)?
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        debug!("Connected to relay at {}", url);

        let (mut ws_sender, mut ws_receiver) = ws.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        // The writer is not guarded: it drains queued frames and closes the
        // socket once every sender is dropped.
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = ws_sender.send(Message::Text(text)).await {
                    warn!("Relay write failed: {}", e);
                    break;
                }
            }
            let _ = ws_sender.close().await;
        });

        let reader = tokio::spawn(async move {
            while let Some(result) = ws_receiver.next().await {
                match result {
                    Ok(Message::Text(text)) => {
                        if in_tx.send(Ok(text)).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        debug!("Relay closed the connection: {:?}", frame);
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let _ = in_tx.send(Err(ClientError::Transport(e.to_string())));
                        break;
                    }
                }
            }
        });

        let mut link = Link::new(out_tx, in_rx);
        link.guard = TaskGuard(vec![reader]);
        Ok(link)
    }
}
