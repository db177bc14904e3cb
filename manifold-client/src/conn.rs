//! A multiplexed RPC connection over a controller WebSocket.
//!
//! One task owns the write half, one task owns the read half; callers get
//! a request id and a oneshot that resolves when the matching response
//! frame arrives. Long-poll calls (the summary watcher's `Next`) coexist
//! with short calls on the same socket.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use manifold_core::{Error, Result};

use crate::proto::{RequestFrame, ResponseFrame};

/// The socket type produced by the dialer.
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

type Pending = Arc<DashMap<u64, oneshot::Sender<Result<Value>>>>;

/// A live RPC connection. Dropping it closes the socket.
pub struct Connection {
    writer: mpsc::Sender<Message>,
    pending: Pending,
    next_id: AtomicU64,
    read_task: tokio::task::JoinHandle<()>,
    write_task: tokio::task::JoinHandle<()>,
}

impl Connection {
    /// Take ownership of a connected socket and start the pump tasks.
    pub fn start(stream: WsStream) -> Self {
        let (mut sink, mut source) = stream.split();
        let (writer, mut outbox) = mpsc::channel::<Message>(32);
        let pending: Pending = Arc::new(DashMap::new());

        let write_task = tokio::spawn(async move {
            while let Some(message) = outbox.recv().await {
                if sink.send(message).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let read_pending = pending.clone();
        let read_task = tokio::spawn(async move {
            while let Some(message) = source.next().await {
                let text = match message {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                };
                let frame: ResponseFrame = match serde_json::from_str(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!(error = %e, "dropping unparseable frame");
                        continue;
                    }
                };
                if let Some((_, tx)) = read_pending.remove(&frame.request_id) {
                    let _ = tx.send(frame.into_result());
                }
            }
            // Fail whatever is still in flight.
            let ids: Vec<u64> = read_pending.iter().map(|e| *e.key()).collect();
            for id in ids {
                if let Some((_, tx)) = read_pending.remove(&id) {
                    let _ = tx.send(Err(Error::connection_failed("connection closed")));
                }
            }
        });

        Self {
            writer,
            pending,
            next_id: AtomicU64::new(1),
            read_task,
            write_task,
        }
    }

    /// Issue one RPC and wait for its response.
    pub async fn call(
        &self,
        facade: &str,
        version: u32,
        method: &str,
        params: Value,
    ) -> Result<Value> {
        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = RequestFrame {
            request_id,
            facade: facade.to_string(),
            version,
            request: method.to_string(),
            params,
        };
        let text = serde_json::to_string(&frame)
            .map_err(|e| Error::unspecified(format!("encode request: {e}")))?;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id, tx);
        if self.writer.send(Message::Text(text.into())).await.is_err() {
            self.pending.remove(&request_id);
            return Err(Error::connection_failed("connection closed"));
        }
        rx.await
            .unwrap_or_else(|_| Err(Error::connection_failed("connection closed")))
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.read_task.abort();
        self.write_task.abort();
    }
}
