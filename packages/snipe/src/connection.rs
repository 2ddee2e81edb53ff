//! Connection handle over one upgraded WebSocket.
//!
//! The socket is split so the read side (liveness monitor) and the write
//! side (relay loop, prober) can run at the same time; each half sits behind
//! its own lock and neither path ever waits on the other. A local `close()`
//! wakes a pending read, so whoever closes the handle ends the reader too.

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::time::Instant;
use tracing::debug;

use crate::error::{RecvError, SendError};

/// One inbound message unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
    /// Peer-initiated liveness probe (ping).
    Probe,
    /// Liveness acknowledgement (pong).
    Ack,
}

/// Shared read deadline. `None` means reads wait indefinitely.
#[derive(Clone, Debug)]
pub struct Deadline(Arc<watch::Sender<Option<Instant>>>);

impl Deadline {
    fn new() -> Self {
        Self(Arc::new(watch::Sender::new(None)))
    }

    pub fn get(&self) -> Option<Instant> {
        *self.0.borrow()
    }

    pub fn set(&self, at: Option<Instant>) {
        self.0.send_replace(at);
    }

    /// Move the deadline to `window` from now.
    pub fn extend(&self, window: Duration) {
        self.set(Some(Instant::now() + window));
    }
}

type AckHandler = Box<dyn Fn(&Deadline) + Send + Sync>;

/// Upper bound on delivering the close frame. A writer stuck behind a peer
/// that stopped reading must not hold up the session ending.
const CLOSE_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Apply the inbound cap at the transport, so oversize frames are refused
/// from their header instead of being buffered first.
pub fn limit_upgrade(ws: WebSocketUpgrade, max_frame_bytes: usize) -> WebSocketUpgrade {
    ws.max_frame_size(max_frame_bytes)
        .max_message_size(max_frame_bytes)
}

pub struct ConnectionHandle {
    writer: Mutex<SplitSink<WebSocket, Message>>,
    reader: Mutex<SplitStream<WebSocket>>,
    deadline: Deadline,
    on_ack: Mutex<Option<AckHandler>>,
    max_frame_bytes: usize,
    closed: watch::Sender<bool>,
}

impl ConnectionHandle {
    pub fn new(socket: WebSocket, max_frame_bytes: usize) -> Arc<Self> {
        let (writer, reader) = socket.split();
        Arc::new(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            deadline: Deadline::new(),
            on_ack: Mutex::new(None),
            max_frame_bytes,
            closed: watch::Sender::new(false),
        })
    }

    /// Send one text frame. No retry: the caller decides what a failure means.
    pub async fn send(&self, payload: &str) -> Result<(), SendError> {
        if self.is_closed() {
            return Err(SendError::new("connection closed"));
        }
        self.writer
            .lock()
            .await
            .send(Message::Text(payload.into()))
            .await
            .map_err(|e| SendError::new(e.to_string()))
    }

    /// Send a liveness probe on the write path.
    pub async fn ping(&self) -> Result<(), SendError> {
        if self.is_closed() {
            return Err(SendError::new("connection closed"));
        }
        self.writer
            .lock()
            .await
            .send(Message::Ping(Bytes::new()))
            .await
            .map_err(|e| SendError::new(e.to_string()))
    }

    /// Wait for the next inbound frame, the read deadline, or close from
    /// either side.
    pub async fn receive_next(&self) -> Result<Frame, RecvError> {
        let next = {
            let mut reader = self.reader.lock().await;
            let closed = self.closed.subscribe();
            let read = async {
                tokio::select! {
                    next = reader.next() => Ok(next),
                    _ = closed_locally(closed) => {
                        Err(RecvError::closed("connection closed locally"))
                    }
                }
            };
            match self.deadline.get() {
                Some(at) => tokio::time::timeout_at(at, read)
                    .await
                    .map_err(|_| RecvError::Timeout)??,
                None => read.await?,
            }
        };

        let msg = match next {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                let reason = e.to_string();
                if let Some(len) = oversize_len(&reason) {
                    return Err(self.reject_oversize(len).await);
                }
                return Err(RecvError::closed(reason));
            }
            None => return Err(RecvError::closed("stream ended")),
        };

        match msg {
            Message::Text(text) => {
                self.check_size(text.len()).await?;
                Ok(Frame::Text(text.to_string()))
            }
            Message::Binary(data) => {
                self.check_size(data.len()).await?;
                Ok(Frame::Binary(data))
            }
            Message::Ping(_) => Ok(Frame::Probe),
            Message::Pong(_) => {
                if let Some(handler) = self.on_ack.lock().await.as_ref() {
                    handler(&self.deadline);
                }
                Ok(Frame::Ack)
            }
            Message::Close(frame) => {
                let reason = match frame {
                    Some(f) if !f.reason.is_empty() => format!("peer closed: {}", f.reason),
                    Some(f) => format!("peer closed with code {}", f.code),
                    None => "peer closed".to_string(),
                };
                Err(RecvError::closed(reason))
            }
        }
    }

    pub fn set_read_deadline(&self, at: Option<Instant>) {
        self.deadline.set(at);
    }

    pub fn read_deadline(&self) -> Option<Instant> {
        self.deadline.get()
    }

    /// Register the callback run on every inbound acknowledgement.
    pub async fn set_liveness_ack_handler<F>(&self, handler: F)
    where
        F: Fn(&Deadline) + Send + Sync + 'static,
    {
        *self.on_ack.lock().await = Some(Box::new(handler));
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Send a normal close frame and shut the write half. Idempotent.
    pub async fn close(&self) {
        self.close_with(close_code::NORMAL, "").await;
    }

    async fn close_with(&self, code: u16, reason: &str) {
        let first = self.closed.send_if_modified(|closed| !std::mem::replace(closed, true));
        if !first {
            return;
        }
        let frame = CloseFrame {
            code,
            reason: reason.into(),
        };
        let deliver = async {
            let mut writer = self.writer.lock().await;
            if let Err(e) = writer.send(Message::Close(Some(frame))).await {
                debug!("close frame not delivered: {}", e);
            }
            if let Err(e) = writer.close().await {
                debug!("failed to shut write half: {}", e);
            }
        };
        if tokio::time::timeout(CLOSE_WRITE_TIMEOUT, deliver).await.is_err() {
            debug!(code, "write path stalled, closed without a close frame");
        }
    }

    async fn check_size(&self, len: usize) -> Result<(), RecvError> {
        if len > self.max_frame_bytes {
            return Err(self.reject_oversize(len).await);
        }
        Ok(())
    }

    async fn reject_oversize(&self, len: usize) -> RecvError {
        self.close_with(close_code::SIZE, "message too big").await;
        RecvError::ProtocolViolation {
            len,
            limit: self.max_frame_bytes,
        }
    }
}

/// Payload size from a transport capacity error
/// (`Space limit exceeded: Message too long: 4096 > 512`).
fn oversize_len(reason: &str) -> Option<usize> {
    let (_, tail) = reason.split_once("Message too long: ")?;
    tail.split(" > ").next()?.trim().parse().ok()
}

async fn closed_locally(mut closed: watch::Receiver<bool>) {
    let _ = closed.wait_for(|closed| *closed).await;
}
