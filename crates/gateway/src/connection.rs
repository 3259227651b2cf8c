use std::{
    fmt,
    time::{Duration, Instant},
};

use {
    async_trait::async_trait,
    axum::extract::ws::{Message, Utf8Bytes, WebSocket},
    bytes::Bytes,
    futures::{SinkExt, stream::SplitSink},
    thiserror::Error,
    tokio_util::sync::CancellationToken,
};

use bidfeed_protocol::Topic;

use crate::auth::UserId;

// ── Identity ─────────────────────────────────────────────────────────────────

/// Hub-assigned connection identifier, unique for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

// ── Write half ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("connection already closed")]
    Closed,
    #[error("write failed: {0}")]
    Io(String),
    #[error("write timed out after {0:?}")]
    Timeout(Duration),
}

/// The outbound half of a viewer's transport.
#[async_trait]
pub trait ClientSink: Send {
    async fn send(&mut self, payload: Bytes) -> Result<(), DeliveryError>;

    /// Release the transport. Called at most once, by the registry.
    async fn close(&mut self);
}

/// Write half of an axum WebSocket.
pub struct WsSink {
    inner: SplitSink<WebSocket, Message>,
}

impl WsSink {
    pub fn new(inner: SplitSink<WebSocket, Message>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl ClientSink for WsSink {
    async fn send(&mut self, payload: Bytes) -> Result<(), DeliveryError> {
        self.inner
            .send(frame_for(payload))
            .await
            .map_err(|e| DeliveryError::Io(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.inner.send(Message::Close(None)).await;
        let _ = self.inner.close().await;
    }
}

/// Text frames for JSON, binary for anything that is not UTF-8. Both share
/// the payload buffer rather than copying it.
fn frame_for(payload: Bytes) -> Message {
    match Utf8Bytes::try_from(payload.clone()) {
        Ok(text) => Message::Text(text),
        Err(_) => Message::Binary(payload),
    }
}

// ── Connection ───────────────────────────────────────────────────────────────

/// One registered viewer.
pub struct Connection {
    id: ConnId,
    topic: Topic,
    user_id: Option<UserId>,
    sink: Box<dyn ClientSink>,
    dropped: CancellationToken,
    connected_at: Instant,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub fn new(id: ConnId, topic: Topic, sink: Box<dyn ClientSink>) -> Self {
        Self {
            id,
            topic,
            user_id: None,
            sink,
            dropped: CancellationToken::new(),
            connected_at: Instant::now(),
        }
    }

    pub fn with_user(mut self, user_id: Option<UserId>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    /// Fires once the hub has released this connection, so the read loop
    /// can stop waiting on a peer that will get no further writes.
    pub fn dropped_signal(&self) -> CancellationToken {
        self.dropped.clone()
    }

    pub(crate) async fn write(
        &mut self,
        payload: &Bytes,
        timeout: Duration,
    ) -> Result<(), DeliveryError> {
        match tokio::time::timeout(timeout, self.sink.send(payload.clone())).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout(timeout)),
        }
    }

    /// Release the transport. Consumes the handle, so it runs once.
    pub(crate) async fn release(mut self, timeout: Duration) -> Duration {
        self.dropped.cancel();
        let _ = tokio::time::timeout(timeout, self.sink.close()).await;
        self.connected_at.elapsed()
    }
}
