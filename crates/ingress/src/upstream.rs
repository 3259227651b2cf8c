//! External-stream ingress: poll an upstream consumer with a bounded timeout
//! and forward each payload verbatim.

use std::time::Duration;

use {
    async_trait::async_trait,
    bytes::Bytes,
    thiserror::Error,
    tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, trace, warn},
};

use bidfeed_protocol::{UPSTREAM_RETRY_DELAY_MS, UpdateEvent};

use crate::{EventSink, ForwardError, IngestStats};

/// Outcome of a poll that produced no payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PollError {
    /// Nothing arrived within the timeout. Not an error; poll again.
    #[error("poll timed out")]
    Timeout,
    /// Recoverable upstream failure; logged and retried.
    #[error("upstream error: {0}")]
    Transient(String),
    /// The upstream will never yield again.
    #[error("upstream closed")]
    Closed,
}

/// A pull-based upstream event source (e.g. a message-queue consumer).
#[async_trait]
pub trait UpstreamConsumer: Send {
    /// Wait up to `timeout` for the next payload.
    async fn poll(&mut self, timeout: Duration) -> Result<Bytes, PollError>;

    /// Release the underlying resource. Called once when ingestion stops.
    async fn close(&mut self) {}
}

/// Drive `consumer` until `cancel` fires, the consumer closes, or the sink
/// goes away. The consumer is always closed before returning.
pub async fn run_upstream<C, S>(
    consumer: &mut C,
    sink: &S,
    poll_timeout: Duration,
    cancel: CancellationToken,
) -> IngestStats
where
    C: UpstreamConsumer + ?Sized,
    S: EventSink + ?Sized,
{
    let mut stats = IngestStats::default();
    let retry_delay = Duration::from_millis(UPSTREAM_RETRY_DELAY_MS);

    loop {
        let polled = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            polled = consumer.poll(poll_timeout) => polled,
        };

        match polled {
            Ok(payload) if payload.is_empty() => {
                debug!("skipping empty upstream payload");
            },
            Ok(payload) => {
                trace!(bytes = payload.len(), "upstream event received");
                match sink.forward(UpdateEvent::from_upstream(payload)) {
                    Ok(()) => stats.forwarded += 1,
                    Err(ForwardError::Full) => {
                        stats.dropped += 1;
                        warn!("hub queue full, dropping upstream event");
                    },
                    Err(ForwardError::Closed) => {
                        info!("hub stopped, ending upstream ingestion");
                        break;
                    },
                }
            },
            Err(PollError::Timeout) => stats.idle_polls += 1,
            Err(PollError::Transient(e)) => {
                stats.errors += 1;
                warn!(error = %e, "upstream read failed, retrying");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(retry_delay) => {},
                }
            },
            Err(PollError::Closed) => {
                info!("upstream closed");
                break;
            },
        }
    }

    consumer.close().await;
    info!(
        forwarded = stats.forwarded,
        dropped = stats.dropped,
        errors = stats.errors,
        "upstream ingestion stopped"
    );
    stats
}

/// Upstream fed by an in-process channel, for embedding the gateway behind
/// another producer.
pub struct ChannelConsumer {
    rx: mpsc::Receiver<Bytes>,
}

impl ChannelConsumer {
    pub fn new(rx: mpsc::Receiver<Bytes>) -> Self {
        Self { rx }
    }

    /// A consumer together with the sender that feeds it.
    pub fn channel(capacity: usize) -> (mpsc::Sender<Bytes>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::new(rx))
    }
}

#[async_trait]
impl UpstreamConsumer for ChannelConsumer {
    async fn poll(&mut self, timeout: Duration) -> Result<Bytes, PollError> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Err(_) => Err(PollError::Timeout),
            Ok(None) => Err(PollError::Closed),
            Ok(Some(payload)) => Ok(payload),
        }
    }

    async fn close(&mut self) {
        self.rx.close();
    }
}
