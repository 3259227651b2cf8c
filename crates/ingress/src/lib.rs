//! Event ingress: turns upstream bid events or synthetic prices into
//! [`UpdateEvent`]s and hands them to an [`EventSink`] without ever waiting
//! on delivery.

pub mod generator;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod upstream;

use std::sync::Arc;

use {
    thiserror::Error,
    tokio::task::JoinHandle,
    tokio_util::sync::CancellationToken,
    tracing::info,
};

use {
    bidfeed_config::{IngressConfig, IngressSource},
    bidfeed_protocol::UpdateEvent,
};

pub use {
    generator::PriceGenerator,
    upstream::{ChannelConsumer, PollError, UpstreamConsumer, run_upstream},
};

/// Why an event could not be handed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ForwardError {
    #[error("hub queue is full")]
    Full,
    #[error("hub is no longer running")]
    Closed,
}

/// Destination for ingested events. Implementations must not block.
pub trait EventSink: Send + Sync {
    fn forward(&self, event: UpdateEvent) -> Result<(), ForwardError>;
}

/// Startup failures of an ingress source. These are fatal.
#[derive(Debug, Error)]
pub enum IngressError {
    #[error("failed to connect upstream consumer: {0}")]
    Connect(String),
    #[error("ingress source '{0}' is not available in this build")]
    Unsupported(&'static str),
}

/// Counters reported when an ingress loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub forwarded: u64,
    pub dropped: u64,
    pub idle_polls: u64,
    pub errors: u64,
}

/// Build the configured source and run it on its own task until `cancel`
/// fires or the sink closes.
///
/// Construction happens before spawning so an unreachable upstream fails
/// startup instead of a background task.
pub fn spawn_ingress(
    config: &IngressConfig,
    sink: Arc<dyn EventSink>,
    cancel: CancellationToken,
) -> Result<JoinHandle<IngestStats>, IngressError> {
    match config.source {
        IngressSource::Generator => {
            let generator = PriceGenerator::from_config(&config.generator);
            info!(
                auction_id = %generator.auction_id(),
                interval_ms = config.generator.interval_ms,
                "starting synthetic price generator"
            );
            Ok(tokio::spawn(async move {
                generator.run(sink.as_ref(), cancel).await
            }))
        },
        IngressSource::Kafka => spawn_kafka(config, sink, cancel),
    }
}

#[cfg(feature = "kafka")]
fn spawn_kafka(
    config: &IngressConfig,
    sink: Arc<dyn EventSink>,
    cancel: CancellationToken,
) -> Result<JoinHandle<IngestStats>, IngressError> {
    let mut consumer = kafka::KafkaConsumer::connect(&config.kafka)?;
    let poll_timeout = config.kafka.poll_timeout();
    Ok(tokio::spawn(async move {
        run_upstream(&mut consumer, sink.as_ref(), poll_timeout, cancel).await
    }))
}

#[cfg(not(feature = "kafka"))]
fn spawn_kafka(
    _config: &IngressConfig,
    _sink: Arc<dyn EventSink>,
    _cancel: CancellationToken,
) -> Result<JoinHandle<IngestStats>, IngressError> {
    Err(IngressError::Unsupported("kafka"))
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Sink that records events and can be told to refuse them.
    #[derive(Default)]
    pub struct RecordingSink {
        pub events: Mutex<Vec<UpdateEvent>>,
        pub refuse_with: Mutex<Option<ForwardError>>,
    }

    impl RecordingSink {
        pub fn taken(&self) -> Vec<UpdateEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    impl EventSink for RecordingSink {
        fn forward(&self, event: UpdateEvent) -> Result<(), ForwardError> {
            if let Some(err) = *self.refuse_with.lock().unwrap() {
                return Err(err);
            }
            self.events.lock().unwrap().push(event);
            Ok(())
        }
    }
}
