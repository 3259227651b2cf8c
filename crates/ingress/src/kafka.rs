//! Kafka upstream consumer (feature `kafka`).

use std::time::Duration;

use {
    async_trait::async_trait,
    bytes::Bytes,
    rdkafka::{
        ClientConfig,
        consumer::{Consumer, StreamConsumer},
        message::Message,
    },
    tracing::info,
};

use bidfeed_config::KafkaConfig;

use crate::{
    IngressError,
    upstream::{PollError, UpstreamConsumer},
};

/// Group-tracked consumer subscribed to one topic.
pub struct KafkaConsumer {
    inner: StreamConsumer,
    topic: String,
}

impl KafkaConsumer {
    /// Create the consumer and subscribe. Failure here is fatal to startup.
    pub fn connect(config: &KafkaConfig) -> Result<Self, IngressError> {
        let mut client = ClientConfig::new();
        client
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)
            .set("auto.offset.reset", &config.offset_reset)
            .set("enable.partition.eof", "false");
        for (key, value) in &config.properties {
            client.set(key, value);
        }

        let inner: StreamConsumer = client
            .create()
            .map_err(|e| IngressError::Connect(e.to_string()))?;
        inner
            .subscribe(&[config.topic.as_str()])
            .map_err(|e| IngressError::Connect(e.to_string()))?;

        info!(
            brokers = %config.brokers,
            group_id = %config.group_id,
            topic = %config.topic,
            "kafka consumer subscribed"
        );
        Ok(Self {
            inner,
            topic: config.topic.clone(),
        })
    }
}

#[async_trait]
impl UpstreamConsumer for KafkaConsumer {
    async fn poll(&mut self, timeout: Duration) -> Result<Bytes, PollError> {
        match tokio::time::timeout(timeout, self.inner.recv()).await {
            Err(_) => Err(PollError::Timeout),
            Ok(Err(e)) => Err(PollError::Transient(e.to_string())),
            Ok(Ok(msg)) => Ok(msg.payload().map(Bytes::copy_from_slice).unwrap_or_default()),
        }
    }

    async fn close(&mut self) {
        self.inner.unsubscribe();
        info!(topic = %self.topic, "kafka consumer released");
    }
}
