/// Config schema: server, session gate, hub tuning, and ingress source.
use std::{collections::HashMap, time::Duration};

use serde::{Deserialize, Serialize};

use bidfeed_protocol as protocol;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BidfeedConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub hub: HubConfig,
    pub ingress: IngressConfig,
}

/// HTTP/WebSocket listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Allowed CORS origins. Empty allows any origin.
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8081,
            cors_origins: Vec::new(),
        }
    }
}

/// Session gate in front of the upgrade endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Reject upgrades without a valid session cookie.
    pub required: bool,
    pub cookie_name: String,
    /// Seed sessions (token → user id) for the in-memory session store.
    pub sessions: HashMap<String, i64>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            required: true,
            cookie_name: protocol::SESSION_COOKIE.into(),
            sessions: HashMap::new(),
        }
    }
}

/// What happens to open viewer connections when the process shuts down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPolicy {
    /// Leave sockets to be torn down with the process.
    #[default]
    Leave,
    /// Close and deregister every connection before the hub exits.
    CloseAll,
}

/// Broadcast hub tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub queue_capacity: usize,
    pub write_timeout_ms: u64,
    /// Send the latest known payload for a topic to a viewer as it connects.
    pub replay_latest: bool,
    /// Most auctions whose latest payload is kept for replay. The least
    /// recently updated auction is evicted first; 0 keeps none.
    pub replay_cache_size: usize,
    pub shutdown_policy: ShutdownPolicy,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: protocol::HUB_QUEUE_CAPACITY,
            write_timeout_ms: protocol::WRITE_TIMEOUT_MS,
            replay_latest: true,
            replay_cache_size: protocol::REPLAY_CACHE_SIZE,
            shutdown_policy: ShutdownPolicy::Leave,
        }
    }
}

impl HubConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngressSource {
    /// Internal random price ticker.
    #[default]
    Generator,
    /// Upstream Kafka topic.
    Kafka,
}

impl std::fmt::Display for IngressSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Generator => "generator",
            Self::Kafka => "kafka",
        })
    }
}

impl std::str::FromStr for IngressSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "generator" => Ok(Self::Generator),
            "kafka" => Ok(Self::Kafka),
            other => Err(format!("unknown ingress source: {other}")),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IngressConfig {
    pub source: IngressSource,
    pub kafka: KafkaConfig,
    pub generator: GeneratorConfig,
}

/// Upstream consumer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    pub brokers: String,
    pub group_id: String,
    pub topic: String,
    pub poll_timeout_ms: u64,
    /// `auto.offset.reset`; "latest" only sees events published after start.
    pub offset_reset: String,
    /// Extra librdkafka properties passed through unchanged.
    pub properties: HashMap<String, String>,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".into(),
            group_id: protocol::DEFAULT_CONSUMER_GROUP.into(),
            topic: protocol::DEFAULT_UPSTREAM_TOPIC.into(),
            poll_timeout_ms: protocol::UPSTREAM_POLL_TIMEOUT_MS,
            offset_reset: "latest".into(),
            properties: HashMap::new(),
        }
    }
}

impl KafkaConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

/// Synthetic price ticker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub interval_ms: u64,
    pub auction_id: i64,
    pub min_price: u64,
    pub max_price: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            interval_ms: protocol::GENERATOR_INTERVAL_MS,
            auction_id: 2,
            min_price: 0,
            max_price: 100_000,
        }
    }
}

impl GeneratorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl BidfeedConfig {
    /// Reject settings the gateway cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.hub.queue_capacity == 0 {
            anyhow::bail!("hub.queue_capacity must be greater than 0");
        }
        if self.hub.write_timeout_ms == 0 {
            anyhow::bail!("hub.write_timeout_ms must be greater than 0");
        }
        if self.auth.cookie_name.trim().is_empty() {
            anyhow::bail!("auth.cookie_name must not be empty");
        }
        match self.ingress.source {
            IngressSource::Generator => {
                let g = &self.ingress.generator;
                if g.interval_ms == 0 {
                    anyhow::bail!("ingress.generator.interval_ms must be greater than 0");
                }
                if g.min_price > g.max_price {
                    anyhow::bail!(
                        "ingress.generator.min_price ({}) exceeds max_price ({})",
                        g.min_price,
                        g.max_price
                    );
                }
            },
            IngressSource::Kafka => {
                let k = &self.ingress.kafka;
                if k.brokers.trim().is_empty() {
                    anyhow::bail!("ingress.kafka.brokers must not be empty");
                }
                if k.topic.trim().is_empty() {
                    anyhow::bail!("ingress.kafka.topic must not be empty");
                }
                if k.poll_timeout_ms == 0 {
                    anyhow::bail!("ingress.kafka.poll_timeout_ms must be greater than 0");
                }
            },
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = BidfeedConfig::default();
        config.validate().unwrap();
        assert_eq!(config.server.port, 8081);
        assert_eq!(config.ingress.source, IngressSource::Generator);
        assert_eq!(config.ingress.generator.interval_ms, 500);
        assert_eq!(config.ingress.kafka.topic, "bids");
        assert_eq!(config.ingress.kafka.offset_reset, "latest");
        assert!(config.auth.required);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: BidfeedConfig = toml::from_str(
            r#"
            [hub]
            shutdown_policy = "close_all"

            [ingress]
            source = "kafka"
            "#,
        )
        .unwrap();
        assert_eq!(config.hub.shutdown_policy, ShutdownPolicy::CloseAll);
        assert_eq!(config.ingress.source, IngressSource::Kafka);
        assert_eq!(config.ingress.kafka.group_id, "auction-ws-group");
        assert_eq!(config.hub.queue_capacity, protocol::HUB_QUEUE_CAPACITY);
        assert_eq!(config.hub.replay_cache_size, protocol::REPLAY_CACHE_SIZE);
    }

    #[test]
    fn inverted_price_range_is_rejected() {
        let mut config = BidfeedConfig::default();
        config.ingress.generator.min_price = 10;
        config.ingress.generator.max_price = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn kafka_checks_only_apply_to_kafka_source() {
        let mut config = BidfeedConfig::default();
        config.ingress.kafka.brokers.clear();
        config.validate().unwrap();
        config.ingress.source = IngressSource::Kafka;
        assert!(config.validate().is_err());
    }

    #[test]
    fn source_parses_case_insensitively() {
        assert_eq!("Kafka".parse::<IngressSource>(), Ok(IngressSource::Kafka));
        assert!("redis".parse::<IngressSource>().is_err());
    }
}
