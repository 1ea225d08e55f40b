//! Kafka-backed [`Publisher`].

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use serde::Deserialize;

use chainbridge_core::error::BridgeError;
use chainbridge_core::publisher::Publisher;

/// Producer settings. `properties` are passed to librdkafka verbatim and
/// override the named fields.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    /// Comma-separated `host:port` list.
    pub brokers: String,
    pub client_id: String,
    pub acks: String,
    pub message_timeout_ms: u64,
    pub retries: u32,
    /// `none`, `gzip`, `snappy`, `lz4` or `zstd`.
    pub compression: String,
    pub properties: BTreeMap<String, String>,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".into(),
            client_id: "chainbridge".into(),
            acks: "all".into(),
            message_timeout_ms: 5000,
            retries: 3,
            compression: "none".into(),
            properties: BTreeMap::new(),
        }
    }
}

impl KafkaConfig {
    /// librdkafka configuration for a producer.
    pub fn client_config(&self) -> ClientConfig {
        let mut cfg = ClientConfig::new();
        cfg.set("bootstrap.servers", &self.brokers)
            .set("client.id", &self.client_id)
            .set("acks", &self.acks)
            .set("message.timeout.ms", self.message_timeout_ms.to_string())
            .set("retries", self.retries.to_string())
            .set("retry.backoff.ms", "100")
            .set("compression.type", &self.compression);
        for (k, v) in &self.properties {
            cfg.set(k, v);
        }
        cfg
    }

    pub fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.message_timeout_ms)
    }
}

/// Publishes payloads without a key, letting the partitioner spread them.
#[derive(Clone)]
pub struct KafkaPublisher {
    producer: FutureProducer,
    timeout: Duration,
}

impl KafkaPublisher {
    pub fn new(config: &KafkaConfig) -> Result<Self, BridgeError> {
        let producer: FutureProducer = config
            .client_config()
            .create()
            .map_err(|e| BridgeError::Other(format!("failed to create Kafka producer: {e}")))?;

        tracing::info!(
            brokers = %config.brokers,
            client_id = %config.client_id,
            acks = %config.acks,
            "KafkaPublisher initialized"
        );

        Ok(Self {
            producer,
            timeout: config.message_timeout(),
        })
    }
}

#[async_trait]
impl Publisher for KafkaPublisher {
    async fn send(&self, topic: &str, payload: &[u8]) -> Result<(), BridgeError> {
        let record = FutureRecord::<(), [u8]>::to(topic).payload(payload);

        match self.producer.send(record, self.timeout).await {
            Ok((partition, offset)) => {
                tracing::trace!(topic, partition, offset, "delivered");
                Ok(())
            }
            Err((e, _)) => Err(BridgeError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}
