//! Pub/sub channel used to hand descriptors to subscribers.
//!
//! The pipeline only needs a publish primitive that blocks until the broker
//! acknowledges delivery. [`KafkaChannel`] provides it on top of an
//! `rdkafka` [`FutureProducer`].

use crate::config::{ConfigError, KafkaConfig};
use crate::error::{PublishError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Value of the `message-type` header on descriptor messages
pub const DESCRIPTOR_MESSAGE_TYPE: &str = "claim_descriptor";

/// Delivery guarantee requested for a descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Qos {
    AtMostOnce,
    #[default]
    AtLeastOnce,
    ExactlyOnce,
}

impl Qos {
    pub fn as_u8(self) -> u8 {
        match self {
            Qos::AtMostOnce => 0,
            Qos::AtLeastOnce => 1,
            Qos::ExactlyOnce => 2,
        }
    }
}

impl TryFrom<u8> for Qos {
    type Error = String;

    fn try_from(level: u8) -> std::result::Result<Self, Self::Error> {
        match level {
            0 => Ok(Qos::AtMostOnce),
            1 => Ok(Qos::AtLeastOnce),
            2 => Ok(Qos::ExactlyOnce),
            other => Err(format!("invalid QoS level {}, expected 0, 1 or 2", other)),
        }
    }
}

impl From<Qos> for u8 {
    fn from(qos: Qos) -> Self {
        qos.as_u8()
    }
}

/// Acknowledgment returned once the broker has accepted a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryAck {
    pub topic: String,
    pub partition: Option<i32>,
    pub offset: Option<i64>,
}

/// Already-connected publish/subscribe client
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PubSubChannel: Send + Sync {
    /// Publish `payload` on `topic` and wait for the delivery acknowledgment
    async fn publish(
        &self,
        topic: &str,
        qos: Qos,
        retained: bool,
        payload: Bytes,
    ) -> Result<DeliveryAck>;
}

/// Kafka-backed channel
///
/// Kafka has no per-message QoS or retained flag; both are forwarded as the
/// `qos` and `retained` headers so subscribers can honour them. Delivery is
/// governed by the producer `acks` setting.
pub struct KafkaChannel {
    producer: FutureProducer,
    config: Arc<KafkaConfig>,
    timeout: Duration,
}

impl KafkaChannel {
    /// Create a new channel with the given configuration
    pub fn new(config: KafkaConfig) -> std::result::Result<Self, ConfigError> {
        config.validate()?;

        info!("Creating Kafka producer for {}", config.bootstrap_servers);

        let producer: FutureProducer = config
            .build_producer_config()
            .create()
            .map_err(|e| ConfigError::ClientCreation(e.to_string()))?;

        let timeout = config.request_timeout();

        Ok(Self {
            producer,
            config: Arc::new(config),
            timeout,
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &KafkaConfig {
        &self.config
    }

    /// Flush all pending messages
    pub fn flush(&self, timeout: Duration) -> Result<()> {
        self.producer
            .flush(Timeout::After(timeout))
            .map_err(|e| PublishError::Publish {
                topic: "*".to_string(),
                message: format!("flush failed after {:?}: {}", timeout, e),
            })
    }
}

#[async_trait]
impl PubSubChannel for KafkaChannel {
    #[instrument(skip(self, payload), fields(size_bytes = payload.len()))]
    async fn publish(
        &self,
        topic: &str,
        qos: Qos,
        retained: bool,
        payload: Bytes,
    ) -> Result<DeliveryAck> {
        let qos_value = qos.as_u8().to_string();
        let retained_value = retained.to_string();

        let headers = OwnedHeaders::new()
            .insert(Header {
                key: "message-type",
                value: Some(DESCRIPTOR_MESSAGE_TYPE),
            })
            .insert(Header {
                key: "qos",
                value: Some(qos_value.as_str()),
            })
            .insert(Header {
                key: "retained",
                value: Some(retained_value.as_str()),
            });

        let record = FutureRecord::<(), [u8]>::to(topic)
            .payload(payload.as_ref())
            .headers(headers);

        let (partition, offset) = self
            .producer
            .send(record, Timeout::After(self.timeout))
            .await
            .map_err(|(e, _)| PublishError::Publish {
                topic: topic.to_string(),
                message: e.to_string(),
            })?;

        debug!(
            "Descriptor delivered to partition {} at offset {}",
            partition, offset
        );

        Ok(DeliveryAck {
            topic: topic.to_string(),
            partition: Some(partition),
            offset: Some(offset),
        })
    }
}

impl Drop for KafkaChannel {
    fn drop(&mut self) {
        info!("Shutting down Kafka producer");
        if let Err(e) = self.flush(Duration::from_secs(5)) {
            warn!("Failed to flush producer on shutdown: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_levels() {
        assert_eq!(Qos::try_from(0).unwrap(), Qos::AtMostOnce);
        assert_eq!(Qos::try_from(2).unwrap(), Qos::ExactlyOnce);
        assert!(Qos::try_from(3).is_err());
        assert_eq!(Qos::default().as_u8(), 1);
    }

    #[test]
    fn test_qos_serialization() {
        assert_eq!(serde_json::to_string(&Qos::ExactlyOnce).unwrap(), "2");
        let qos: Qos = serde_json::from_str("0").unwrap();
        assert_eq!(qos, Qos::AtMostOnce);
        assert!(serde_json::from_str::<Qos>("7").is_err());
    }

    #[test]
    fn test_kafka_channel_rejects_invalid_config() {
        let config = KafkaConfig::new("");
        assert!(matches!(
            KafkaChannel::new(config),
            Err(ConfigError::MissingRequired(_))
        ));
    }

    #[tokio::test]
    async fn test_mock_channel_contract() {
        let mut channel = MockPubSubChannel::new();
        channel
            .expect_publish()
            .withf(|topic, qos, retained, payload| {
                topic == "sensors" && *qos == Qos::AtLeastOnce && !*retained && payload.len() == 3
            })
            .times(1)
            .returning(|topic, _, _, _| {
                Ok(DeliveryAck {
                    topic: topic.to_string(),
                    partition: None,
                    offset: None,
                })
            });

        let ack = channel
            .publish("sensors", Qos::AtLeastOnce, false, Bytes::from_static(b"abc"))
            .await
            .unwrap();
        assert_eq!(ack.topic, "sensors");
    }
}
