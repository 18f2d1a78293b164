//! Kafka consumer for descriptor topics.
//!
//! Each message is decoded as a [`Descriptor`], its payload is fetched through
//! a [`PayloadResolver`], and both are handed to a [`ClaimHandler`].

use crate::config::KafkaConfig;
use crate::descriptor::Descriptor;
use crate::error::PublishError;
use crate::resolver::PayloadResolver;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

/// Errors that can occur during descriptor consumption
#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("Failed to create consumer: {0}")]
    CreationError(String),

    #[error("Failed to subscribe to topics: {0}")]
    SubscriptionError(String),

    #[error("Failed to deserialize descriptor: {0}")]
    DeserializationError(String),

    #[error("Failed to resolve payload: {0}")]
    ResolveError(#[from] PublishError),

    #[error("Message processing error: {0}")]
    ProcessingError(String),
}

/// Handler for resolved claim-check payloads
#[async_trait]
pub trait ClaimHandler: Send + Sync {
    /// Process a descriptor together with the payload it points at
    async fn handle(&self, descriptor: Descriptor, payload: Bytes) -> Result<(), ConsumerError>;

    /// Called when decoding, resolving or handling fails
    async fn on_error(&self, descriptor: Option<Descriptor>, error: ConsumerError) {
        warn!(
            locator = descriptor.as_ref().map(|d| d.locator.as_str()).unwrap_or("-"),
            "Descriptor processing failed: {}",
            error
        );
    }
}

/// Decode a descriptor message body
pub fn decode_descriptor(payload: Option<&[u8]>) -> Result<Descriptor, ConsumerError> {
    let payload = payload
        .ok_or_else(|| ConsumerError::DeserializationError("message has no payload".to_string()))?;

    serde_json::from_slice(payload).map_err(|e| ConsumerError::DeserializationError(e.to_string()))
}

/// Decode, resolve and dispatch one message. Returns `true` on success.
pub(crate) async fn process_message<H: ClaimHandler + ?Sized>(
    resolver: &PayloadResolver,
    handler: &H,
    payload: Option<&[u8]>,
) -> bool {
    let descriptor = match decode_descriptor(payload) {
        Ok(descriptor) => descriptor,
        Err(e) => {
            handler.on_error(None, e).await;
            return false;
        }
    };

    debug!(
        topic = %descriptor.topic,
        data_type = %descriptor.data_type,
        locator = %descriptor.locator,
        "Received descriptor"
    );

    let data = match resolver.fetch(&descriptor).await {
        Ok(data) => data,
        Err(e) => {
            handler.on_error(Some(descriptor), e.into()).await;
            return false;
        }
    };

    match handler.handle(descriptor.clone(), data).await {
        Ok(()) => true,
        Err(e) => {
            handler.on_error(Some(descriptor), e).await;
            false
        }
    }
}

/// Descriptor consumer backed by an rdkafka `StreamConsumer`
pub struct DescriptorConsumer {
    consumer: StreamConsumer,
    config: Arc<KafkaConfig>,
    resolver: Arc<PayloadResolver>,
    shutdown_tx: broadcast::Sender<()>,
}

impl DescriptorConsumer {
    /// Create a new consumer with the given configuration
    pub fn new(config: KafkaConfig, resolver: Arc<PayloadResolver>) -> Result<Self, ConsumerError> {
        info!(
            "Creating Kafka consumer for {} with group {}",
            config.bootstrap_servers, config.consumer.group_id
        );

        let consumer: StreamConsumer = config
            .build_consumer_config()
            .create()
            .map_err(|e| ConsumerError::CreationError(e.to_string()))?;

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            consumer,
            config: Arc::new(config),
            resolver,
            shutdown_tx,
        })
    }

    /// Subscribe to the specified descriptor topics
    pub fn subscribe(&self, topics: &[&str]) -> Result<(), ConsumerError> {
        info!("Subscribing to topics: {:?}", topics);
        self.consumer
            .subscribe(topics)
            .map_err(|e| ConsumerError::SubscriptionError(e.to_string()))
    }

    /// Subscribe to the topics listed in `kafka.consumer.topics`
    pub fn subscribe_configured(&self) -> Result<(), ConsumerError> {
        let topics: Vec<&str> = self.config.consumer.topics.iter().map(String::as_str).collect();
        if topics.is_empty() {
            return Err(ConsumerError::SubscriptionError(
                "no descriptor topics configured".to_string(),
            ));
        }
        self.subscribe(&topics)
    }

    /// Signal shutdown to stop consuming
    pub fn shutdown(&self) {
        info!("Signaling consumer shutdown");
        let _ = self.shutdown_tx.send(());
    }

    /// Consume descriptors until shutdown is signalled
    #[instrument(skip(self, handler))]
    pub async fn run<H: ClaimHandler>(&self, handler: Arc<H>) -> Result<(), ConsumerError> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut stream = self.consumer.stream();

        info!("Starting descriptor consumer");

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Consumer shutdown requested");
                    break;
                }
                next = stream.next() => {
                    let Some(result) = next else {
                        break;
                    };

                    match result {
                        Ok(message) => {
                            let handler = handler.as_ref();
                            let processed =
                                process_message(&self.resolver, handler, message.payload()).await;

                            if processed {
                                if let Err(e) =
                                    self.consumer.commit_message(&message, CommitMode::Async)
                                {
                                    warn!(error = %e, "Failed to commit offset");
                                }
                                metrics::counter!("resolver.descriptors.processed").increment(1);
                            } else {
                                metrics::counter!("resolver.descriptors.failed").increment(1);
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "Kafka consumer error");
                            metrics::counter!("resolver.kafka.errors").increment(1);
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_store::StorageCredentials;
    use crate::payload::PayloadKind;
    use crate::testing::{MemoryConnector, MemoryObjectStore};
    use chrono::Utc;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CollectingHandler {
        handled: Mutex<Vec<(Descriptor, Bytes)>>,
        errors: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ClaimHandler for CollectingHandler {
        async fn handle(
            &self,
            descriptor: Descriptor,
            payload: Bytes,
        ) -> Result<(), ConsumerError> {
            self.handled.lock().unwrap().push((descriptor, payload));
            Ok(())
        }

        async fn on_error(&self, _descriptor: Option<Descriptor>, error: ConsumerError) {
            self.errors.lock().unwrap().push(error.to_string());
        }
    }

    async fn resolver_with_object(container: &str, name: &str, data: &[u8]) -> PayloadResolver {
        use crate::object_store::ObjectStore;

        let store = Arc::new(MemoryObjectStore::new());
        store.create_container(container).await.unwrap();
        store
            .put_object(container, name, Bytes::copy_from_slice(data))
            .await
            .unwrap();

        PayloadResolver::new(
            Arc::new(MemoryConnector::new(store)),
            StorageCredentials::anonymous(),
        )
    }

    #[test]
    fn test_decode_descriptor_errors() {
        assert!(matches!(
            decode_descriptor(None),
            Err(ConsumerError::DeserializationError(_))
        ));
        assert!(matches!(
            decode_descriptor(Some(b"not json".as_slice())),
            Err(ConsumerError::DeserializationError(_))
        ));
    }

    #[tokio::test]
    async fn test_process_message_resolves_payload() {
        let resolver = resolver_with_object("sensors", "obj-1", b"21.5C").await;
        let handler = CollectingHandler::default();
        let descriptor = Descriptor::build(
            "sensors",
            "minio.local",
            "9000",
            PayloadKind::TinyData,
            "obj-1",
            Utc::now(),
        );
        let body = serde_json::to_vec(&descriptor).unwrap();

        assert!(process_message(&resolver, &handler, Some(body.as_slice())).await);

        let handled = handler.handled.lock().unwrap();
        assert_eq!(handled.len(), 1);
        assert_eq!(handled[0].0, descriptor);
        assert_eq!(handled[0].1.as_ref(), b"21.5C");
    }

    #[tokio::test]
    async fn test_process_message_reports_missing_object() {
        let resolver = resolver_with_object("sensors", "obj-1", b"21.5C").await;
        let handler = CollectingHandler::default();
        let descriptor = Descriptor::build(
            "sensors",
            "minio.local",
            "9000",
            PayloadKind::Image,
            "obj-404",
            Utc::now(),
        );
        let body = serde_json::to_vec(&descriptor).unwrap();

        assert!(!process_message(&resolver, &handler, Some(body.as_slice())).await);
        assert!(handler.handled.lock().unwrap().is_empty());
        assert_eq!(handler.errors.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_process_message_reports_bad_json() {
        let resolver = resolver_with_object("sensors", "obj-1", b"x").await;
        let handler = CollectingHandler::default();

        assert!(!process_message(&resolver, &handler, Some(b"{".as_slice())).await);
        assert!(handler.errors.lock().unwrap()[0].starts_with("Failed to deserialize"));
    }
}
