//! The claim-check publish pipeline.
//!
//! A publish call runs four sequential stages inside the caller's task:
//! classify the payload, store it, build a [`Descriptor`] pointing at the
//! stored copy, and publish the descriptor, waiting for the channel's
//! acknowledgment. Nothing is published unless the payload was stored.

use crate::channel::{DeliveryAck, PubSubChannel, Qos};
use crate::descriptor::Descriptor;
use crate::dispatcher::{StorageDispatcher, StoredPayload};
use crate::error::{PublishError, Result};
use crate::object_store::{ObjectStoreConnector, StorageEndpoint};
use crate::payload::{Payload, PayloadClassifier, PayloadKind};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Everything needed to publish one payload
#[derive(Clone)]
pub struct PublishRequest {
    /// Topic; also the object store container name
    pub topic: String,
    pub payload: Payload,
    pub storage: StorageEndpoint,
    /// Directory for video payloads
    pub video_dir: Option<PathBuf>,
    pub channel: Arc<dyn PubSubChannel>,
    pub qos: Qos,
    pub retained: bool,
}

impl PublishRequest {
    pub fn new(
        topic: impl Into<String>,
        payload: impl Into<Payload>,
        storage: StorageEndpoint,
        channel: Arc<dyn PubSubChannel>,
    ) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            storage,
            video_dir: None,
            channel,
            qos: Qos::default(),
            retained: false,
        }
    }

    pub fn with_video_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.video_dir = Some(dir.into());
        self
    }

    pub fn with_qos(mut self, qos: Qos) -> Self {
        self.qos = qos;
        self
    }

    pub fn with_retained(mut self, retained: bool) -> Self {
        self.retained = retained;
        self
    }

    /// Descriptor for a payload of `kind` stored at `locator`
    pub fn descriptor(&self, kind: PayloadKind, locator: &str, now: DateTime<Utc>) -> Descriptor {
        Descriptor::build(
            &self.topic,
            &self.storage.address,
            &self.storage.port,
            kind,
            locator,
            now,
        )
    }
}

impl fmt::Debug for PublishRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublishRequest")
            .field("topic", &self.topic)
            .field("payload", &self.payload.type_name())
            .field("storage", &self.storage)
            .field("video_dir", &self.video_dir)
            .field("qos", &self.qos)
            .field("retained", &self.retained)
            .finish_non_exhaustive()
    }
}

/// Per-call deadline and cancellation
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    pub deadline: Option<Instant>,
    pub cancel: Option<CancellationToken>,
}

impl PublishOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Run `fut` bounded by the deadline and the cancellation token
    async fn bound<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        if self.cancel.as_ref().is_some_and(|token| token.is_cancelled()) {
            return Err(PublishError::Cancelled);
        }
        if self.deadline.is_some_and(|deadline| deadline <= Instant::now()) {
            return Err(PublishError::DeadlineExceeded);
        }

        let bounded = async {
            match self.deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, fut)
                    .await
                    .unwrap_or(Err(PublishError::DeadlineExceeded)),
                None => fut.await,
            }
        };

        match &self.cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(PublishError::Cancelled),
                result = bounded => result,
            },
            None => bounded.await,
        }
    }
}

/// Result of a successful publish
#[derive(Debug, Clone)]
pub struct PublishOutcome {
    pub descriptor: Descriptor,
    pub stored: StoredPayload,
    pub ack: DeliveryAck,
}

/// Serialize `descriptor` and publish it, waiting for the acknowledgment
pub async fn publish_descriptor(
    channel: &dyn PubSubChannel,
    topic: &str,
    qos: Qos,
    retained: bool,
    descriptor: &Descriptor,
) -> Result<DeliveryAck> {
    let payload =
        serde_json::to_vec(descriptor).map_err(|e| PublishError::Serialization(e.to_string()))?;

    channel
        .publish(topic, qos, retained, Bytes::from(payload))
        .await
}

/// Claim-check publisher
pub struct Publisher {
    classifier: Arc<dyn PayloadClassifier>,
    dispatcher: StorageDispatcher,
}

impl Publisher {
    pub fn new(
        classifier: Arc<dyn PayloadClassifier>,
        connector: Arc<dyn ObjectStoreConnector>,
    ) -> Self {
        Self {
            classifier,
            dispatcher: StorageDispatcher::new(connector),
        }
    }

    /// Store the payload and publish its descriptor
    #[instrument(skip(self, request, options), fields(topic = %request.topic))]
    pub async fn publish(
        &self,
        request: &PublishRequest,
        options: &PublishOptions,
    ) -> Result<PublishOutcome> {
        let result = options.bound(self.run(request)).await;

        match &result {
            Ok(outcome) => {
                metrics::counter!("publisher.payloads.stored").increment(1);
                metrics::counter!("publisher.bytes.stored").increment(outcome.stored.size);
                metrics::counter!("publisher.descriptors.published").increment(1);
            }
            Err(e) => {
                metrics::counter!("publisher.publish.failed").increment(1);
                warn!(error = %e, retryable = e.is_retryable(), "Publish failed");
            }
        }

        result
    }

    async fn run(&self, request: &PublishRequest) -> Result<PublishOutcome> {
        if request.topic.is_empty() {
            return Err(PublishError::InvalidRequest("topic must not be empty".to_string()));
        }

        let kind = self.classifier.classify(&request.payload)?;

        let stored = self
            .dispatcher
            .store(&request.payload, &kind, request)
            .await?;

        let descriptor = request.descriptor(kind, &stored.locator, Utc::now());

        let ack = publish_descriptor(
            request.channel.as_ref(),
            &request.topic,
            request.qos,
            request.retained,
            &descriptor,
        )
        .await?;

        info!(
            data_type = %descriptor.data_type,
            locator = %descriptor.locator,
            size_bytes = stored.size,
            "Complete publish"
        );

        Ok(PublishOutcome {
            descriptor,
            stored,
            ack,
        })
    }
}
