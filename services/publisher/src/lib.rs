//! Claim-check publisher
//!
//! Publishes large or binary payloads without pushing them through the
//! message broker. Each payload is classified, written to an external store,
//! and replaced on the wire by a small JSON [`Descriptor`] that tells
//! subscribers where to fetch it.
//!
//! ## Storage routing
//!
//! - **video**: written to the filesystem under the request's video directory
//! - **image / tiny_data**: written to an S3-compatible object store (MinIO)
//!   in a container named after the topic
//!
//! ## Architecture
//!
//! ```text
//! payload ──▶ Classifier ──▶ Storage Dispatcher ──┬──▶ Filesystem  (video)
//!                                   │             └──▶ Object Store (image, tiny_data)
//!                                   ▼ locator
//!                           Descriptor Builder
//!                                   │ JSON
//!                                   ▼
//!                            Publish Driver ──▶ Kafka ──▶ DescriptorConsumer
//!                                                              │
//!                                                              ▼
//!                                                       PayloadResolver
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use claimcheck_publisher::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let channel = Arc::new(KafkaChannel::new(KafkaConfig::new("localhost:9092"))?);
//!     let publisher = Publisher::new(
//!         Arc::new(SignatureClassifier::new()),
//!         Arc::new(S3Connector::new(true)),
//!     );
//!
//!     let storage = StorageEndpoint::new("localhost", "9000")
//!         .with_credentials(StorageCredentials::new("minioadmin", "minioadmin"));
//!     let request = PublishRequest::new("sensors", b"21.5C".to_vec(), storage, channel)
//!         .with_video_dir("/var/lib/claimcheck/videos");
//!
//!     let outcome = publisher.publish(&request, &PublishOptions::new()).await?;
//!     println!("published {}", outcome.descriptor.locator);
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod config;
pub mod consumer;
pub mod descriptor;
pub mod dispatcher;
pub mod error;
pub mod fs_store;
pub mod object_store;
pub mod payload;
pub mod publisher;
pub mod resolver;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types
pub use channel::{DeliveryAck, KafkaChannel, PubSubChannel, Qos};
pub use config::{Config, ConfigError, KafkaConfig};
pub use consumer::{ClaimHandler, ConsumerError, DescriptorConsumer};
pub use descriptor::{Descriptor, DescriptorHeader};
pub use dispatcher::{StorageBackend, StorageDispatcher, StoredPayload};
pub use error::PublishError;
pub use fs_store::FilesystemStore;
pub use object_store::{
    ObjectStore, ObjectStoreAdapter, ObjectStoreConnector, PutReceipt, S3Connector, S3ObjectStore,
    StorageCredentials, StorageEndpoint,
};
pub use payload::{Payload, PayloadClassifier, PayloadKind, SignatureClassifier};
pub use publisher::{publish_descriptor, PublishOptions, PublishOutcome, PublishRequest, Publisher};
pub use resolver::PayloadResolver;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::channel::{KafkaChannel, PubSubChannel, Qos};
    pub use crate::config::KafkaConfig;
    pub use crate::error::PublishError;
    pub use crate::object_store::{S3Connector, StorageCredentials, StorageEndpoint};
    pub use crate::payload::{Payload, PayloadKind, SignatureClassifier};
    pub use crate::publisher::{PublishOptions, PublishRequest, Publisher};
    pub use crate::resolver::PayloadResolver;
}
