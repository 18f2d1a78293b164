//! Subscriber-side lookup of the payload a descriptor points at.

use crate::descriptor::Descriptor;
use crate::error::{PublishError, Result};
use crate::fs_store::FilesystemStore;
use crate::object_store::{
    ObjectStoreAdapter, ObjectStoreConnector, StorageCredentials, StorageEndpoint,
};
use crate::payload::PayloadKind;
use bytes::Bytes;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Fetches stored payloads for received descriptors
///
/// Descriptors carry the storage address and port but never credentials;
/// those come from the resolver's own configuration.
///
/// With a video root set, video locators outside it are rejected.
pub struct PayloadResolver {
    objects: ObjectStoreAdapter,
    files: FilesystemStore,
    credentials: StorageCredentials,
    use_ssl: bool,
    region: Option<String>,
    video_root: Option<PathBuf>,
}

impl PayloadResolver {
    pub fn new(connector: Arc<dyn ObjectStoreConnector>, credentials: StorageCredentials) -> Self {
        Self {
            objects: ObjectStoreAdapter::new(connector),
            files: FilesystemStore::new(),
            credentials,
            use_ssl: false,
            region: None,
            video_root: None,
        }
    }

    pub fn with_ssl(mut self, use_ssl: bool) -> Self {
        self.use_ssl = use_ssl;
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Only serve video files located under `root`
    pub fn with_video_root(mut self, root: impl AsRef<Path>) -> Self {
        self.video_root = Some(normalize(root.as_ref()));
        self
    }

    /// Object store endpoint referenced by `descriptor`
    pub fn endpoint_for(&self, descriptor: &Descriptor) -> StorageEndpoint {
        let endpoint = StorageEndpoint::new(&descriptor.storage_address, &descriptor.storage_port)
            .with_credentials(self.credentials.clone())
            .with_ssl(self.use_ssl);

        match &self.region {
            Some(region) => endpoint.with_region(region),
            None => endpoint,
        }
    }

    /// Fetch the payload bytes for `descriptor`
    #[instrument(
        skip(self, descriptor),
        fields(topic = %descriptor.topic, locator = %descriptor.locator)
    )]
    pub async fn fetch(&self, descriptor: &Descriptor) -> Result<Bytes> {
        if descriptor.locator.is_empty() {
            return Err(PublishError::InvalidRequest(
                "descriptor has an empty locator".to_string(),
            ));
        }

        let data = match &descriptor.data_type {
            PayloadKind::Video => {
                let path = self.video_path(&descriptor.locator)?;
                self.files.read_file(&path).await?
            }
            PayloadKind::Image | PayloadKind::TinyData => {
                self.objects
                    .get(
                        &self.endpoint_for(descriptor),
                        &descriptor.topic,
                        &descriptor.locator,
                    )
                    .await?
            }
            PayloadKind::Unknown(label) => {
                return Err(PublishError::UnsupportedPayloadKind(label.clone()))
            }
        };

        debug!(size_bytes = data.len(), "Payload resolved");

        Ok(data)
    }

    fn video_path(&self, locator: &str) -> Result<PathBuf> {
        let path = normalize(Path::new(locator));

        match &self.video_root {
            Some(root) if !path.starts_with(root) => Err(PublishError::InvalidRequest(format!(
                "video locator {} is outside {}",
                locator,
                root.display()
            ))),
            _ => Ok(path),
        }
    }
}

/// Lexically resolve `.` and `..` without touching the filesystem
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(normalized.components().next_back(), Some(Component::Normal(_))) {
                    normalized.pop();
                } else if !normalized.has_root() {
                    normalized.push(Component::ParentDir);
                }
            }
            other => normalized.push(other),
        }
    }

    normalized
}
