//! Storage routing by payload kind.
//!
//! | kind                 | store       | locator                 |
//! |----------------------|-------------|-------------------------|
//! | `video`              | filesystem  | `{video_dir}/{uuid}`    |
//! | `image`, `tiny_data` | object store| `{uuid}` in `{topic}`   |
//!
//! Container-per-topic is the only tenancy boundary applied here.

use crate::error::{PublishError, Result};
use crate::fs_store::FilesystemStore;
use crate::object_store::{ObjectStoreAdapter, ObjectStoreConnector};
use crate::payload::{Payload, PayloadKind};
use crate::publisher::PublishRequest;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Store that ended up holding the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Filesystem,
    ObjectStore,
}

/// Where and how much was written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPayload {
    pub locator: String,
    pub backend: StorageBackend,
    pub size: u64,
}

/// Routes payloads to the filesystem or the object store
#[derive(Clone)]
pub struct StorageDispatcher {
    objects: ObjectStoreAdapter,
    files: FilesystemStore,
}

impl StorageDispatcher {
    pub fn new(connector: Arc<dyn ObjectStoreConnector>) -> Self {
        Self {
            objects: ObjectStoreAdapter::new(connector),
            files: FilesystemStore::new(),
        }
    }

    /// Store the payload under a freshly generated unique name
    pub async fn store(
        &self,
        payload: &Payload,
        kind: &PayloadKind,
        request: &PublishRequest,
    ) -> Result<StoredPayload> {
        let object_id = Uuid::new_v4().to_string();
        self.store_as(payload, kind, request, &object_id).await
    }

    #[instrument(skip(self, payload, kind, request), fields(topic = %request.topic, kind = %kind))]
    pub(crate) async fn store_as(
        &self,
        payload: &Payload,
        kind: &PayloadKind,
        request: &PublishRequest,
        object_id: &str,
    ) -> Result<StoredPayload> {
        match kind {
            PayloadKind::Video => {
                let data = payload.as_bytes()?;
                let directory = video_directory(request)?;

                let path = self.files.write_file(directory, object_id, data).await?;
                let locator = path.to_str().map(str::to_string).ok_or_else(|| {
                    PublishError::write(path.display().to_string(), "path is not valid UTF-8")
                })?;

                debug!(locator = %locator, "Video payload stored on filesystem");

                Ok(StoredPayload {
                    locator,
                    backend: StorageBackend::Filesystem,
                    size: data.len() as u64,
                })
            }
            PayloadKind::Image | PayloadKind::TinyData => {
                let receipt = self
                    .objects
                    .put(&request.storage, &request.topic, object_id, payload)
                    .await?;

                Ok(StoredPayload {
                    locator: object_id.to_string(),
                    backend: StorageBackend::ObjectStore,
                    size: receipt.size,
                })
            }
            PayloadKind::Unknown(label) => Err(PublishError::UnsupportedPayloadKind(label.clone())),
        }
    }
}

fn video_directory(request: &PublishRequest) -> Result<&Path> {
    let directory = request
        .video_dir
        .as_deref()
        .filter(|dir| !dir.as_os_str().is_empty())
        .ok_or_else(|| {
            PublishError::InvalidRequest("video payloads require a video directory".to_string())
        })?;

    if directory.to_str().is_none() {
        return Err(PublishError::InvalidRequest(format!(
            "video directory {} is not valid UTF-8",
            directory.display()
        )));
    }

    Ok(directory)
}
