//! Object store adapter for image and tiny payloads.
//!
//! Payloads are written into a container named after the publish topic. The
//! S3 implementation targets MinIO and any other S3-compatible endpoint and
//! pools one client per endpoint/credential pair.

use crate::error::{PublishError, Result};
use crate::payload::Payload;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

/// Region that must not be sent as a bucket location constraint
const DEFAULT_REGION: &str = "us-east-1";

/// Service error codes that indicate bad or rejected credentials
const AUTH_ERROR_CODES: [&str; 3] = ["InvalidAccessKeyId", "SignatureDoesNotMatch", "AccessDenied"];

/// Static credentials for the object store
///
/// An empty access key id means "no static credentials": the client falls
/// back to the ambient AWS credential provider chain.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct StorageCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl StorageCredentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn is_anonymous(&self) -> bool {
        self.access_key_id.is_empty()
    }
}

impl fmt::Debug for StorageCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// Network coordinates of an object store
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageEndpoint {
    pub address: String,
    pub port: String,
    pub credentials: StorageCredentials,
    /// Plaintext by default; production deployments should enable TLS
    pub use_ssl: bool,
    pub region: String,
}

impl StorageEndpoint {
    pub fn new(address: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            port: port.into(),
            credentials: StorageCredentials::anonymous(),
            use_ssl: false,
            region: DEFAULT_REGION.to_string(),
        }
    }

    pub fn with_credentials(mut self, credentials: StorageCredentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_ssl(mut self, use_ssl: bool) -> Self {
        self.use_ssl = use_ssl;
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// `address:port`
    pub fn host_port(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn url(&self) -> String {
        let scheme = if self.use_ssl { "https" } else { "http" };
        format!("{}://{}", scheme, self.host_port())
    }
}

/// Confirmation of a stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutReceipt {
    pub size: u64,
    pub e_tag: Option<String>,
}

/// Minimal object store surface used by the pipeline
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn container_exists(&self, container: &str) -> Result<bool>;

    /// Create a container. Returns `false` when it already existed.
    async fn create_container(&self, container: &str) -> Result<bool>;

    async fn put_object(&self, container: &str, name: &str, data: Bytes) -> Result<PutReceipt>;

    async fn get_object(&self, container: &str, name: &str) -> Result<Bytes>;
}

/// Hands out object store clients for an endpoint
#[async_trait]
pub trait ObjectStoreConnector: Send + Sync {
    async fn connect(&self, endpoint: &StorageEndpoint) -> Result<Arc<dyn ObjectStore>>;
}

/// Writes payloads into topic-scoped containers
#[derive(Clone)]
pub struct ObjectStoreAdapter {
    connector: Arc<dyn ObjectStoreConnector>,
}

impl ObjectStoreAdapter {
    pub fn new(connector: Arc<dyn ObjectStoreConnector>) -> Self {
        Self { connector }
    }

    /// Store `payload` as `container/object_name`, creating the container if needed
    ///
    /// The payload type is checked before any network call, so a mismatch
    /// leaves the store untouched.
    #[instrument(skip(self, endpoint, payload), fields(endpoint = %endpoint.host_port()))]
    pub async fn put(
        &self,
        endpoint: &StorageEndpoint,
        container: &str,
        object_name: &str,
        payload: &Payload,
    ) -> Result<PutReceipt> {
        let data = payload.as_bytes()?.clone();

        let store = self.connector.connect(endpoint).await?;
        ensure_container(store.as_ref(), container).await?;

        let receipt = store.put_object(container, object_name, data).await?;

        info!(
            container = %container,
            object = %object_name,
            size_bytes = receipt.size,
            "Successfully uploaded object"
        );

        Ok(receipt)
    }

    /// Fetch `container/object_name`
    #[instrument(skip(self, endpoint), fields(endpoint = %endpoint.host_port()))]
    pub async fn get(
        &self,
        endpoint: &StorageEndpoint,
        container: &str,
        object_name: &str,
    ) -> Result<Bytes> {
        let store = self.connector.connect(endpoint).await?;
        store.get_object(container, object_name).await
    }
}

/// Create `container` unless it already exists
///
/// A concurrent creator winning the race is not an error.
pub async fn ensure_container(store: &dyn ObjectStore, container: &str) -> Result<()> {
    if store.container_exists(container).await? {
        debug!(container = %container, "Container already exists");
        return Ok(());
    }

    if store.create_container(container).await? {
        info!(container = %container, "Container created");
    } else {
        debug!(container = %container, "Container created concurrently by another publisher");
    }

    Ok(())
}

/// S3-compatible object store (AWS S3, MinIO, LocalStack)
pub struct S3ObjectStore {
    client: S3Client,
    endpoint: String,
    region: String,
}

impl S3ObjectStore {
    /// Build a client for the endpoint
    pub async fn connect(endpoint: &StorageEndpoint, force_path_style: bool) -> Result<Self> {
        if endpoint.address.is_empty() {
            return Err(PublishError::StorageConnection {
                endpoint: endpoint.host_port(),
                message: "storage address is empty".to_string(),
            });
        }

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(endpoint.region.clone()));

        if !endpoint.credentials.is_anonymous() {
            loader = loader.credentials_provider(Credentials::new(
                endpoint.credentials.access_key_id.clone(),
                endpoint.credentials.secret_access_key.clone(),
                None,
                None,
                "claimcheck-static",
            ));
        }

        let sdk_config = loader.load().await;

        // Force path-style access for MinIO compatibility
        let s3_config = S3ConfigBuilder::from(&sdk_config)
            .endpoint_url(endpoint.url())
            .force_path_style(force_path_style)
            .build();

        info!(
            endpoint = %endpoint.url(),
            static_credentials = !endpoint.credentials.is_anonymous(),
            "Object store client initialized"
        );

        Ok(Self {
            client: S3Client::from_conf(s3_config),
            endpoint: endpoint.host_port(),
            region: endpoint.region.clone(),
        })
    }

    fn connection_or<E, R>(
        &self,
        err: SdkError<E, R>,
        fallback: impl FnOnce(String) -> PublishError,
    ) -> PublishError
    where
        E: ProvideErrorMetadata + std::error::Error + 'static,
        R: fmt::Debug,
    {
        let message = DisplayErrorContext(&err).to_string();
        let unreachable = matches!(
            err,
            SdkError::DispatchFailure(_) | SdkError::TimeoutError(_)
        );
        let rejected = err
            .code()
            .map(|code| AUTH_ERROR_CODES.contains(&code))
            .unwrap_or(false);

        if unreachable || rejected {
            PublishError::StorageConnection {
                endpoint: self.endpoint.clone(),
                message,
            }
        } else {
            fallback(message)
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn container_exists(&self, container: &str) -> Result<bool> {
        match self.client.head_bucket().bucket(container).send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                {
                    Ok(false)
                } else {
                    Err(self.connection_or(e, |m| PublishError::write(container, m)))
                }
            }
        }
    }

    async fn create_container(&self, container: &str) -> Result<bool> {
        let mut request = self.client.create_bucket().bucket(container);

        if self.region != DEFAULT_REGION {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }

        match request.send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                let already_exists = e
                    .as_service_error()
                    .map(|e| e.is_bucket_already_owned_by_you() || e.is_bucket_already_exists())
                    .unwrap_or(false);

                if already_exists {
                    Ok(false)
                } else {
                    Err(self.connection_or(e, |m| PublishError::write(container, m)))
                }
            }
        }
    }

    async fn put_object(&self, container: &str, name: &str, data: Bytes) -> Result<PutReceipt> {
        let size = data.len() as u64;
        let target = format!("{}/{}", container, name);

        let output = self
            .client
            .put_object()
            .bucket(container)
            .key(name)
            .body(ByteStream::from(data))
            .content_type("application/octet-stream")
            .send()
            .await
            .map_err(|e| self.connection_or(e, |m| PublishError::write(target.clone(), m)))?;

        Ok(PutReceipt {
            size,
            e_tag: output.e_tag().map(str::to_string),
        })
    }

    async fn get_object(&self, container: &str, name: &str) -> Result<Bytes> {
        let target = format!("{}/{}", container, name);

        let output = self
            .client
            .get_object()
            .bucket(container)
            .key(name)
            .send()
            .await
            .map_err(|e| self.connection_or(e, |m| PublishError::read(target.clone(), m)))?;

        let body = output
            .body
            .collect()
            .await
            .map_err(|e| PublishError::read(target.clone(), e))?;

        Ok(body.into_bytes())
    }
}

/// Connector that reuses one S3 client per endpoint and credential pair
pub struct S3Connector {
    force_path_style: bool,
    clients: RwLock<HashMap<StorageEndpoint, Arc<dyn ObjectStore>>>,
}

impl S3Connector {
    pub fn new(force_path_style: bool) -> Self {
        Self {
            force_path_style,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Number of pooled clients
    pub async fn pooled(&self) -> usize {
        self.clients.read().await.len()
    }
}

#[async_trait]
impl ObjectStoreConnector for S3Connector {
    async fn connect(&self, endpoint: &StorageEndpoint) -> Result<Arc<dyn ObjectStore>> {
        {
            let clients = self.clients.read().await;
            if let Some(store) = clients.get(endpoint) {
                return Ok(store.clone());
            }
        }

        let mut clients = self.clients.write().await;
        if let Some(store) = clients.get(endpoint) {
            return Ok(store.clone());
        }

        let store: Arc<dyn ObjectStore> =
            Arc::new(S3ObjectStore::connect(endpoint, self.force_path_style).await?);
        clients.insert(endpoint.clone(), store.clone());

        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryConnector, MemoryObjectStore};

    fn endpoint() -> StorageEndpoint {
        StorageEndpoint::new("minio.local", "9000")
    }

    #[test]
    fn test_endpoint_url() {
        assert_eq!(endpoint().url(), "http://minio.local:9000");
        assert_eq!(endpoint().with_ssl(true).url(), "https://minio.local:9000");
        assert_eq!(endpoint().host_port(), "minio.local:9000");
    }

    #[test]
    fn test_credentials_redacted() {
        let creds = StorageCredentials::new("minioadmin", "supersecret");
        let debug = format!("{:?}", creds);
        assert!(debug.contains("minioadmin"));
        assert!(!debug.contains("supersecret"));
        assert!(!creds.is_anonymous());
        assert!(StorageCredentials::anonymous().is_anonymous());
    }

    #[tokio::test]
    async fn test_put_creates_missing_container() {
        let store = Arc::new(MemoryObjectStore::new());
        let adapter = ObjectStoreAdapter::new(Arc::new(MemoryConnector::new(store.clone())));

        let receipt = adapter
            .put(&endpoint(), "sensors", "obj-1", &Payload::from(vec![7u8; 37]))
            .await
            .unwrap();

        assert_eq!(receipt.size, 37);
        assert_eq!(store.create_calls(), 1);
        assert_eq!(store.object("sensors", "obj-1").unwrap(), vec![7u8; 37]);
    }

    #[tokio::test]
    async fn test_put_reuses_existing_container() {
        let store = Arc::new(MemoryObjectStore::new());
        let adapter = ObjectStoreAdapter::new(Arc::new(MemoryConnector::new(store.clone())));

        for name in ["obj-1", "obj-2"] {
            adapter
                .put(&endpoint(), "sensors", name, &Payload::from(b"x".to_vec()))
                .await
                .unwrap();
        }

        assert_eq!(store.create_calls(), 1);
        assert_eq!(store.object_count("sensors"), 2);
    }

    #[tokio::test]
    async fn test_put_tolerates_creation_race() {
        let store = Arc::new(MemoryObjectStore::new().with_racing_creator());
        let adapter = ObjectStoreAdapter::new(Arc::new(MemoryConnector::new(store.clone())));

        adapter
            .put(&endpoint(), "sensors", "obj-1", &Payload::from(b"x".to_vec()))
            .await
            .unwrap();

        assert!(store.object("sensors", "obj-1").is_some());
    }

    #[tokio::test]
    async fn test_put_rejects_structured_payload_before_io() {
        let store = Arc::new(MemoryObjectStore::new());
        let connector = Arc::new(MemoryConnector::new(store.clone()));
        let adapter = ObjectStoreAdapter::new(connector.clone());

        let result = adapter
            .put(
                &endpoint(),
                "sensors",
                "obj-1",
                &Payload::from(serde_json::json!({"a": 1})),
            )
            .await;

        assert!(matches!(result, Err(PublishError::TypeMismatch { .. })));
        assert_eq!(connector.connects(), 0);
        assert_eq!(store.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_put_propagates_connection_error() {
        let store = Arc::new(MemoryObjectStore::new().unreachable());
        let adapter = ObjectStoreAdapter::new(Arc::new(MemoryConnector::new(store)));

        let result = adapter
            .put(&endpoint(), "sensors", "obj-1", &Payload::from(b"x".to_vec()))
            .await;

        assert!(matches!(result, Err(PublishError::StorageConnection { .. })));
    }

    #[tokio::test]
    async fn test_s3_connector_pools_clients() {
        let connector = S3Connector::new(true);
        let creds = StorageCredentials::new("minioadmin", "minioadmin");

        connector
            .connect(&endpoint().with_credentials(creds.clone()))
            .await
            .unwrap();
        connector
            .connect(&endpoint().with_credentials(creds))
            .await
            .unwrap();
        assert_eq!(connector.pooled().await, 1);

        connector
            .connect(&StorageEndpoint::new("other.local", "9000").with_credentials(
                StorageCredentials::new("minioadmin", "minioadmin"),
            ))
            .await
            .unwrap();
        assert_eq!(connector.pooled().await, 2);
    }

    #[tokio::test]
    async fn test_s3_connect_rejects_empty_address() {
        let result = S3ObjectStore::connect(&StorageEndpoint::new("", "9000"), true).await;
        assert!(matches!(result, Err(PublishError::StorageConnection { .. })));
    }
}
