//! In-memory collaborators for unit tests.

use crate::channel::{DeliveryAck, PubSubChannel, Qos};
use crate::error::{PublishError, Result};
use crate::object_store::{ObjectStore, ObjectStoreConnector, PutReceipt, StorageEndpoint};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Object store backed by nested hash maps
#[derive(Default)]
pub(crate) struct MemoryObjectStore {
    containers: Mutex<HashMap<String, HashMap<String, Bytes>>>,
    create_calls: AtomicUsize,
    racing_creator: bool,
    unreachable: bool,
    failing_writes: bool,
}

impl MemoryObjectStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Every existence check misses and another publisher always wins the
    /// subsequent create
    pub(crate) fn with_racing_creator(mut self) -> Self {
        self.racing_creator = true;
        self
    }

    pub(crate) fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    pub(crate) fn failing_writes(mut self) -> Self {
        self.failing_writes = true;
        self
    }

    pub(crate) fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn object(&self, container: &str, name: &str) -> Option<Vec<u8>> {
        self.containers
            .lock()
            .unwrap()
            .get(container)
            .and_then(|objects| objects.get(name))
            .map(|data| data.to_vec())
    }

    pub(crate) fn object_count(&self, container: &str) -> usize {
        self.containers
            .lock()
            .unwrap()
            .get(container)
            .map(HashMap::len)
            .unwrap_or(0)
    }

    pub(crate) fn total_objects(&self) -> usize {
        self.containers
            .lock()
            .unwrap()
            .values()
            .map(HashMap::len)
            .sum()
    }

    fn check_reachable(&self) -> Result<()> {
        if self.unreachable {
            return Err(PublishError::StorageConnection {
                endpoint: "memory".to_string(),
                message: "connection refused".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn container_exists(&self, container: &str) -> Result<bool> {
        self.check_reachable()?;
        if self.racing_creator {
            return Ok(false);
        }
        Ok(self.containers.lock().unwrap().contains_key(container))
    }

    async fn create_container(&self, container: &str) -> Result<bool> {
        self.check_reachable()?;
        self.create_calls.fetch_add(1, Ordering::SeqCst);

        let mut containers = self.containers.lock().unwrap();
        if self.racing_creator || containers.contains_key(container) {
            containers.entry(container.to_string()).or_default();
            return Ok(false);
        }
        containers.insert(container.to_string(), HashMap::new());
        Ok(true)
    }

    async fn put_object(&self, container: &str, name: &str, data: Bytes) -> Result<PutReceipt> {
        self.check_reachable()?;
        if self.failing_writes {
            return Err(PublishError::write(
                format!("{}/{}", container, name),
                "disk quota exceeded",
            ));
        }

        let mut containers = self.containers.lock().unwrap();
        let objects = containers
            .get_mut(container)
            .ok_or_else(|| PublishError::write(container, "no such container"))?;

        let size = data.len() as u64;
        objects.insert(name.to_string(), data);

        Ok(PutReceipt { size, e_tag: None })
    }

    async fn get_object(&self, container: &str, name: &str) -> Result<Bytes> {
        self.check_reachable()?;
        self.containers
            .lock()
            .unwrap()
            .get(container)
            .and_then(|objects| objects.get(name))
            .cloned()
            .ok_or_else(|| PublishError::read(format!("{}/{}", container, name), "no such key"))
    }
}

/// Connector that always hands out the same in-memory store
pub(crate) struct MemoryConnector {
    store: Arc<MemoryObjectStore>,
    connects: AtomicUsize,
    endpoints: Mutex<Vec<StorageEndpoint>>,
}

impl MemoryConnector {
    pub(crate) fn new(store: Arc<MemoryObjectStore>) -> Self {
        Self {
            store,
            connects: AtomicUsize::new(0),
            endpoints: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub(crate) fn last_endpoint(&self) -> Option<StorageEndpoint> {
        self.endpoints.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl ObjectStoreConnector for MemoryConnector {
    async fn connect(&self, endpoint: &StorageEndpoint) -> Result<Arc<dyn ObjectStore>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.endpoints.lock().unwrap().push(endpoint.clone());
        Ok(self.store.clone())
    }
}

/// Message captured by [`RecordingChannel`]
#[derive(Debug, Clone)]
pub(crate) struct PublishedMessage {
    pub topic: String,
    pub qos: Qos,
    pub retained: bool,
    pub payload: Bytes,
}

/// Channel that acknowledges immediately and remembers what it was given
#[derive(Default)]
pub(crate) struct RecordingChannel {
    messages: Mutex<Vec<PublishedMessage>>,
    never_ack: bool,
}

impl RecordingChannel {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Publishes are accepted but never acknowledged
    pub(crate) fn never_acknowledging() -> Self {
        Self {
            never_ack: true,
            ..Self::default()
        }
    }

    pub(crate) fn messages(&self) -> Vec<PublishedMessage> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl PubSubChannel for RecordingChannel {
    async fn publish(
        &self,
        topic: &str,
        qos: Qos,
        retained: bool,
        payload: Bytes,
    ) -> Result<DeliveryAck> {
        let offset = {
            let mut messages = self.messages.lock().unwrap();
            messages.push(PublishedMessage {
                topic: topic.to_string(),
                qos,
                retained,
                payload,
            });
            messages.len() as i64 - 1
        };

        if self.never_ack {
            std::future::pending::<()>().await;
        }

        Ok(DeliveryAck {
            topic: topic.to_string(),
            partition: Some(0),
            offset: Some(offset),
        })
    }
}
