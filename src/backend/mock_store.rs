//! Mock implementation of ObjectBackend for testing

use crate::backend::{collect_stream, ByteStream, ObjectBackend, bytes_stream};
use crate::error::BackendError;
use crate::key::RemoteKey;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, StreamExt};
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use log::info;

/// A stored object: body plus the content type it was uploaded with
#[derive(Debug, Clone)]
struct MockObject {
    data: Bytes,
    content_type: String,
}

#[derive(Default)]
struct FaultFlags {
    probe: AtomicBool,
    put: AtomicBool,
    get: AtomicBool,
    delete: AtomicBool,
    mid_body: AtomicBool,
}

#[derive(Default)]
struct CallCounters {
    probe: AtomicUsize,
    put: AtomicUsize,
    get: AtomicUsize,
    delete: AtomicUsize,
}

/// In-memory object backend.
///
/// Clones share the same object map, so a test can keep a handle for
/// inspection while the store owns another. Each operation can be made to
/// fail with a transient error to simulate an outage.
#[derive(Clone, Default)]
pub struct MockObjectBackend {
    // bucket -> key -> object
    objects: Arc<Mutex<HashMap<String, HashMap<String, MockObject>>>>,
    faults: Arc<FaultFlags>,
    calls: Arc<CallCounters>,
}

impl MockObjectBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn objects(&self) -> MutexGuard<'_, HashMap<String, HashMap<String, MockObject>>> {
        // a panicking test thread must not poison the map for the others
        self.objects.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Get the number of objects in a bucket
    pub fn object_count(&self, bucket: &str) -> usize {
        self.objects().get(bucket).map(|objects| objects.len()).unwrap_or(0)
    }

    /// Get a copy of the object body stored at `key`
    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects()
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|object| object.data.to_vec())
    }

    /// Get the content type recorded for `key`
    pub fn content_type(&self, bucket: &str, key: &str) -> Option<String> {
        self.objects()
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|object| object.content_type.clone())
    }

    /// List all keys stored in a bucket
    pub fn list_keys(&self, bucket: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects()
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// Store an object directly, bypassing the backend interface
    pub fn insert(&self, bucket: &str, key: &str, data: &[u8]) {
        self.objects().entry(bucket.to_string()).or_default().insert(
            key.to_string(),
            MockObject {
                data: Bytes::copy_from_slice(data),
                content_type: crate::backend::ARCHIVE_CONTENT_TYPE.to_string(),
            },
        );
    }

    /// Clear all data from the backend
    pub fn clear(&self) {
        self.objects().clear();
    }

    pub fn fail_probe(&self, fail: bool) {
        self.faults.probe.store(fail, Ordering::SeqCst);
    }

    pub fn fail_put(&self, fail: bool) {
        self.faults.put.store(fail, Ordering::SeqCst);
    }

    pub fn fail_get(&self, fail: bool) {
        self.faults.get.store(fail, Ordering::SeqCst);
    }

    pub fn fail_delete(&self, fail: bool) {
        self.faults.delete.store(fail, Ordering::SeqCst);
    }

    /// Make reads yield the first half of the body, then a read error
    pub fn fail_mid_body(&self, fail: bool) {
        self.faults.mid_body.store(fail, Ordering::SeqCst);
    }

    pub fn probe_calls(&self) -> usize {
        self.calls.probe.load(Ordering::SeqCst)
    }

    pub fn put_calls(&self) -> usize {
        self.calls.put.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> usize {
        self.calls.get.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.calls.delete.load(Ordering::SeqCst)
    }

    fn check_fault(flag: &AtomicBool, operation: &str) -> Result<(), BackendError> {
        if flag.load(Ordering::SeqCst) {
            return Err(BackendError::Other(format!(
                "Mock: simulated {} failure (service unavailable)",
                operation
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectBackend for MockObjectBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn probe_exists(&self, bucket: &str, key: &RemoteKey) -> Result<bool, BackendError> {
        self.calls.probe.fetch_add(1, Ordering::SeqCst);
        Self::check_fault(&self.faults.probe, "probe")?;

        let exists = self
            .objects()
            .get(bucket)
            .map(|objects| objects.contains_key(key.as_str()))
            .unwrap_or(false);
        Ok(exists)
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &RemoteKey,
        body: ByteStream,
        content_type: &str,
    ) -> Result<(), BackendError> {
        self.calls.put.fetch_add(1, Ordering::SeqCst);
        Self::check_fault(&self.faults.put, "put")?;

        // Body is fully received before the map is touched
        let data = collect_stream(body).await?;
        let size = data.len();

        self.objects().entry(bucket.to_string()).or_default().insert(
            key.to_string(),
            MockObject {
                data: Bytes::from(data),
                content_type: content_type.to_string(),
            },
        );

        info!("Mock: Stored object {}/{} with size {}", bucket, key, size);
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &RemoteKey) -> Result<ByteStream, BackendError> {
        self.calls.get.fetch_add(1, Ordering::SeqCst);
        Self::check_fault(&self.faults.get, "get")?;

        let data = self
            .objects()
            .get(bucket)
            .and_then(|objects| objects.get(key.as_str()))
            .map(|object| object.data.clone())
            .ok_or_else(|| BackendError::NotFound(key.to_string()))?;

        info!("Mock: Read object {}/{} with size {}", bucket, key, data.len());
        if self.faults.mid_body.load(Ordering::SeqCst) {
            let head = data.slice(..data.len() / 2);
            let error = io::Error::new(io::ErrorKind::ConnectionReset, "Mock: simulated read failure");
            return Ok(stream::iter(vec![Ok(head), Err(error)]).boxed());
        }
        Ok(bytes_stream(data))
    }

    async fn delete_object(&self, bucket: &str, key: &RemoteKey) -> Result<(), BackendError> {
        self.calls.delete.fetch_add(1, Ordering::SeqCst);
        Self::check_fault(&self.faults.delete, "delete")?;

        let removed = self
            .objects()
            .get_mut(bucket)
            .and_then(|objects| objects.remove(key.as_str()));

        match removed {
            Some(_) => {
                info!("Mock: Deleted object {}/{}", bucket, key);
                Ok(())
            }
            None => Err(BackendError::NotFound(key.to_string())),
        }
    }
}
