use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{ObjectEntry, ObjectPage, ObjectStore, StorageError, paginate};

/// In-memory object store with configurable page size and optional listing failure.
#[derive(Default)]
pub struct MemoryObjectStore {
    buckets: Mutex<HashMap<String, BTreeMap<String, Vec<u8>>>>,
    page_size: usize,
    fail_listing: bool,
}

impl MemoryObjectStore {
    /// Create an empty store returning pages of `page_size` entries.
    pub fn new(page_size: usize) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            page_size: page_size.max(1),
            fail_listing: false,
        }
    }

    /// Make every listing call fail, for exercising fatal enumeration errors.
    pub fn failing_listing(mut self) -> Self {
        self.fail_listing = true;
        self
    }

    /// Insert an object synchronously.
    pub fn insert(&self, bucket: &str, key: &str, body: impl Into<Vec<u8>>) {
        let mut guard = self.buckets.lock().unwrap_or_else(|err| err.into_inner());
        guard
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), body.into());
    }

    /// Keys stored in a bucket, sorted.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        let guard = self.buckets.lock().unwrap_or_else(|err| err.into_inner());
        guard
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Read an object synchronously.
    pub fn read(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        let guard = self.buckets.lock().unwrap_or_else(|err| err.into_inner());
        guard.get(bucket).and_then(|objects| objects.get(key).cloned())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<&str>,
    ) -> Result<ObjectPage, StorageError> {
        if self.fail_listing {
            return Err(StorageError::BucketNotFound(bucket.to_string()));
        }
        let entries: Vec<ObjectEntry> = {
            let guard = self.buckets.lock().unwrap_or_else(|err| err.into_inner());
            let objects = guard
                .get(bucket)
                .ok_or_else(|| StorageError::BucketNotFound(bucket.to_string()))?;
            objects
                .keys()
                .filter(|key| key.starts_with(prefix))
                .map(|key| {
                    if key.ends_with('/') {
                        ObjectEntry::prefix(key.clone())
                    } else {
                        ObjectEntry::object(key.clone())
                    }
                })
                .collect()
        };
        paginate(&entries, continuation, self.page_size)
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        self.read(bucket, key)
            .ok_or_else(|| StorageError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
    ) -> Result<(), StorageError> {
        self.insert(bucket, key, body);
        Ok(())
    }
}
