use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use walkdir::WalkDir;

use super::{ObjectEntry, ObjectPage, ObjectStore, StorageError, paginate};

const LOCAL_PAGE_SIZE: usize = 1000;

/// Directory-backed object store: `<root>/<bucket>/<key>`.
///
/// Listings are sorted by key and include directories as prefix entries, mirroring how
/// object stores report zero-byte "folder" markers.
///
/// A listing walks the directory tree once, on its first page; later pages are served from
/// that snapshot until the last page is handed out.
pub struct LocalObjectStore {
    root: PathBuf,
    page_size: usize,
    listings: Mutex<HashMap<ListingKey, Arc<Vec<ObjectEntry>>>>,
}

type ListingKey = (String, String);

impl LocalObjectStore {
    /// Serve buckets from subdirectories of `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            page_size: LOCAL_PAGE_SIZE,
            listings: Mutex::new(HashMap::new()),
        }
    }

    /// Override the listing page size.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn bucket_path(&self, bucket: &str) -> PathBuf {
        self.root.join(bucket)
    }

    fn list_entries(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectEntry>, StorageError> {
        let bucket_root = self.bucket_path(bucket);
        if !bucket_root.is_dir() {
            return Err(StorageError::BucketNotFound(bucket.to_string()));
        }

        let mut entries = Vec::new();
        for entry in WalkDir::new(&bucket_root).min_depth(1) {
            let entry = entry?;
            let Some(key) = relative_key(&bucket_root, entry.path()) else {
                continue;
            };
            let candidate = if entry.file_type().is_dir() {
                ObjectEntry::prefix(key)
            } else {
                ObjectEntry::object(key)
            };
            if candidate.key.starts_with(prefix) {
                entries.push(candidate);
            }
        }
        entries.sort_by(|left, right| left.key.cmp(&right.key));
        Ok(entries)
    }

    /// Sorted entries for one listing: a fresh walk on the first page, the snapshot after.
    fn listing(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<&str>,
    ) -> Result<Arc<Vec<ObjectEntry>>, StorageError> {
        let key = (bucket.to_string(), prefix.to_string());
        if continuation.is_some() {
            let cached = self.cached_listings().get(&key).cloned();
            if let Some(cached) = cached {
                return Ok(cached);
            }
        }
        let entries = Arc::new(self.list_entries(bucket, prefix)?);
        tracing::trace!(bucket, prefix, total = entries.len(), "Walked local bucket");
        self.cached_listings().insert(key, Arc::clone(&entries));
        Ok(entries)
    }

    fn cached_listings(&self) -> MutexGuard<'_, HashMap<ListingKey, Arc<Vec<ObjectEntry>>>> {
        self.listings.lock().unwrap_or_else(|err| err.into_inner())
    }
}

fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<&str>,
    ) -> Result<ObjectPage, StorageError> {
        let entries = self.listing(bucket, prefix, continuation)?;
        let page = paginate(&entries, continuation, self.page_size)?;
        if page.next.is_none() {
            self.cached_listings()
                .remove(&(bucket.to_string(), prefix.to_string()));
        }
        Ok(page)
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.bucket_path(bucket).join(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::ObjectNotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
    ) -> Result<(), StorageError> {
        let path = self.bucket_path(bucket).join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, body).await?;
        Ok(())
    }
}
