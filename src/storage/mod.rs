//! Object store port and adapters.
//!
//! The pipeline only needs paginated listing, whole-object reads for extractors, and writes for
//! persisted extraction output. `LocalObjectStore` serves a directory tree (one subdirectory per
//! bucket) so the pipeline runs without cloud credentials; `MemoryObjectStore` backs tests.

pub mod content;
mod local;
mod memory;

pub use content::{ContentWriter, SplittingType};
pub use local::LocalObjectStore;
pub use memory::MemoryObjectStore;

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by object store adapters.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Bucket is not known to the store.
    #[error("Bucket not found: {0}")]
    BucketNotFound(String),
    /// Object key does not exist in the bucket.
    #[error("Object not found: {bucket}/{key}")]
    ObjectNotFound {
        /// Bucket that was searched.
        bucket: String,
        /// Missing key.
        key: String,
    },
    /// Continuation token was not produced by this store.
    #[error("Invalid continuation token: {0}")]
    InvalidContinuation(String),
    /// Filesystem failure in the local adapter.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Directory traversal failure in the local adapter.
    #[error("Directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),
    /// Persisted content could not be serialized.
    #[error("Serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    /// Object key, or a prefix ending in `/` for container entries.
    pub key: String,
    /// Whether the entry denotes a container rather than an object.
    pub is_prefix: bool,
}

impl ObjectEntry {
    /// Build an entry for a regular object.
    pub fn object(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            is_prefix: false,
        }
    }

    /// Build an entry for a container prefix.
    pub fn prefix(key: impl Into<String>) -> Self {
        let mut key = key.into();
        if !key.ends_with('/') {
            key.push('/');
        }
        Self {
            key,
            is_prefix: true,
        }
    }
}

/// One page of a listing.
#[derive(Debug, Clone, Default)]
pub struct ObjectPage {
    /// Entries on this page, in listing order.
    pub entries: Vec<ObjectEntry>,
    /// Token for the next page; `None` on the last page.
    pub next: Option<String>,
}

/// Paginated object storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List one page of entries under `prefix`, starting after `continuation`.
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<&str>,
    ) -> Result<ObjectPage, StorageError>;

    /// Read a whole object.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Write a whole object, replacing any previous content.
    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>)
    -> Result<(), StorageError>;
}

/// Slice a sorted key listing into pages addressed by numeric offsets.
pub(crate) fn paginate(
    entries: &[ObjectEntry],
    continuation: Option<&str>,
    page_size: usize,
) -> Result<ObjectPage, StorageError> {
    let start = match continuation {
        Some(token) => token
            .parse::<usize>()
            .map_err(|_| StorageError::InvalidContinuation(token.to_string()))?,
        None => 0,
    };
    let end = (start + page_size.max(1)).min(entries.len());
    let next = (end < entries.len()).then(|| end.to_string());
    let page = entries
        .iter()
        .skip(start)
        .take(end.saturating_sub(start))
        .cloned()
        .collect();
    Ok(ObjectPage {
        entries: page,
        next,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(count: usize) -> Vec<ObjectEntry> {
        (0..count)
            .map(|idx| ObjectEntry::object(format!("doc-{idx:02}.txt")))
            .collect()
    }

    #[test]
    fn paginate_walks_all_pages() {
        let first = paginate(&keys(5), None, 2).expect("page");
        assert_eq!(first.entries.len(), 2);
        assert_eq!(first.next.as_deref(), Some("2"));

        let last = paginate(&keys(5), Some("4"), 2).expect("page");
        assert_eq!(last.entries.len(), 1);
        assert!(last.next.is_none());
    }

    #[test]
    fn paginate_rejects_foreign_tokens() {
        let error = paginate(&keys(1), Some("abc"), 2).unwrap_err();
        assert!(matches!(error, StorageError::InvalidContinuation(_)));
    }

    #[test]
    fn prefix_entries_end_with_separator() {
        let entry = ObjectEntry::prefix("folder");
        assert_eq!(entry.key, "folder/");
        assert!(entry.is_prefix);
    }
}
