//! Vector index contract.
//!
//! The pipeline only needs four operations from a search index: an existence probe, a batched
//! upsert of `(text, vector, metadata)` triples, a bulk delete by id, and a prefix lookup over
//! one payload field. [`crate::qdrant::QdrantIndex`] implements them over HTTP and
//! [`MemoryIndex`] keeps everything in process for tests and offline runs.

mod memory;

pub use memory::{MemoryIndex, StoredPoint};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::qdrant::QdrantError;

/// Payload field holding each chunk's canonical source path.
pub const SOURCE_PATH_FIELD: &str = "source_path";
/// Upper bound on ids returned by a single prefix lookup.
pub const PREFIX_QUERY_LIMIT: usize = 10_000;

/// Errors raised by vector index adapters.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Qdrant request failed.
    #[error("Qdrant request failed: {0}")]
    Qdrant(#[from] QdrantError),
    /// Parallel upsert inputs disagree in length.
    #[error("Mismatched upsert input: {texts} texts, {vectors} vectors, {metadatas} metadatas")]
    LengthMismatch {
        /// Number of texts supplied.
        texts: usize,
        /// Number of vectors supplied.
        vectors: usize,
        /// Number of metadata objects supplied.
        metadatas: usize,
    },
    /// Index refused the request.
    #[error("Index rejected request: {0}")]
    Rejected(String),
}

/// Search index operations used by the ingestion and deletion workers.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Whether `collection` exists.
    async fn exists(&self, collection: &str) -> Result<bool, IndexError>;

    /// Store one point per `(text, vector, metadata)` triple, creating the collection when
    /// needed. Returns the assigned point ids in input order.
    async fn upsert(
        &self,
        collection: &str,
        texts: Vec<String>,
        vectors: Vec<Vec<f32>>,
        metadatas: Vec<Value>,
    ) -> Result<Vec<String>, IndexError>;

    /// Delete points by id. Returns the number of ids submitted.
    async fn bulk_delete(&self, ids: &[String], collection: &str) -> Result<usize, IndexError>;

    /// Ids of points whose string payload `field` starts with `prefix`, at most `limit`.
    async fn search_by_prefix(
        &self,
        collection: &str,
        field: &str,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<String>, IndexError>;
}

pub(crate) fn check_lengths(
    texts: &[String],
    vectors: &[Vec<f32>],
    metadatas: &[Value],
) -> Result<(), IndexError> {
    if texts.len() == vectors.len() && texts.len() == metadatas.len() {
        Ok(())
    } else {
        Err(IndexError::LengthMismatch {
            texts: texts.len(),
            vectors: vectors.len(),
            metadatas: metadatas.len(),
        })
    }
}
