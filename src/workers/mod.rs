//! Ingestion, index-query, and deletion workers.
//!
//! Every worker holds an optional index handle. Without one, ingestion and deletion are
//! logged no-ops and queries return no ids, so extraction keeps working offline.

pub mod retry;

pub use retry::RetryPolicy;

use std::sync::Arc;

use thiserror::Error;

use crate::document::Document;
use crate::embedding::{EmbeddingClient, EmbeddingClientError};
use crate::index::{IndexError, PREFIX_QUERY_LIMIT, SOURCE_PATH_FIELD, VectorIndex};

/// Errors raised by workers after retries are exhausted.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Embedding provider failed.
    #[error("Failed to generate embeddings: {0}")]
    Embedding(#[from] EmbeddingClientError),
    /// Index call failed.
    #[error("Index request failed: {0}")]
    Index(#[from] IndexError),
    /// Provider returned a different number of vectors than texts submitted.
    #[error("Embedding count mismatch: expected {expected}, got {actual}")]
    EmbeddingCountMismatch {
        /// Texts submitted.
        expected: usize,
        /// Vectors returned.
        actual: usize,
    },
}

/// Embeds document batches and upserts them into the index.
#[derive(Clone)]
pub struct IngestionWorker {
    index: Option<Arc<dyn VectorIndex>>,
    embedder: Arc<dyn EmbeddingClient>,
    collection: String,
    embedding_model_id: String,
    retry: RetryPolicy,
}

impl IngestionWorker {
    /// Build a worker writing to `collection` with the default retry policy.
    pub fn new(
        index: Option<Arc<dyn VectorIndex>>,
        embedder: Arc<dyn EmbeddingClient>,
        collection: impl Into<String>,
        embedding_model_id: impl Into<String>,
    ) -> Self {
        Self {
            index,
            embedder,
            collection: collection.into(),
            embedding_model_id: embedding_model_id.into(),
            retry: RetryPolicy::default(),
        }
    }

    /// Override the retry policy wrapped around each ingest call.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Whether an index is configured.
    pub fn is_enabled(&self) -> bool {
        self.index.is_some()
    }

    /// Embed the batch in one call and upsert it, retrying the pair on failure.
    ///
    /// Returns the number of points written; zero when no index is configured.
    pub async fn ingest(&self, batch: &[Document]) -> Result<usize, WorkerError> {
        let Some(index) = self.index.as_ref() else {
            tracing::info!(
                documents = batch.len(),
                "Vector index not configured; skipping ingestion"
            );
            return Ok(0);
        };
        if batch.is_empty() {
            return Ok(0);
        }

        self.retry
            .run(|| self.ingest_once(index.as_ref(), batch))
            .await
    }

    async fn ingest_once(
        &self,
        index: &dyn VectorIndex,
        batch: &[Document],
    ) -> Result<usize, WorkerError> {
        let texts: Vec<String> = batch
            .iter()
            .map(|document| document.page_content.clone())
            .collect();
        let metadatas = batch
            .iter()
            .map(|document| {
                let mut stamped = document.clone();
                stamped.metadata.embedding_model_id = Some(self.embedding_model_id.clone());
                stamped.metadata_value()
            })
            .collect();

        let vectors = self.embedder.generate_embeddings(texts.clone()).await?;
        if vectors.len() != texts.len() {
            return Err(WorkerError::EmbeddingCountMismatch {
                expected: texts.len(),
                actual: vectors.len(),
            });
        }

        let ids = index
            .upsert(&self.collection, texts, vectors, metadatas)
            .await?;
        tracing::debug!(
            collection = %self.collection,
            points = ids.len(),
            "Ingested batch"
        );
        Ok(ids.len())
    }
}

/// Finds indexed point ids by source-path prefix.
#[derive(Clone)]
pub struct IndexQuery {
    index: Option<Arc<dyn VectorIndex>>,
    collection: String,
}

impl IndexQuery {
    /// Query `collection` through an optional index.
    pub fn new(index: Option<Arc<dyn VectorIndex>>, collection: impl Into<String>) -> Self {
        Self {
            index,
            collection: collection.into(),
        }
    }

    /// Ids whose `source_path` starts with `prefix`; empty when the collection is absent.
    pub async fn query(&self, prefix: &str) -> Result<Vec<String>, WorkerError> {
        let Some(index) = self.index.as_ref() else {
            tracing::info!(prefix, "Vector index not configured; nothing to query");
            return Ok(Vec::new());
        };
        if !index.exists(&self.collection).await? {
            tracing::info!(collection = %self.collection, "Collection does not exist yet");
            return Ok(Vec::new());
        }

        let ids = index
            .search_by_prefix(&self.collection, SOURCE_PATH_FIELD, prefix, PREFIX_QUERY_LIMIT)
            .await?;
        Ok(ids)
    }
}

/// Bulk-deletes points by id.
#[derive(Clone)]
pub struct DeletionWorker {
    index: Option<Arc<dyn VectorIndex>>,
    collection: String,
}

impl DeletionWorker {
    /// Delete from `collection` through an optional index.
    pub fn new(index: Option<Arc<dyn VectorIndex>>, collection: impl Into<String>) -> Self {
        Self {
            index,
            collection: collection.into(),
        }
    }

    /// Delete `ids`; empty lists never reach the index.
    pub async fn delete(&self, ids: &[String]) -> Result<usize, WorkerError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let Some(index) = self.index.as_ref() else {
            tracing::warn!(ids = ids.len(), "Vector index not configured; skipping delete");
            return Ok(0);
        };
        let deleted = index.bulk_delete(ids, &self.collection).await?;
        tracing::debug!(collection = %self.collection, deleted, "Deleted batch");
        Ok(deleted)
    }
}
