//! Persisted extraction output.
//!
//! Every extracted document is written to the result bucket twice over its lifetime: once as a
//! whole `SEMANTIC` document straight out of the extractor, and once per `CHUNK` after
//! splitting. Keys follow `{splitting_type}/{source_bucket}/{source_key}/{chunk_id}.json`.

use std::sync::Arc;

use serde::Serialize;

use super::{ObjectStore, StorageError};
use crate::document::{Document, ProcessingParameters};

/// Stage at which a document was persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SplittingType {
    /// Whole extracted document before chunking.
    Semantic,
    /// Post-chunk piece as indexed.
    Chunk,
}

impl SplittingType {
    /// Tag used in persisted keys and bodies.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Semantic => "SEMANTIC",
            Self::Chunk => "CHUNK",
        }
    }
}

#[derive(Serialize)]
struct PersistedDocument<'a> {
    page_content: &'a str,
    metadata: &'a crate::document::DocumentMetadata,
    source_path: String,
    splitting_type: SplittingType,
}

/// Writes documents to the result bucket; a no-op when no store or bucket is configured.
#[derive(Clone)]
pub struct ContentWriter {
    store: Option<Arc<dyn ObjectStore>>,
}

impl ContentWriter {
    /// Build a writer over an optional store.
    pub fn new(store: Option<Arc<dyn ObjectStore>>) -> Self {
        Self { store }
    }

    /// Persist one document under the layout described in the module docs.
    pub async fn save(
        &self,
        document: &Document,
        params: &ProcessingParameters,
        splitting_type: SplittingType,
    ) -> Result<(), StorageError> {
        let Some(store) = self.store.as_ref() else {
            tracing::debug!(
                chunk_id = %document.metadata.chunk_id,
                "Object store unavailable; skipping content persistence"
            );
            return Ok(());
        };
        if params.result_bucket.trim().is_empty() {
            tracing::debug!(
                chunk_id = %document.metadata.chunk_id,
                "No result bucket configured; skipping content persistence"
            );
            return Ok(());
        }

        let key = content_key(document, params, splitting_type);
        let body = serde_json::to_vec(&PersistedDocument {
            page_content: &document.page_content,
            metadata: &document.metadata,
            source_path: params.source_path(),
            splitting_type,
        })?;
        store.put_object(&params.result_bucket, &key, body).await?;
        tracing::trace!(key = %key, splitting_type = splitting_type.as_str(), "Persisted content");
        Ok(())
    }
}

/// Result-bucket key for a document at the given stage.
pub fn content_key(
    document: &Document,
    params: &ProcessingParameters,
    splitting_type: SplittingType,
) -> String {
    format!(
        "{}/{}/{}/{}.json",
        splitting_type.as_str(),
        params.source.bucket,
        params.source.key,
        sanitize_component(&document.metadata.chunk_id)
    )
}

fn sanitize_component(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    if cleaned.trim().is_empty() {
        "unnamed".to_string()
    } else {
        cleaned
    }
}
