//! Fixed-size batch generators for chunk streams and id lists.

use super::chunking::{TextSplitter, emit, probe_sizes};
use super::types::ChunkingError;
use crate::document::Document;
use crate::workers::{IndexQuery, WorkerError};

/// Default items per batch.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Drains up to `batch_size` items per step and ends on the first empty drain.
pub struct Batches<I> {
    inner: I,
    batch_size: usize,
}

impl<I: Iterator> Batches<I> {
    /// Batch `items`; a zero size is treated as one.
    pub fn new(items: impl IntoIterator<IntoIter = I>, batch_size: usize) -> Self {
        Self {
            inner: items.into_iter(),
            batch_size: batch_size.max(1),
        }
    }
}

impl<I: Iterator> Iterator for Batches<I> {
    type Item = Vec<I::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        let batch: Vec<_> = self.inner.by_ref().take(self.batch_size).collect();
        if batch.is_empty() { None } else { Some(batch) }
    }
}

/// Stream of documents, chunked or passed through as extracted.
pub type DocumentStream = Box<dyn Iterator<Item = Document> + Send>;

/// Batch generator for content going to the index.
#[derive(Debug, Clone, Copy)]
pub struct ChunkBatcher {
    splitter: TextSplitter,
    batch_size: usize,
}

impl ChunkBatcher {
    /// Validate the splitter settings and build a batcher.
    pub fn new(chunk_size: usize, overlap: usize, batch_size: usize) -> Result<Self, ChunkingError> {
        Ok(Self {
            splitter: TextSplitter::new(chunk_size, overlap)?,
            batch_size: batch_size.max(1),
        })
    }

    /// Items per batch.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Batch `documents`, running them through both chunking passes first when `chunk_first`.
    pub fn batches(&self, documents: Vec<Document>, chunk_first: bool) -> Batches<DocumentStream> {
        let stream: DocumentStream = if chunk_first {
            let sizes = probe_sizes(&documents, &self.splitter);
            Box::new(emit(documents, sizes, self.splitter))
        } else {
            Box::new(documents.into_iter())
        };
        Batches::new(stream, self.batch_size)
    }
}

/// Batch generator for ids going to deletion.
#[derive(Clone)]
pub struct IdBatcher {
    query: IndexQuery,
    batch_size: usize,
}

impl IdBatcher {
    /// Batch the results of `query`.
    pub fn new(query: IndexQuery, batch_size: usize) -> Self {
        Self {
            query,
            batch_size: batch_size.max(1),
        }
    }

    /// Look up ids indexed for `source_path` and batch them.
    pub async fn batches(
        &self,
        source_path: &str,
    ) -> Result<Batches<std::vec::IntoIter<String>>, WorkerError> {
        let ids = self.query.query(source_path).await?;
        tracing::debug!(source_path, ids = ids.len(), "Resolved indexed ids");
        Ok(Batches::new(ids, self.batch_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentMetadata;
    use crate::index::{MemoryIndex, VectorIndex};
    use serde_json::json;
    use std::sync::Arc;

    fn document(chunk_id: &str, text: &str) -> Document {
        Document {
            page_content: text.to_string(),
            metadata: DocumentMetadata {
                chunk_id: chunk_id.to_string(),
                ..Default::default()
            },
        }
    }

    #[test]
    fn batches_drain_fixed_sizes() {
        let sizes: Vec<_> = Batches::new(0..23, 10).map(|batch| batch.len()).collect();
        assert_eq!(sizes, vec![10, 10, 3]);
        assert_eq!(Batches::new(Vec::<u8>::new(), 10).count(), 0);
        assert_eq!(Batches::new(0..3, 0).count(), 3);
    }

    #[test]
    fn pass_through_keeps_documents_unchanged() {
        let batcher = ChunkBatcher::new(8, 0, 2).expect("batcher");
        let documents = vec![
            document("r-0", "a row that is far longer than eight characters"),
            document("r-1", "another long row of tabular data"),
            document("r-2", "third"),
        ];
        let flattened: Vec<_> = batcher
            .batches(documents.clone(), false)
            .flatten()
            .collect();
        assert_eq!(flattened, documents);
    }

    #[test]
    fn chunk_first_splits_before_batching() {
        let batcher = ChunkBatcher::new(20, 0, 3).expect("batcher");
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa";
        let batches: Vec<_> = batcher.batches(vec![document("d", text)], true).collect();
        let chunks: Vec<_> = batches.iter().flatten().collect();
        assert!(chunks.len() > 1);
        assert!(batches.iter().all(|batch| batch.len() <= 3));
        assert_eq!(chunks[0].metadata.chunk_id, "d-1");
    }

    #[tokio::test]
    async fn id_batches_come_from_the_index() {
        let index = Arc::new(MemoryIndex::new());
        let count = 25;
        index
            .upsert(
                "kb",
                (0..count).map(|idx| format!("t{idx}")).collect(),
                vec![vec![1.0]; count],
                vec![json!({ "source_path": "s3://docs/a.md" }); count],
            )
            .await
            .expect("upsert");

        let shared: Arc<dyn VectorIndex> = index;
        let batcher = IdBatcher::new(IndexQuery::new(Some(shared), "kb"), 10);
        let sizes: Vec<_> = batcher
            .batches("s3://docs/a.md")
            .await
            .expect("batches")
            .map(|batch| batch.len())
            .collect();
        assert_eq!(sizes, vec![10, 10, 5]);
    }
}
