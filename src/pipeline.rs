//! Operation dispatcher tying enumeration, extraction, chunking, and the workers together.
//!
//! Processing inside one run is strictly sequential: one object, one batch, one index call at
//! a time. A failing object is logged, marked FAILED, and skipped; only configuration and
//! listing errors abort a run.

use std::sync::Arc;

use futures_util::{pin_mut, stream::StreamExt};
use serde::Serialize;
use thiserror::Error;
use tracing::Instrument;

use crate::config::{Config, ConfigError, JobConfig, OperationType};
use crate::document::ProcessingParameters;
use crate::embedding::{EmbeddingClient, HashEmbeddingClient, build_embedding_client};
use crate::enumerator::{EnumerationError, EnumerationMode, ObjectEnumerator};
use crate::extraction::{ExtractionError, ProcessorRegistry, is_splittable};
use crate::index::VectorIndex;
use crate::logging;
use crate::metrics::PipelineMetrics;
use crate::processing::{ChunkBatcher, ChunkingError, IdBatcher};
use crate::qdrant::QdrantIndex;
use crate::status::{JsonlStatusSink, ObjectStatus, StatusRecorder, StatusSink};
use crate::storage::{ContentWriter, LocalObjectStore, ObjectStore, SplittingType, StorageError};
use crate::workers::{DeletionWorker, IndexQuery, IngestionWorker, RetryPolicy, WorkerError};

/// Errors that abort a whole run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Job or process configuration is invalid.
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    /// Splitter settings are invalid.
    #[error("Invalid chunking settings: {0}")]
    Chunking(#[from] ChunkingError),
    /// The object listing failed.
    #[error(transparent)]
    Enumeration(#[from] EnumerationError),
}

/// Errors confined to one object; recorded as FAILED and the run continues.
#[derive(Debug, Error)]
pub enum ObjectError {
    /// Extraction failed or the type is unsupported.
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    /// Persisting extracted content failed.
    #[error("Failed to persist content: {0}")]
    Storage(#[from] StorageError),
    /// Ingestion or deletion failed after retries.
    #[error(transparent)]
    Worker(#[from] WorkerError),
}

/// Shared clients and settings, built once per process.
///
/// Every backing service is optional; an absent one degrades to mock or no-op behaviour.
#[derive(Clone)]
pub struct PipelineContext {
    /// Source and result object storage.
    pub store: Option<Arc<dyn ObjectStore>>,
    /// Vector index receiving chunks.
    pub index: Option<Arc<dyn VectorIndex>>,
    /// Embedding provider used at ingestion.
    pub embedder: Arc<dyn EmbeddingClient>,
    /// Per-object status tracking.
    pub status: StatusRecorder,
    /// File-type to extractor bindings.
    pub registry: ProcessorRegistry,
    /// Maximum characters per chunk.
    pub chunk_size: usize,
    /// Characters of overlap between chunks.
    pub chunk_overlap: usize,
    /// Items per content or id batch.
    pub batch_size: usize,
    /// Retry policy around each ingest call.
    pub retry: RetryPolicy,
    /// Cumulative counters.
    pub metrics: Arc<PipelineMetrics>,
}

impl PipelineContext {
    /// Context with the given collaborators and default settings.
    pub fn new(
        store: Option<Arc<dyn ObjectStore>>,
        index: Option<Arc<dyn VectorIndex>>,
        embedder: Arc<dyn EmbeddingClient>,
        status: Option<Arc<dyn StatusSink>>,
    ) -> Self {
        Self {
            registry: ProcessorRegistry::with_builtin(store.clone()),
            store,
            index,
            embedder,
            status: StatusRecorder::new(status),
            chunk_size: crate::processing::chunking::DEFAULT_CHUNK_SIZE,
            chunk_overlap: crate::processing::chunking::DEFAULT_CHUNK_OVERLAP,
            batch_size: crate::processing::batching::DEFAULT_BATCH_SIZE,
            retry: RetryPolicy::default(),
            metrics: Arc::new(PipelineMetrics::new()),
        }
    }

    /// Build every client from process configuration, leaving failed ones unset.
    pub fn from_config(config: &Config) -> Self {
        let store: Option<Arc<dyn ObjectStore>> = match config.object_store_root.as_ref() {
            Some(root) => {
                tracing::info!(root = %root.display(), "Using local object store");
                Some(Arc::new(LocalObjectStore::new(root.clone())))
            }
            None => {
                tracing::warn!("OBJECT_STORE_ROOT not set; enumeration will emit a mock record");
                None
            }
        };

        let index: Option<Arc<dyn VectorIndex>> = match config.qdrant_url.as_deref() {
            Some(url) => match QdrantIndex::new(url, config.qdrant_api_key.clone()) {
                Ok(index) => Some(Arc::new(index)),
                Err(error) => {
                    tracing::warn!(error = %error, "Qdrant client unavailable; indexing disabled");
                    None
                }
            },
            None => {
                tracing::warn!("QDRANT_URL not set; indexing disabled");
                None
            }
        };

        let embedder = build_embedding_client(config).unwrap_or_else(|error| {
            tracing::warn!(error = %error, "Embedding client unavailable; using hash embeddings");
            Arc::new(HashEmbeddingClient::new(
                config.embedding_dimension,
                config.embedding_model.clone(),
            ))
        });

        let status: Option<Arc<dyn StatusSink>> = match config.status_log_path.as_ref() {
            Some(path) => Some(Arc::new(JsonlStatusSink::new(path.clone()))),
            None => {
                tracing::warn!("STATUS_LOG_PATH not set; status tracking disabled");
                None
            }
        };

        Self {
            chunk_size: config.text_splitter_chunk_size,
            chunk_overlap: config.text_splitter_chunk_overlap,
            batch_size: config.ingest_batch_size,
            ..Self::new(store, index, embedder, status)
        }
    }

    /// Replace the extractor registry.
    pub fn with_registry(mut self, registry: ProcessorRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Replace the ingest retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Override splitter and batch settings.
    pub fn with_chunking(mut self, chunk_size: usize, chunk_overlap: usize, batch_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self.chunk_overlap = chunk_overlap;
        self.batch_size = batch_size;
        self
    }
}

/// Counts reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Execution id correlating status records.
    pub execution_id: String,
    /// Operation that ran.
    pub operation: String,
    /// Objects emitted by the enumerator, summed over passes.
    pub objects_seen: usize,
    /// Objects marked COMPLETED.
    pub objects_completed: usize,
    /// Objects marked FAILED (or failed deletions).
    pub objects_failed: usize,
    /// Chunks written to the result bucket layout.
    pub chunks_persisted: usize,
    /// Chunks written to the vector index.
    pub chunks_indexed: usize,
    /// Point ids deleted from the vector index.
    pub ids_deleted: usize,
}

#[derive(Debug, Default)]
struct ObjectOutcome {
    chunks_persisted: usize,
    chunks_indexed: usize,
}

/// Selects enumerator mode, batch generator, and worker per operation type and drives them.
pub struct Orchestrator {
    context: Arc<PipelineContext>,
}

impl Orchestrator {
    /// Orchestrate runs over the shared context.
    pub fn new(context: Arc<PipelineContext>) -> Self {
        Self { context }
    }

    /// Run `job` under a fresh execution id.
    pub async fn run(&self, job: &JobConfig) -> Result<RunSummary, PipelineError> {
        let execution_id = uuid::Uuid::new_v4().to_string();
        self.run_as(job, &execution_id).await
    }

    /// Run `job`, correlating status records with `execution_id`.
    ///
    /// Everything the run logs is emitted inside [`logging::run_span`].
    pub async fn run_as(
        &self,
        job: &JobConfig,
        execution_id: &str,
    ) -> Result<RunSummary, PipelineError> {
        let span = logging::run_span(execution_id, job.operation.as_str());
        self.execute(job, execution_id).instrument(span).await
    }

    async fn execute(
        &self,
        job: &JobConfig,
        execution_id: &str,
    ) -> Result<RunSummary, PipelineError> {
        self.context.metrics.record_run_started();
        let mut summary = RunSummary {
            execution_id: execution_id.to_string(),
            operation: job.operation.as_str().to_string(),
            ..Default::default()
        };
        tracing::info!(
            operation = job.operation.as_str(),
            bucket = %job.bucket,
            prefix = %job.prefix,
            collection = %job.collection,
            execution_id,
            "Starting run"
        );

        let result = match job.operation {
            OperationType::Create => self.create_pass(job, execution_id, false, &mut summary).await,
            OperationType::ExtractOnly => {
                self.create_pass(job, execution_id, true, &mut summary).await
            }
            OperationType::Delete => self.delete_pass(job, execution_id, &mut summary).await,
            OperationType::Update => {
                match self.delete_pass(job, execution_id, &mut summary).await {
                    Ok(()) => self.create_pass(job, execution_id, false, &mut summary).await,
                    Err(error) => Err(error),
                }
            }
        };

        match result {
            Ok(()) => {
                tracing::info!(
                    execution_id,
                    objects_seen = summary.objects_seen,
                    objects_completed = summary.objects_completed,
                    objects_failed = summary.objects_failed,
                    chunks_indexed = summary.chunks_indexed,
                    ids_deleted = summary.ids_deleted,
                    "Run finished"
                );
                Ok(summary)
            }
            Err(error) => {
                self.context.metrics.record_run_failed();
                tracing::error!(execution_id, error = %error, "Run aborted");
                Err(error)
            }
        }
    }

    async fn create_pass(
        &self,
        job: &JobConfig,
        execution_id: &str,
        extract_only: bool,
        summary: &mut RunSummary,
    ) -> Result<(), PipelineError> {
        let context = &self.context;
        let batcher = ChunkBatcher::new(
            context.chunk_size,
            context.chunk_overlap,
            context.batch_size,
        )?;
        let worker = IngestionWorker::new(
            context.index.clone(),
            context.embedder.clone(),
            job.collection.clone(),
            job.embedding_model_id.clone(),
        )
        .with_retry(context.retry);
        let writer = ContentWriter::new(context.store.clone());
        let enumerator = ObjectEnumerator::from_job(
            job,
            context.store.clone(),
            context.status.clone(),
            execution_id,
        );

        let stream = enumerator.enumerate(EnumerationMode::ExtractContent);
        pin_mut!(stream);
        while let Some(params) = stream.next().await {
            let params = params?;
            summary.objects_seen += 1;

            match self
                .process_object(&params, &batcher, &worker, &writer, extract_only)
                .await
            {
                Ok(outcome) => {
                    context
                        .status
                        .record(&params, ObjectStatus::Completed, "")
                        .await;
                    context
                        .metrics
                        .record_object_completed(outcome.chunks_indexed as u64);
                    summary.objects_completed += 1;
                    summary.chunks_persisted += outcome.chunks_persisted;
                    summary.chunks_indexed += outcome.chunks_indexed;
                }
                Err(error) => {
                    tracing::error!(
                        source_path = %params.source_path(),
                        execution_id = %params.execution_id,
                        error = %error,
                        "Error processing object"
                    );
                    context
                        .status
                        .record(&params, ObjectStatus::Failed, &error.to_string())
                        .await;
                    context.metrics.record_object_failed();
                    summary.objects_failed += 1;
                }
            }
        }

        Ok(())
    }

    async fn process_object(
        &self,
        params: &ProcessingParameters,
        batcher: &ChunkBatcher,
        worker: &IngestionWorker,
        writer: &ContentWriter,
        extract_only: bool,
    ) -> Result<ObjectOutcome, ObjectError> {
        let documents = self.context.registry.extract(params).await?;
        for document in &documents {
            writer.save(document, params, SplittingType::Semantic).await?;
        }

        let chunk_first = is_splittable(&params.file_type);
        let mut outcome = ObjectOutcome::default();
        let mut ordered_chunk_id = 0_u64;

        for mut batch in batcher.batches(documents, chunk_first) {
            for chunk in batch.iter_mut() {
                chunk.metadata.ordered_chunk_id = Some(ordered_chunk_id);
                ordered_chunk_id += 1;

                if let Some(heading) = chunk.metadata.complete_heading.as_deref() {
                    chunk.page_content = format!("{heading} {}", chunk.page_content);
                }

                writer.save(chunk, params, SplittingType::Chunk).await?;
            }
            outcome.chunks_persisted += batch.len();

            if !extract_only {
                outcome.chunks_indexed += worker.ingest(&batch).await?;
            }
        }

        tracing::debug!(
            source_path = %params.source_path(),
            chunks = outcome.chunks_persisted,
            indexed = outcome.chunks_indexed,
            "Processed object"
        );
        Ok(outcome)
    }

    async fn delete_pass(
        &self,
        job: &JobConfig,
        execution_id: &str,
        summary: &mut RunSummary,
    ) -> Result<(), PipelineError> {
        let context = &self.context;
        let batcher = IdBatcher::new(
            IndexQuery::new(context.index.clone(), job.collection.clone()),
            context.batch_size,
        );
        let worker = DeletionWorker::new(context.index.clone(), job.collection.clone());
        let enumerator = ObjectEnumerator::from_job(
            job,
            context.store.clone(),
            context.status.clone(),
            execution_id,
        );

        let stream = enumerator.enumerate(EnumerationMode::MetadataOnly);
        pin_mut!(stream);
        while let Some(params) = stream.next().await {
            let params = params?;
            summary.objects_seen += 1;
            let source_path = params.source_path();

            match Self::delete_object(&source_path, &batcher, &worker).await {
                Ok(deleted) => {
                    context.metrics.record_deleted(deleted as u64);
                    summary.ids_deleted += deleted;
                }
                Err(error) => {
                    tracing::error!(
                        source_path = %source_path,
                        execution_id,
                        error = %error,
                        "Error deleting object"
                    );
                    summary.objects_failed += 1;
                }
            }
        }

        Ok(())
    }

    async fn delete_object(
        source_path: &str,
        batcher: &IdBatcher,
        worker: &DeletionWorker,
    ) -> Result<usize, ObjectError> {
        let mut deleted = 0;
        for batch in batcher.batches(source_path).await? {
            deleted += worker.delete(&batch).await?;
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexType;
    use crate::index::MemoryIndex;
    use crate::status::MemoryStatusSink;
    use crate::storage::MemoryObjectStore;
    use std::time::Duration;

    fn job(operation: OperationType) -> JobConfig {
        JobConfig {
            bucket: "docs".into(),
            prefix: String::new(),
            operation,
            partition_size: 100,
            partition_index: 0,
            document_language: "en".into(),
            index_type: IndexType::Qd,
            collection: "kb".into(),
            result_bucket: "results".into(),
            portal_bucket: String::new(),
            extraction_endpoint: String::new(),
            embedding_model_id: "embed-v1".into(),
        }
    }

    struct Harness {
        store: Arc<MemoryObjectStore>,
        index: Arc<MemoryIndex>,
        status: Arc<MemoryStatusSink>,
        orchestrator: Orchestrator,
    }

    fn harness(with_index: bool) -> Harness {
        let store = Arc::new(MemoryObjectStore::new(4));
        let index = Arc::new(MemoryIndex::new());
        let status = Arc::new(MemoryStatusSink::new());
        let shared_store: Arc<dyn ObjectStore> = store.clone();
        let shared_index: Option<Arc<dyn VectorIndex>> = if with_index {
            Some(index.clone())
        } else {
            None
        };
        let context = PipelineContext::new(
            Some(shared_store),
            shared_index,
            Arc::new(HashEmbeddingClient::new(8, "hash")),
            Some(status.clone()),
        )
        .with_chunking(64, 0, 3)
        .with_retry(RetryPolicy {
            max_attempts: 3,
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            multiplier: Duration::from_millis(1),
        });
        Harness {
            store,
            index,
            status,
            orchestrator: Orchestrator::new(Arc::new(context)),
        }
    }

    #[tokio::test]
    async fn ordered_chunk_ids_and_heading_prefix_reach_persisted_chunks() {
        let h = harness(false);
        let body = "word ".repeat(60);
        h.store
            .insert("docs", "guide.md", format!("# Guide\n{body}\n"));

        let summary = h
            .orchestrator
            .run_as(&job(OperationType::ExtractOnly), "exec-1")
            .await
            .expect("run");
        assert_eq!(summary.objects_completed, 1);
        assert_eq!(summary.chunks_indexed, 0);
        assert!(summary.chunks_persisted > 3);

        let mut chunk_keys: Vec<_> = h
            .store
            .keys("results")
            .into_iter()
            .filter(|key| key.starts_with("CHUNK/"))
            .collect();
        chunk_keys.sort();
        let mut ordered: Vec<u64> = chunk_keys
            .iter()
            .map(|key| {
                let bytes = h.store.read("results", key).expect("chunk");
                let value: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
                assert!(
                    value["page_content"]
                        .as_str()
                        .expect("content")
                        .starts_with("Guide ")
                );
                value["metadata"]["ordered_chunk_id"].as_u64().expect("ordered id")
            })
            .collect();
        ordered.sort_unstable();
        let expected: Vec<u64> = (0..ordered.len() as u64).collect();
        assert_eq!(ordered, expected);
        assert!(
            h.store
                .keys("results")
                .iter()
                .any(|key| key.starts_with("SEMANTIC/docs/guide.md/"))
        );
    }

    #[tokio::test]
    async fn unsupported_object_fails_alone() {
        let h = harness(true);
        h.store.insert("docs", "a.md", "alpha");
        h.store.insert("docs", "b.pdf", "%PDF");
        h.store.insert("docs", "c.md", "gamma");

        let summary = h
            .orchestrator
            .run_as(&job(OperationType::Create), "exec-2")
            .await
            .expect("run");

        assert_eq!(summary.objects_seen, 3);
        assert_eq!(summary.objects_completed, 2);
        assert_eq!(summary.objects_failed, 1);
        let failed = h
            .status
            .latest("s3://docs/b.pdf", "exec-2")
            .expect("record");
        assert_eq!(failed.status, ObjectStatus::Failed);
        assert!(failed.detail.contains("Unsupported file type"));
        assert_eq!(
            h.status
                .latest("s3://docs/c.md", "exec-2")
                .expect("record")
                .status,
            ObjectStatus::Completed
        );
        assert_eq!(h.index.points("kb").len(), 2);
    }

    #[tokio::test]
    async fn exhausted_ingest_retries_mark_the_object_failed() {
        let h = harness(true);
        h.store.insert("docs", "a.md", "alpha");
        h.index.fail_next_upserts(usize::MAX);

        let summary = h
            .orchestrator
            .run_as(&job(OperationType::Create), "exec-3")
            .await
            .expect("run");
        assert_eq!(summary.objects_failed, 1);
        assert_eq!(h.index.upsert_calls(), 3);
        let record = h.status.latest("s3://docs/a.md", "exec-3").expect("record");
        assert_eq!(record.status, ObjectStatus::Failed);
    }

    #[tokio::test]
    async fn delete_removes_indexed_points_without_status_writes() {
        let h = harness(true);
        h.store.insert("docs", "a.md", "alpha");
        h.orchestrator
            .run_as(&job(OperationType::Create), "exec-4")
            .await
            .expect("create");
        let writes_after_create = h.status.history().len();
        assert_eq!(h.index.points("kb").len(), 1);

        let summary = h
            .orchestrator
            .run_as(&job(OperationType::Delete), "exec-5")
            .await
            .expect("delete");
        assert_eq!(summary.ids_deleted, 1);
        assert!(h.index.points("kb").is_empty());
        assert_eq!(h.status.history().len(), writes_after_create);
    }

    #[tokio::test]
    async fn listing_failure_aborts_the_run() {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new(4).failing_listing());
        let context = PipelineContext::new(
            Some(store),
            None,
            Arc::new(HashEmbeddingClient::new(8, "hash")),
            None,
        );
        let metrics = context.metrics.clone();
        let error = Orchestrator::new(Arc::new(context))
            .run(&job(OperationType::Create))
            .await
            .unwrap_err();
        assert!(matches!(error, PipelineError::Enumeration(_)));
        assert_eq!(metrics.snapshot().runs_failed, 1);
    }

    #[tokio::test]
    async fn invalid_chunk_size_is_fatal() {
        let context = PipelineContext::new(None, None, Arc::new(HashEmbeddingClient::new(8, "hash")), None)
            .with_chunking(0, 0, 10);
        let error = Orchestrator::new(Arc::new(context))
            .run(&job(OperationType::ExtractOnly))
            .await
            .unwrap_err();
        assert!(matches!(error, PipelineError::Chunking(ChunkingError::InvalidChunkSize)));
    }
}
