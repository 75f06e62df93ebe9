//! Partition-windowed object enumeration.
//!
//! Every invocation re-lists the bucket from the start and counts qualifying objects (type
//! filter applied before counting); only ranks inside `[index * size, (index + 1) * size)` are
//! emitted, and listing stops as soon as the upper bound is reached. Independent invocations
//! with distinct partition indices therefore cover a bucket exactly once without coordinating.

use std::ops::Range;
use std::sync::Arc;

use async_stream::try_stream;
use futures_core::Stream;
use thiserror::Error;

use crate::config::JobConfig;
use crate::document::{ExtractionModelParameters, ObjectLocation, ProcessingParameters};
use crate::status::{ObjectStatus, StatusRecorder};
use crate::storage::{ObjectStore, StorageError};

/// Key emitted when no object store is configured.
pub const MOCK_OBJECT_KEY: &str = "mock/test.pdf";

/// Errors that abort enumeration.
#[derive(Debug, Error)]
pub enum EnumerationError {
    /// The object listing call failed.
    #[error("Object listing failed: {0}")]
    Listing(#[from] StorageError),
}

/// What the consumer intends to do with each emitted object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumerationMode {
    /// Content will be extracted; a RUNNING status is written per emitted object.
    ExtractContent,
    /// Only the object path is needed (deletion); no status is written.
    MetadataOnly,
}

/// Lazily yields one [`ProcessingParameters`] per qualifying object in the partition window.
pub struct ObjectEnumerator {
    store: Option<Arc<dyn ObjectStore>>,
    bucket: String,
    prefix: String,
    allowed_types: Vec<String>,
    partition_size: usize,
    partition_index: usize,
    document_language: String,
    result_bucket: String,
    portal_bucket: String,
    extraction_endpoint: String,
    model: ExtractionModelParameters,
    execution_id: String,
    status: StatusRecorder,
}

impl ObjectEnumerator {
    /// Build an enumerator for `job`, correlating emitted records with `execution_id`.
    pub fn from_job(
        job: &JobConfig,
        store: Option<Arc<dyn ObjectStore>>,
        status: StatusRecorder,
        execution_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            bucket: job.bucket.clone(),
            prefix: job.prefix.clone(),
            allowed_types: job.index_type.allowed_file_types(),
            partition_size: job.partition_size,
            partition_index: job.partition_index,
            document_language: job.document_language.clone(),
            result_bucket: job.result_bucket.clone(),
            portal_bucket: job.portal_bucket.clone(),
            extraction_endpoint: job.extraction_endpoint.clone(),
            model: ExtractionModelParameters {
                endpoint_name: (!job.extraction_endpoint.is_empty())
                    .then(|| job.extraction_endpoint.clone()),
                model_id: Some(job.embedding_model_id.clone()),
                ..Default::default()
            },
            execution_id: execution_id.into(),
            status,
        }
    }

    /// Replace the allowed file-type set.
    pub fn with_allowed_types(mut self, allowed_types: Vec<String>) -> Self {
        self.allowed_types = allowed_types
            .into_iter()
            .map(|value| value.to_lowercase())
            .collect();
        self
    }

    /// Ranks of qualifying objects this invocation owns.
    pub fn window(&self) -> Range<usize> {
        let start = self.partition_index.saturating_mul(self.partition_size);
        start..start.saturating_add(self.partition_size)
    }

    /// Execution id stamped on every emitted record.
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Stream the objects of this partition window.
    pub fn enumerate(
        &self,
        mode: EnumerationMode,
    ) -> impl Stream<Item = Result<ProcessingParameters, EnumerationError>> + Send + '_ {
        try_stream! {
            let window = self.window();
            tracing::info!(
                bucket = %self.bucket,
                prefix = %self.prefix,
                window_start = window.start,
                window_end = window.end,
                mode = ?mode,
                execution_id = %self.execution_id,
                "Enumerating objects"
            );

            if let Some(store) = self.store.as_ref() {
                let mut counter = 0_usize;
                let mut continuation: Option<String> = None;

                'pages: loop {
                    let page = store
                        .list_page(&self.bucket, &self.prefix, continuation.as_deref())
                        .await?;

                    for entry in page.entries {
                        if entry.is_prefix || entry.key.ends_with('/') {
                            continue;
                        }
                        let file_type = file_type_of(&entry.key);
                        if !self.allowed_types.contains(&file_type) {
                            continue;
                        }

                        let rank = counter;
                        counter += 1;
                        if rank < window.start {
                            continue;
                        }

                        let params = self.parameters_for(entry.key, file_type);
                        self.mark_running(&params, mode).await;
                        yield params;

                        if counter >= window.end {
                            break 'pages;
                        }
                    }

                    match page.next {
                        Some(next) => continuation = Some(next),
                        None => break,
                    }
                }

                tracing::info!(scanned = counter, "Enumeration finished");
            } else {
                tracing::warn!(
                    bucket = %self.bucket,
                    "Object store not available; emitting mock record"
                );
                let params = self.parameters_for(MOCK_OBJECT_KEY.to_string(), file_type_of(MOCK_OBJECT_KEY));
                self.mark_running(&params, mode).await;
                yield params;
            }
        }
    }

    fn parameters_for(&self, key: String, file_type: String) -> ProcessingParameters {
        ProcessingParameters {
            source: ObjectLocation::new(self.bucket.clone(), key),
            file_type,
            document_language: self.document_language.clone(),
            result_bucket: self.result_bucket.clone(),
            portal_bucket: self.portal_bucket.clone(),
            extraction_endpoint: self.extraction_endpoint.clone(),
            model: self.model.clone(),
            execution_id: self.execution_id.clone(),
        }
    }

    async fn mark_running(&self, params: &ProcessingParameters, mode: EnumerationMode) {
        // Metadata-only listings feed deletion, which writes no terminal row per object; a
        // RUNNING row there would never be closed. Only extraction opens the lifecycle.
        if mode == EnumerationMode::ExtractContent {
            self.status
                .record(params, ObjectStatus::Running, "")
                .await;
        }
    }
}

/// Lower-cased text after the last `.` of `key`; the whole key when it has no dot.
pub fn file_type_of(key: &str) -> String {
    key.rsplit('.').next().unwrap_or(key).to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IndexType, OperationType};
    use crate::status::MemoryStatusSink;
    use crate::storage::MemoryObjectStore;
    use futures_util::{pin_mut, stream::StreamExt};
    use std::collections::BTreeSet;

    fn job(partition_size: usize, partition_index: usize) -> JobConfig {
        JobConfig {
            bucket: "docs".into(),
            prefix: String::new(),
            operation: OperationType::Create,
            partition_size,
            partition_index,
            document_language: "en".into(),
            index_type: IndexType::Qd,
            collection: "kb".into(),
            result_bucket: String::new(),
            portal_bucket: String::new(),
            extraction_endpoint: String::new(),
            embedding_model_id: "embed".into(),
        }
    }

    /// 25 qualifying pdfs interleaved with unsupported files and a folder marker.
    fn store() -> Arc<MemoryObjectStore> {
        let store = MemoryObjectStore::new(7);
        store.insert("docs", "folder/", "");
        for idx in 0..25 {
            store.insert("docs", &format!("doc-{idx:02}.pdf"), "content");
            if idx % 4 == 0 {
                store.insert("docs", &format!("doc-{idx:02}.exe"), "binary");
            }
        }
        Arc::new(store)
    }

    async fn collect_keys(enumerator: &ObjectEnumerator, mode: EnumerationMode) -> Vec<String> {
        let stream = enumerator.enumerate(mode);
        pin_mut!(stream);
        let mut keys = Vec::new();
        while let Some(item) = stream.next().await {
            keys.push(item.expect("params").source.key);
        }
        keys
    }

    fn enumerator(
        store: &Arc<MemoryObjectStore>,
        size: usize,
        index: usize,
    ) -> ObjectEnumerator {
        let store: Arc<dyn ObjectStore> = store.clone();
        ObjectEnumerator::from_job(&job(size, index), Some(store), StatusRecorder::default(), "exec")
    }

    #[tokio::test]
    async fn second_window_covers_ranks_ten_to_nineteen() {
        let keys = collect_keys(&enumerator(&store(), 10, 1), EnumerationMode::ExtractContent).await;
        let expected: Vec<_> = (10..20).map(|idx| format!("doc-{idx:02}.pdf")).collect();
        assert_eq!(keys, expected);
    }

    #[tokio::test]
    async fn windows_partition_the_qualifying_set_exactly_once() {
        let store = store();
        for size in 1..=12 {
            let mut seen = Vec::new();
            let mut index = 0;
            loop {
                let keys = collect_keys(&enumerator(&store, size, index), EnumerationMode::MetadataOnly).await;
                if keys.is_empty() {
                    break;
                }
                assert!(keys.len() <= size);
                seen.extend(keys);
                index += 1;
            }
            let unique: BTreeSet<_> = seen.iter().cloned().collect();
            assert_eq!(seen.len(), 25, "size {size}");
            assert_eq!(unique.len(), 25, "size {size}");
            assert!(unique.iter().all(|key| key.ends_with(".pdf")));
        }
    }

    #[tokio::test]
    async fn records_running_status_only_when_extracting() {
        let sink = Arc::new(MemoryStatusSink::new());
        let store: Arc<dyn ObjectStore> = store();
        let enumerator = ObjectEnumerator::from_job(
            &job(3, 0),
            Some(store),
            StatusRecorder::new(Some(sink.clone())),
            "exec",
        );

        collect_keys(&enumerator, EnumerationMode::MetadataOnly).await;
        assert!(sink.history().is_empty());

        collect_keys(&enumerator, EnumerationMode::ExtractContent).await;
        let records = sink.latest_records();
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|record| record.status == ObjectStatus::Running));
        assert!(records.iter().all(|record| record.execution_id == "exec"));
    }

    #[tokio::test]
    async fn missing_store_yields_mock_record() {
        let enumerator =
            ObjectEnumerator::from_job(&job(10, 0), None, StatusRecorder::default(), "exec");
        let stream = enumerator.enumerate(EnumerationMode::ExtractContent);
        pin_mut!(stream);
        let params = stream.next().await.expect("item").expect("params");
        assert_eq!(params.source.key, MOCK_OBJECT_KEY);
        assert_eq!(params.file_type, "pdf");
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn listing_failure_is_fatal() {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new(5).failing_listing());
        let enumerator =
            ObjectEnumerator::from_job(&job(10, 0), Some(store), StatusRecorder::default(), "exec");
        let stream = enumerator.enumerate(EnumerationMode::ExtractContent);
        pin_mut!(stream);
        let first = stream.next().await.expect("item");
        assert!(matches!(first, Err(EnumerationError::Listing(_))));
    }

    #[tokio::test]
    async fn allowed_types_are_applied_before_counting() {
        let store = store();
        let dyn_store: Arc<dyn ObjectStore> = store.clone();
        let enumerator = ObjectEnumerator::from_job(
            &job(2, 1),
            Some(dyn_store),
            StatusRecorder::default(),
            "exec",
        )
        .with_allowed_types(vec!["EXE".into()]);
        let keys = collect_keys(&enumerator, EnumerationMode::MetadataOnly).await;
        assert_eq!(keys, vec!["doc-08.exe", "doc-12.exe"]);
    }

    #[test]
    fn file_type_is_last_suffix_lower_cased() {
        assert_eq!(file_type_of("reports/Q1.Final.PDF"), "pdf");
        assert_eq!(file_type_of("README"), "readme");
    }
}
