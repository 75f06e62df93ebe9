//! Per-object lifecycle tracking.
//!
//! Status writes are best effort: the pipeline holds an optional [`StatusSink`] behind a
//! [`StatusRecorder`], and neither a missing sink nor a failing write ever interrupts a run.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::io::AsyncWriteExt;

use crate::document::ProcessingParameters;

/// Lifecycle state of one object within one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObjectStatus {
    /// Selected by the enumerator and in progress.
    Running,
    /// Extracted, persisted, and (unless extract-only) indexed.
    Completed,
    /// Processing raised; `detail` carries the error text.
    Failed,
}

/// Row written to the status table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRecord {
    /// Canonical `s3://bucket/key` path.
    #[serde(rename = "s3Path")]
    pub source_path: String,
    /// Source bucket.
    pub s3_bucket: String,
    /// Source key.
    pub s3_prefix: String,
    /// Execution the record belongs to.
    pub execution_id: String,
    /// Lifecycle state.
    pub status: ObjectStatus,
    /// Error text for failed objects, empty otherwise.
    pub detail: String,
    /// RFC3339 timestamp of the write.
    pub create_time: String,
}

impl StatusRecord {
    /// Build a record for `params` stamped with the current time.
    pub fn new(params: &ProcessingParameters, status: ObjectStatus, detail: &str) -> Self {
        Self {
            source_path: params.source_path(),
            s3_bucket: params.source.bucket.clone(),
            s3_prefix: params.source.key.clone(),
            execution_id: params.execution_id.clone(),
            status,
            detail: detail.to_string(),
            create_time: current_timestamp_rfc3339(),
        }
    }
}

/// Errors raised by status sinks.
#[derive(Debug, Error)]
pub enum StatusError {
    /// Record could not be written to disk.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Record could not be serialized.
    #[error("Serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Destination for status records.
#[async_trait]
pub trait StatusSink: Send + Sync {
    /// Store one record, replacing any previous record with the same key.
    async fn put(&self, record: StatusRecord) -> Result<(), StatusError>;
}

/// Best-effort front for an optional sink.
#[derive(Clone, Default)]
pub struct StatusRecorder {
    sink: Option<Arc<dyn StatusSink>>,
}

impl StatusRecorder {
    /// Wrap an optional sink.
    pub fn new(sink: Option<Arc<dyn StatusSink>>) -> Self {
        Self { sink }
    }

    /// Record a status transition, logging instead of failing.
    pub async fn record(&self, params: &ProcessingParameters, status: ObjectStatus, detail: &str) {
        let Some(sink) = self.sink.as_ref() else {
            tracing::info!(
                source_path = %params.source_path(),
                status = ?status,
                "Status table not available"
            );
            return;
        };

        let record = StatusRecord::new(params, status, detail);
        if let Err(error) = sink.put(record).await {
            tracing::warn!(
                source_path = %params.source_path(),
                execution_id = %params.execution_id,
                status = ?status,
                error = %error,
                "Could not update status table"
            );
        }
    }
}

/// Appends JSON lines to a file; the latest line per key is authoritative.
pub struct JsonlStatusSink {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl JsonlStatusSink {
    /// Append to `path`, creating parent directories on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }
}

#[async_trait]
impl StatusSink for JsonlStatusSink {
    async fn put(&self, record: StatusRecord) -> Result<(), StatusError> {
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

/// In-memory sink keeping the latest record per `(source_path, execution_id)` and full history.
#[derive(Default)]
pub struct MemoryStatusSink {
    inner: Mutex<MemoryStatusState>,
}

#[derive(Default)]
struct MemoryStatusState {
    latest: HashMap<(String, String), StatusRecord>,
    history: Vec<StatusRecord>,
}

impl MemoryStatusSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest record for an object within an execution.
    pub fn latest(&self, source_path: &str, execution_id: &str) -> Option<StatusRecord> {
        let guard = self.inner.lock().unwrap_or_else(|err| err.into_inner());
        guard
            .latest
            .get(&(source_path.to_string(), execution_id.to_string()))
            .cloned()
    }

    /// Latest records across all objects.
    pub fn latest_records(&self) -> Vec<StatusRecord> {
        let guard = self.inner.lock().unwrap_or_else(|err| err.into_inner());
        let mut records: Vec<_> = guard.latest.values().cloned().collect();
        records.sort_by(|left, right| left.source_path.cmp(&right.source_path));
        records
    }

    /// Every record in write order.
    pub fn history(&self) -> Vec<StatusRecord> {
        let guard = self.inner.lock().unwrap_or_else(|err| err.into_inner());
        guard.history.clone()
    }
}

#[async_trait]
impl StatusSink for MemoryStatusSink {
    async fn put(&self, record: StatusRecord) -> Result<(), StatusError> {
        let mut guard = self.inner.lock().unwrap_or_else(|err| err.into_inner());
        guard.latest.insert(
            (record.source_path.clone(), record.execution_id.clone()),
            record.clone(),
        );
        guard.history.push(record);
        Ok(())
    }
}

/// Current timestamp formatted for status rows.
pub(crate) fn current_timestamp_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}
