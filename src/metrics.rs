use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing pipeline activity since startup.
#[derive(Default)]
pub struct PipelineMetrics {
    runs_started: AtomicU64,
    runs_failed: AtomicU64,
    objects_completed: AtomicU64,
    objects_failed: AtomicU64,
    chunks_indexed: AtomicU64,
    ids_deleted: AtomicU64,
}

impl PipelineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the start of a run.
    pub fn record_run_started(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a run aborted by a fatal error.
    pub fn record_run_failed(&self) {
        self.runs_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an object that finished and the number of chunks it sent to the index.
    pub fn record_object_completed(&self, chunks_indexed: u64) {
        self.objects_completed.fetch_add(1, Ordering::Relaxed);
        self.chunks_indexed
            .fetch_add(chunks_indexed, Ordering::Relaxed);
    }

    /// Record an object whose processing failed.
    pub fn record_object_failed(&self) {
        self.objects_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record ids removed from the index.
    pub fn record_deleted(&self, count: u64) {
        self.ids_deleted.fetch_add(count, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            runs_started: self.runs_started.load(Ordering::Relaxed),
            runs_failed: self.runs_failed.load(Ordering::Relaxed),
            objects_completed: self.objects_completed.load(Ordering::Relaxed),
            objects_failed: self.objects_failed.load(Ordering::Relaxed),
            chunks_indexed: self.chunks_indexed.load(Ordering::Relaxed),
            ids_deleted: self.ids_deleted.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of pipeline counters used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Runs started since startup.
    pub runs_started: u64,
    /// Runs aborted by a fatal error.
    pub runs_failed: u64,
    /// Objects that reached COMPLETED.
    pub objects_completed: u64,
    /// Objects that reached FAILED.
    pub objects_failed: u64,
    /// Chunks written to the vector index.
    pub chunks_indexed: u64,
    /// Point ids deleted from the vector index.
    pub ids_deleted: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_objects_and_chunks() {
        let metrics = PipelineMetrics::new();
        metrics.record_run_started();
        metrics.record_object_completed(2);
        metrics.record_object_completed(3);
        metrics.record_object_failed();
        metrics.record_deleted(4);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.runs_started, 1);
        assert_eq!(snapshot.objects_completed, 2);
        assert_eq!(snapshot.objects_failed, 1);
        assert_eq!(snapshot.chunks_indexed, 5);
        assert_eq!(snapshot.ids_deleted, 4);
    }

    #[test]
    fn snapshot_starts_at_zero() {
        let snapshot = PipelineMetrics::new().snapshot();
        assert_eq!(snapshot.runs_started, 0);
        assert_eq!(snapshot.chunks_indexed, 0);
    }
}
