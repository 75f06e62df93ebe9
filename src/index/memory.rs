use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value;

use super::{IndexError, VectorIndex, check_lengths};
use crate::qdrant::payload::{build_payload, generate_point_id};

/// Point held by [`MemoryIndex`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoredPoint {
    /// Chunk text.
    pub text: String,
    /// Embedding vector.
    pub vector: Vec<f32>,
    /// Flattened payload (metadata plus `page_content`).
    pub payload: Value,
}

/// In-process index keyed by collection then point id.
#[derive(Default)]
pub struct MemoryIndex {
    collections: Mutex<HashMap<String, BTreeMap<String, StoredPoint>>>,
    failing_upserts: AtomicUsize,
    upsert_calls: AtomicUsize,
}

impl MemoryIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` upsert calls fail.
    pub fn fail_next_upserts(&self, count: usize) {
        self.failing_upserts.store(count, Ordering::SeqCst);
    }

    /// Number of upsert calls received, including failed ones.
    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    /// Points stored in `collection`, ordered by id.
    pub fn points(&self, collection: &str) -> Vec<(String, StoredPoint)> {
        let guard = self.collections.lock().unwrap_or_else(|err| err.into_inner());
        guard
            .get(collection)
            .map(|points| {
                points
                    .iter()
                    .map(|(id, point)| (id.clone(), point.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn exists(&self, collection: &str) -> Result<bool, IndexError> {
        let guard = self.collections.lock().unwrap_or_else(|err| err.into_inner());
        Ok(guard.contains_key(collection))
    }

    async fn upsert(
        &self,
        collection: &str,
        texts: Vec<String>,
        vectors: Vec<Vec<f32>>,
        metadatas: Vec<Value>,
    ) -> Result<Vec<String>, IndexError> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        let should_fail = self
            .failing_upserts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok();
        if should_fail {
            return Err(IndexError::Rejected("injected upsert failure".to_string()));
        }
        check_lengths(&texts, &vectors, &metadatas)?;

        let mut guard = self.collections.lock().unwrap_or_else(|err| err.into_inner());
        let points = guard.entry(collection.to_string()).or_default();
        let mut ids = Vec::with_capacity(texts.len());
        for ((text, vector), metadata) in texts.into_iter().zip(vectors).zip(metadatas) {
            let id = generate_point_id();
            let payload = build_payload(&text, metadata);
            points.insert(
                id.clone(),
                StoredPoint {
                    text,
                    vector,
                    payload,
                },
            );
            ids.push(id);
        }
        Ok(ids)
    }

    async fn bulk_delete(&self, ids: &[String], collection: &str) -> Result<usize, IndexError> {
        let mut guard = self.collections.lock().unwrap_or_else(|err| err.into_inner());
        if let Some(points) = guard.get_mut(collection) {
            for id in ids {
                points.remove(id);
            }
        }
        Ok(ids.len())
    }

    async fn search_by_prefix(
        &self,
        collection: &str,
        field: &str,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<String>, IndexError> {
        let guard = self.collections.lock().unwrap_or_else(|err| err.into_inner());
        let Some(points) = guard.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(points
            .iter()
            .filter(|(_, point)| {
                point
                    .payload
                    .get(field)
                    .and_then(Value::as_str)
                    .is_some_and(|value| value.starts_with(prefix))
            })
            .map(|(id, _)| id.clone())
            .take(limit)
            .collect())
    }
}
