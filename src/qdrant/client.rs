//! HTTP adapter implementing [`VectorIndex`] against Qdrant.

use async_trait::async_trait;
use futures_util::{pin_mut, stream::StreamExt};
use reqwest::{Client, Method, StatusCode};
use serde_json::{Value, json};

use crate::index::{IndexError, SOURCE_PATH_FIELD, VectorIndex, check_lengths};
use crate::qdrant::payload::{build_payload, generate_point_id};
use crate::qdrant::scroller::stream_payloads_with_ids;
use crate::qdrant::types::QdrantError;

/// Lightweight HTTP client for Qdrant operations.
pub struct QdrantIndex {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl QdrantIndex {
    /// Construct a client for the Qdrant instance at `url`.
    pub fn new(url: &str, api_key: Option<String>) -> Result<Self, QdrantError> {
        let client = Client::builder().user_agent("kb-ingest/0.1").build()?;
        let base_url = normalize_base_url(url).map_err(QdrantError::InvalidUrl)?;
        tracing::debug!(
            url = %base_url,
            has_api_key = %api_key
                .as_deref()
                .map(|value| !value.is_empty())
                .unwrap_or(false),
            "Initialized Qdrant HTTP client"
        );

        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    /// Create a collection only when it is missing from Qdrant.
    pub async fn create_collection_if_not_exists(
        &self,
        collection_name: &str,
        vector_size: u64,
    ) -> Result<(), QdrantError> {
        if self.collection_exists(collection_name).await? {
            return Ok(());
        }

        tracing::info!(
            collection = collection_name,
            vector_size,
            "Creating collection"
        );
        self.create_collection(collection_name, vector_size).await?;
        self.ensure_payload_indexes(collection_name).await
    }

    /// Create or update a collection with the specified vector size.
    pub async fn create_collection(
        &self,
        collection_name: &str,
        vector_size: u64,
    ) -> Result<(), QdrantError> {
        let body = json!({
            "vectors": {
                "size": vector_size,
                "distance": "Cosine"
            }
        });

        let response = self
            .request(Method::PUT, &format!("collections/{collection_name}"))
            .json(&body)
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(collection = collection_name, "Collection ensured/created");
        })
        .await
    }

    /// Ensure keyword payload indexes exist for the lineage fields used in lookups.
    pub async fn ensure_payload_indexes(&self, collection_name: &str) -> Result<(), QdrantError> {
        for field in [SOURCE_PATH_FIELD, "chunk_id"] {
            let body = json!({
                "field_name": field,
                "field_schema": "keyword",
            });

            let response = self
                .request(Method::PUT, &format!("collections/{collection_name}/index"))
                .json(&body)
                .send()
                .await?;

            if response.status().is_success() {
                tracing::debug!(collection = collection_name, field, "Payload index ensured");
            } else if response.status() == StatusCode::CONFLICT {
                tracing::debug!(
                    collection = collection_name,
                    field,
                    "Payload index already exists"
                );
            } else {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                let error = QdrantError::UnexpectedStatus { status, body };
                tracing::warn!(collection = collection_name, field, error = %error, "Failed to ensure payload index");
            }
        }

        Ok(())
    }

    /// Whether `collection_name` is present.
    pub async fn collection_exists(&self, collection_name: &str) -> Result<bool, QdrantError> {
        let response = self
            .request(Method::GET, &format!("collections/{collection_name}"))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => {
                let body = response.text().await.unwrap_or_default();
                let error = QdrantError::UnexpectedStatus { status, body };
                tracing::error!(collection = collection_name, error = %error, "Collection existence check failed");
                Err(error)
            }
        }
    }

    pub(crate) fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format_endpoint(&self.base_url, path);
        let mut req = self.client.request(method, url);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            req = req.header("api-key", api_key);
        }
        req
    }

    async fn ensure_success<F>(
        &self,
        response: reqwest::Response,
        on_success: F,
    ) -> Result<(), QdrantError>
    where
        F: FnOnce(),
    {
        if response.status().is_success() {
            on_success();
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = QdrantError::UnexpectedStatus { status, body };
            tracing::error!(error = %error, "Qdrant request failed");
            Err(error)
        }
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn exists(&self, collection: &str) -> Result<bool, IndexError> {
        Ok(self.collection_exists(collection).await?)
    }

    async fn upsert(
        &self,
        collection: &str,
        texts: Vec<String>,
        vectors: Vec<Vec<f32>>,
        metadatas: Vec<Value>,
    ) -> Result<Vec<String>, IndexError> {
        check_lengths(&texts, &vectors, &metadatas)?;
        let Some(vector_size) = vectors.first().map(Vec::len) else {
            return Ok(Vec::new());
        };
        self.create_collection_if_not_exists(collection, vector_size as u64)
            .await?;

        let mut ids = Vec::with_capacity(texts.len());
        let serialized: Vec<_> = texts
            .iter()
            .zip(vectors)
            .zip(metadatas)
            .map(|((text, vector), metadata)| {
                let id = generate_point_id();
                ids.push(id.clone());
                json!({
                    "id": id,
                    "vector": vector,
                    "payload": build_payload(text, metadata),
                })
            })
            .collect();

        let point_count = serialized.len();
        let response = self
            .request(Method::PUT, &format!("collections/{collection}/points"))
            .query(&[("wait", true)])
            .json(&json!({ "points": serialized }))
            .send()
            .await
            .map_err(QdrantError::from)?;

        self.ensure_success(response, || {
            tracing::debug!(collection, points = point_count, "Points indexed");
        })
        .await?;

        Ok(ids)
    }

    async fn bulk_delete(&self, ids: &[String], collection: &str) -> Result<usize, IndexError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let response = self
            .request(
                Method::POST,
                &format!("collections/{collection}/points/delete"),
            )
            .query(&[("wait", true)])
            .json(&json!({ "points": ids }))
            .send()
            .await
            .map_err(QdrantError::from)?;

        self.ensure_success(response, || {
            tracing::debug!(collection, points = ids.len(), "Points deleted");
        })
        .await?;

        Ok(ids.len())
    }

    async fn search_by_prefix(
        &self,
        collection: &str,
        field: &str,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<String>, IndexError> {
        let stream = stream_payloads_with_ids(self, collection, json!([field]), None);
        pin_mut!(stream);

        let mut ids = Vec::new();
        while let Some(entry) = stream.next().await {
            let (id, payload) = entry?;
            let matches = payload
                .get(field)
                .and_then(Value::as_str)
                .is_some_and(|value| value.starts_with(prefix));
            if matches {
                ids.push(id);
                if ids.len() >= limit {
                    break;
                }
            }
        }

        tracing::debug!(collection, field, prefix, matches = ids.len(), "Prefix lookup finished");
        Ok(ids)
    }
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

pub(crate) fn stringify_point_id(id: Value) -> String {
    match id {
        Value::String(text) => text,
        Value::Number(number) => number.to_string(),
        Value::Object(map) => map
            .get("uuid")
            .map(|value| match value {
                Value::String(uuid) => uuid.clone(),
                other => other.to_string(),
            })
            .unwrap_or_else(|| Value::Object(map).to_string()),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
