//! Streaming helpers for iterating Qdrant scroll endpoints without manual loops.

use async_stream::try_stream;
use futures_core::Stream;
use reqwest::Method;
use serde_json::{Map, Value, json};

use super::client::{QdrantIndex, stringify_point_id};
use super::types::{QdrantError, ScrollResponse};

const DEFAULT_SCROLL_LIMIT: usize = 512;

/// Stream point identifiers with the selected payload fields, one scroll page at a time.
pub fn stream_payloads_with_ids<'a>(
    index: &'a QdrantIndex,
    collection: &'a str,
    with_payload: Value,
    filter: Option<Value>,
) -> impl Stream<Item = Result<(String, Map<String, Value>), QdrantError>> + 'a {
    try_stream! {
        let mut offset: Option<Value> = None;
        let filter_body = filter.unwrap_or_else(|| json!({ "must": [] }));

        loop {
            let body = json!({
                "with_payload": with_payload.clone(),
                "with_vector": false,
                "limit": DEFAULT_SCROLL_LIMIT,
                "filter": filter_body.clone(),
                "offset": offset.clone().unwrap_or(Value::Null),
            });

            let response = index
                .request(Method::POST, &format!("collections/{collection}/points/scroll"))
                .json(&body)
                .send()
                .await?;

            let status = response.status();
            if status.is_success() {
                let ScrollResponse { result } = response.json().await?;
                for point in result.points {
                    if let Some(id) = point.id {
                        yield (stringify_point_id(id), point.payload.unwrap_or_default());
                    }
                }

                match result.next_page_offset {
                    Some(Value::Null) | None => break,
                    Some(next) => offset = Some(next),
                }
            } else {
                let body = response.text().await.unwrap_or_default();
                tracing::error!(collection = collection, status = %status, "Failed to scroll points");
                Err(QdrantError::UnexpectedStatus { status, body })?;
            }
        }
    }
}
