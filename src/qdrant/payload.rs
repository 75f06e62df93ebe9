//! Point payload construction.

use serde_json::{Map, Value};
use uuid::Uuid;

/// Payload key holding the chunk text.
pub const CONTENT_FIELD: &str = "page_content";

/// Merge chunk metadata with its text into one flat payload object.
///
/// Object metadata is flattened so metadata fields (`source_path`, `chunk_id`, ...) are
/// filterable at the top level; any other JSON value is nested under `metadata`.
pub(crate) fn build_payload(text: &str, metadata: Value) -> Value {
    let mut payload = match metadata {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("metadata".into(), other);
            map
        }
    };
    payload.insert(CONTENT_FIELD.into(), Value::String(text.to_string()));
    Value::Object(payload)
}

/// Construct an identifier for a new point.
pub(crate) fn generate_point_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn metadata_fields_are_flattened() {
        let payload = build_payload(
            "sample",
            json!({ "source_path": "s3://docs/a.md", "chunk_id": "c-1" }),
        );
        assert_eq!(payload["page_content"], "sample");
        assert_eq!(payload["source_path"], "s3://docs/a.md");
        assert_eq!(payload["chunk_id"], "c-1");
    }

    #[test]
    fn non_object_metadata_is_nested() {
        let payload = build_payload("sample", json!(["loose"]));
        assert_eq!(payload["metadata"], json!(["loose"]));
    }

    #[test]
    fn point_ids_are_unique_uuids() {
        let first = generate_point_id();
        assert_ne!(first, generate_point_id());
        assert!(Uuid::parse_str(&first).is_ok());
    }
}
