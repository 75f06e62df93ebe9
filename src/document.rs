//! Core records flowing through the pipeline: per-object processing parameters and extracted
//! documents with their lineage metadata.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Bucket and key identifying one object in the source store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectLocation {
    /// Bucket (or root namespace) holding the object.
    pub bucket: String,
    /// Full object key within the bucket.
    pub key: String,
}

impl ObjectLocation {
    /// Build a location from bucket and key.
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Canonical `s3://bucket/key` path recorded on every chunk and status record.
    pub fn source_path(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.key)
    }
}

/// Model settings handed to extractors that call out to a vision/language model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionModelParameters {
    /// Provider name, e.g. `bedrock` or `openai`.
    pub provider: Option<String>,
    /// Model identifier understood by the provider.
    pub model_id: Option<String>,
    /// Base URL for API-style providers.
    pub api_url: Option<String>,
    /// Reference to the credential holding the API key (never the key itself).
    pub credential_ref: Option<String>,
    /// Hosted endpoint name for endpoint-style providers.
    pub endpoint_name: Option<String>,
}

/// Everything an extractor needs to process one source object.
///
/// Created exclusively by the object enumerator; immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingParameters {
    /// Where the source object lives.
    pub source: ObjectLocation,
    /// Lower-cased trailing suffix of the object key.
    pub file_type: String,
    /// Language hint forwarded to extractors.
    pub document_language: String,
    /// Bucket receiving persisted extraction output.
    pub result_bucket: String,
    /// Bucket used by the portal for rendered assets such as figures.
    pub portal_bucket: String,
    /// Endpoint of the extraction model service, if any.
    pub extraction_endpoint: String,
    /// Extraction-model parameters.
    pub model: ExtractionModelParameters,
    /// Identifier correlating this object with one pipeline run.
    pub execution_id: String,
}

impl ProcessingParameters {
    /// Canonical source path of the object.
    pub fn source_path(&self) -> String {
        self.source.source_path()
    }
}

/// One level in a heading hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadingLevel {
    /// Heading depth, 1 for a top-level heading.
    pub level: u8,
    /// Heading text.
    pub title: String,
}

/// Nested section headings a chunk falls under.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadingHierarchy {
    /// Headings from outermost to innermost.
    pub levels: Vec<HeadingLevel>,
    /// Number of chunks the section expands into; set by the chunking probe pass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
}

/// Reference to a figure rendered from the source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FigureRef {
    /// Caption or alt text.
    pub caption: String,
    /// Location of the rendered figure.
    pub location: String,
}

/// Lineage and context metadata attached to a [`Document`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Identifier assigned at extraction; suffixed with `-{i}` by the chunking engine.
    pub chunk_id: String,
    /// Heading context, when the extractor knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading_hierarchy: Option<HeadingHierarchy>,
    /// Full heading path rendered as text, prefixed onto chunk content before indexing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complete_heading: Option<String>,
    /// Per-object sequence number assigned at batch emission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ordered_chunk_id: Option<u64>,
    /// Canonical source path of the originating object.
    pub source_path: String,
    /// File type of the originating object.
    #[serde(default)]
    pub file_type: String,
    /// Language hint of the originating object.
    #[serde(default)]
    pub document_language: String,
    /// Figures related to this chunk.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub figure: Vec<FigureRef>,
    /// Chunk ids of neighbouring content used for context expansion.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extend_chunks: Vec<String>,
    /// Embedding model that produced the indexed vector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_model_id: Option<String>,
    /// Extractor-specific fields carried through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A unit of extracted content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Text content.
    pub page_content: String,
    /// Lineage metadata.
    pub metadata: DocumentMetadata,
}

impl Document {
    /// Build a document for the given object with the supplied chunk id.
    pub fn new(
        page_content: impl Into<String>,
        chunk_id: impl Into<String>,
        params: &ProcessingParameters,
    ) -> Self {
        Self {
            page_content: page_content.into(),
            metadata: DocumentMetadata {
                chunk_id: chunk_id.into(),
                source_path: params.source_path(),
                file_type: params.file_type.clone(),
                document_language: params.document_language.clone(),
                ..Default::default()
            },
        }
    }

    /// Metadata rendered as a JSON object for index payloads.
    pub fn metadata_value(&self) -> Value {
        serde_json::to_value(&self.metadata).unwrap_or_else(|_| Value::Object(Map::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn source_path_uses_s3_scheme() {
        let location = ObjectLocation::new("docs", "manuals/guide.pdf");
        assert_eq!(location.source_path(), "s3://docs/manuals/guide.pdf");
    }

    #[test]
    fn metadata_serializes_without_empty_optionals() {
        let metadata = DocumentMetadata {
            chunk_id: "abc".into(),
            source_path: "s3://b/k.md".into(),
            ..Default::default()
        };
        let value = serde_json::to_value(&metadata).expect("serialize");
        assert_eq!(value["chunk_id"], "abc");
        assert!(value.get("heading_hierarchy").is_none());
        assert!(value.get("ordered_chunk_id").is_none());
        assert!(value.get("figure").is_none());
    }

    #[test]
    fn extra_fields_survive_a_round_trip() {
        let value = json!({
            "chunk_id": "c1",
            "source_path": "s3://b/k.md",
            "page_number": 4
        });
        let metadata: DocumentMetadata = serde_json::from_value(value).expect("deserialize");
        assert_eq!(metadata.extra["page_number"], 4);
        let back = serde_json::to_value(&metadata).expect("serialize");
        assert_eq!(back["page_number"], 4);
    }
}
