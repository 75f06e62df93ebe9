use serde::{Deserialize, Deserializer, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Errors encountered while resolving process or job configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required setting was not provided by the request or the environment.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Setting contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
    /// Operation type outside `create|delete|update|extract_only`.
    #[error("Invalid operation type '{0}'. Valid types: create, delete, update, extract_only")]
    UnknownOperation(String),
    /// Index type outside `qd|qq|intention`.
    #[error("Invalid index type '{0}'. Valid types: qd, qq, intention")]
    UnknownIndexType(String),
    /// Partition windows must contain at least one object.
    #[error("partition size must be greater than zero")]
    ZeroPartitionSize,
}

/// Lookup used to read settings; `std::env::var` in production, a map in tests.
pub type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Process-wide configuration for the ingestion service.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the Qdrant instance. When unset, indexing runs in no-op mode.
    pub qdrant_url: Option<String>,
    /// Optional API key required to access Qdrant.
    pub qdrant_api_key: Option<String>,
    /// Embedding provider used to generate vector representations.
    pub embedding_provider: EmbeddingProvider,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Base URL of an OpenAI-compatible embeddings API.
    pub embedding_api_url: Option<String>,
    /// API key for the embeddings API.
    pub embedding_api_key: Option<String>,
    /// Root directory served as the object store; each subdirectory is a bucket.
    pub object_store_root: Option<PathBuf>,
    /// File receiving JSON-lines status records.
    pub status_log_path: Option<PathBuf>,
    /// Maximum characters per chunk.
    pub text_splitter_chunk_size: usize,
    /// Characters of overlap between adjacent chunks.
    pub text_splitter_chunk_overlap: usize,
    /// Documents per ingestion batch.
    pub ingest_batch_size: usize,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
}

/// Supported embedding backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Deterministic local hashing embeddings; useful offline.
    Hash,
    /// OpenAI-compatible embeddings API.
    OpenAI,
}

const DEFAULT_CHUNK_SIZE: usize = 1024;
const DEFAULT_CHUNK_OVERLAP: usize = 30;
const DEFAULT_BATCH_SIZE: usize = 10;

impl Config {
    /// Load `.env` (when present) and read configuration from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config = Self::from_env()?;
        tracing::debug!(
            qdrant_url = ?config.qdrant_url,
            object_store_root = ?config.object_store_root,
            embedding_provider = ?config.embedding_provider,
            server_port = ?config.server_port,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Read configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&env_lookup)
    }

    /// Read configuration through an arbitrary lookup, performing validation along the way.
    pub fn from_lookup(lookup: EnvLookup<'_>) -> Result<Self, ConfigError> {
        let provider = match load_optional(lookup, "EMBEDDING_PROVIDER") {
            Some(value) => value
                .parse()
                .map_err(|()| ConfigError::InvalidValue("EMBEDDING_PROVIDER".to_string()))?,
            None => EmbeddingProvider::Hash,
        };

        Ok(Self {
            qdrant_url: load_optional(lookup, "QDRANT_URL"),
            qdrant_api_key: load_optional(lookup, "QDRANT_API_KEY"),
            embedding_provider: provider,
            embedding_model: load_optional(lookup, "EMBEDDING_MODEL")
                .unwrap_or_else(|| "text-embedding-3-small".to_string()),
            embedding_dimension: parse_optional(lookup, "EMBEDDING_DIMENSION")?.unwrap_or(1024),
            embedding_api_url: load_optional(lookup, "EMBEDDING_API_URL"),
            embedding_api_key: load_optional(lookup, "EMBEDDING_API_KEY"),
            object_store_root: load_optional(lookup, "OBJECT_STORE_ROOT").map(PathBuf::from),
            status_log_path: load_optional(lookup, "STATUS_LOG_PATH").map(PathBuf::from),
            text_splitter_chunk_size: parse_optional(lookup, "TEXT_SPLITTER_CHUNK_SIZE")?
                .unwrap_or(DEFAULT_CHUNK_SIZE),
            text_splitter_chunk_overlap: parse_optional(lookup, "TEXT_SPLITTER_CHUNK_OVERLAP")?
                .unwrap_or(DEFAULT_CHUNK_OVERLAP),
            ingest_batch_size: parse_optional(lookup, "INGEST_BATCH_SIZE")?
                .unwrap_or(DEFAULT_BATCH_SIZE)
                .max(1),
            server_port: parse_optional(lookup, "SERVER_PORT")?,
        })
    }
}

impl FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hash" => Ok(Self::Hash),
            "openai" => Ok(Self::OpenAI),
            _ => Err(()),
        }
    }
}

/// Operation selecting which enumerator mode, batch generator, and worker run together.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    /// Extract, chunk, persist, and index.
    Create,
    /// Extract, chunk, and persist without touching the index.
    ExtractOnly,
    /// Remove indexed chunks of the enumerated objects.
    Delete,
    /// Delete followed by create over the same partition window.
    Update,
}

impl OperationType {
    /// Wire name of the operation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::ExtractOnly => "extract_only",
            Self::Delete => "delete",
            Self::Update => "update",
        }
    }
}

impl FromStr for OperationType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "create" => Ok(Self::Create),
            "extract_only" => Ok(Self::ExtractOnly),
            "delete" => Ok(Self::Delete),
            "update" => Ok(Self::Update),
            _ => Err(ConfigError::UnknownOperation(s.to_string())),
        }
    }
}

/// Index flavour; selects which file types qualify for enumeration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexType {
    /// Question/document retrieval over general documents.
    Qd,
    /// Question/question matching over curated pairs.
    Qq,
    /// Intention detection examples.
    Intention,
}

const QD_FILE_TYPES: &[&str] = &[
    "pdf", "txt", "docx", "xlsx", "xls", "md", "html", "json", "csv", "png", "jpeg", "jpg",
    "webp",
];
const QQ_FILE_TYPES: &[&str] = &["jsonl", "xlsx", "xls"];

impl IndexType {
    /// File suffixes that qualify for enumeration under this index type.
    pub fn allowed_file_types(self) -> Vec<String> {
        let types = match self {
            Self::Qd => QD_FILE_TYPES,
            Self::Qq | Self::Intention => QQ_FILE_TYPES,
        };
        types.iter().map(|value| value.to_string()).collect()
    }
}

impl FromStr for IndexType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "qd" => Ok(Self::Qd),
            "qq" => Ok(Self::Qq),
            "intention" => Ok(Self::Intention),
            _ => Err(ConfigError::UnknownIndexType(s.to_string())),
        }
    }
}

/// Per-job parameters as supplied by an API caller or the CLI; every field is optional.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct JobRequest {
    /// Source bucket.
    #[serde(default, deserialize_with = "lenient_string")]
    pub s3_bucket: Option<String>,
    /// Key prefix to enumerate under.
    #[serde(default, deserialize_with = "lenient_string")]
    pub s3_prefix: Option<String>,
    /// `create`, `delete`, `update`, or `extract_only`.
    #[serde(default, deserialize_with = "lenient_string")]
    pub operation_type: Option<String>,
    /// Partition size (objects per invocation).
    #[serde(default, deserialize_with = "lenient_string")]
    pub batch_file_number: Option<String>,
    /// Zero-based partition index.
    #[serde(default, deserialize_with = "lenient_string")]
    pub batch_indice: Option<String>,
    /// Language hint for extraction.
    #[serde(default, deserialize_with = "lenient_string")]
    pub document_language: Option<String>,
    /// `qd`, `qq`, or `intention`.
    #[serde(default, deserialize_with = "lenient_string")]
    pub index_type: Option<String>,
    /// Target index/collection identifier.
    #[serde(default, deserialize_with = "lenient_string")]
    pub index_id: Option<String>,
    /// Bucket receiving persisted extraction output.
    #[serde(default, deserialize_with = "lenient_string")]
    pub res_bucket: Option<String>,
    /// Portal bucket forwarded to extractors.
    #[serde(default, deserialize_with = "lenient_string")]
    pub portal_bucket_name: Option<String>,
    /// Extraction model endpoint name.
    #[serde(default, deserialize_with = "lenient_string")]
    pub etl_endpoint_name: Option<String>,
    /// Embedding model identifier stamped onto indexed chunks.
    #[serde(default, deserialize_with = "lenient_string")]
    pub embedding_model_id: Option<String>,
}

/// Fully resolved parameters for one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobConfig {
    /// Source bucket.
    pub bucket: String,
    /// Key prefix to enumerate under.
    pub prefix: String,
    /// Operation to run.
    pub operation: OperationType,
    /// Objects per partition window.
    pub partition_size: usize,
    /// Zero-based partition window index.
    pub partition_index: usize,
    /// Language hint forwarded to extractors.
    pub document_language: String,
    /// Index flavour.
    pub index_type: IndexType,
    /// Target collection.
    pub collection: String,
    /// Bucket receiving persisted extraction output.
    pub result_bucket: String,
    /// Portal bucket forwarded to extractors.
    pub portal_bucket: String,
    /// Extraction model endpoint name.
    pub extraction_endpoint: String,
    /// Embedding model identifier stamped onto indexed chunks.
    pub embedding_model_id: String,
}

impl JobConfig {
    /// Resolve each setting with priority request value, then environment, then default.
    ///
    /// Fails fast on an unknown operation or index type, a zero partition size, or a missing
    /// source bucket; nothing is enumerated before these checks pass.
    pub fn resolve(request: &JobRequest, lookup: EnvLookup<'_>) -> Result<Self, ConfigError> {
        let pick = |value: &Option<String>, key: &str, default: &str| -> String {
            value
                .clone()
                .or_else(|| lookup(key))
                .unwrap_or_else(|| default.to_string())
        };

        let operation: OperationType =
            pick(&request.operation_type, "OPERATION_TYPE", "extract_only").parse()?;
        let index_type: IndexType = pick(&request.index_type, "INDEX_TYPE", "qd").parse()?;
        let partition_size = parse_setting(
            &pick(&request.batch_file_number, "BATCH_FILE_NUMBER", "10"),
            "BATCH_FILE_NUMBER",
        )?;
        if partition_size == 0 {
            return Err(ConfigError::ZeroPartitionSize);
        }
        let partition_index = parse_setting(
            &pick(&request.batch_indice, "BATCH_INDICE", "0"),
            "BATCH_INDICE",
        )?;

        let bucket = pick(&request.s3_bucket, "S3_BUCKET", "");
        if bucket.trim().is_empty() {
            return Err(ConfigError::MissingVariable("S3_BUCKET".to_string()));
        }

        Ok(Self {
            bucket,
            prefix: pick(&request.s3_prefix, "S3_PREFIX", ""),
            operation,
            partition_size,
            partition_index,
            document_language: pick(&request.document_language, "DOCUMENT_LANGUAGE", "zh"),
            index_type,
            collection: pick(&request.index_id, "INDEX_ID", "default"),
            result_bucket: pick(&request.res_bucket, "RES_BUCKET", ""),
            portal_bucket: pick(&request.portal_bucket_name, "PORTAL_BUCKET", ""),
            extraction_endpoint: pick(&request.etl_endpoint_name, "ETL_MODEL_ENDPOINT", ""),
            embedding_model_id: pick(
                &request.embedding_model_id,
                "EMBEDDING_MODEL_ID",
                "default-embedding",
            ),
        })
    }

    /// Resolve against the process environment.
    pub fn resolve_from_env(request: &JobRequest) -> Result<Self, ConfigError> {
        Self::resolve(request, &env_lookup)
    }
}

/// Environment lookup ignoring blank values.
pub fn env_lookup(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn load_optional(lookup: EnvLookup<'_>, key: &str) -> Option<String> {
    lookup(key).filter(|value| !value.trim().is_empty())
}

fn parse_optional<T: FromStr>(lookup: EnvLookup<'_>, key: &str) -> Result<Option<T>, ConfigError> {
    load_optional(lookup, key)
        .map(|value| parse_setting(&value, key))
        .transpose()
}

fn parse_setting<T: FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(key.to_string()))
}

/// Accept strings, numbers, and booleans for request fields that the environment carries as text.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(text)) => Some(text),
        Some(other) => Some(other.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn request_values_win_over_environment() {
        let lookup = lookup_from(&[("S3_BUCKET", "env-bucket"), ("OPERATION_TYPE", "delete")]);
        let request = JobRequest {
            s3_bucket: Some("request-bucket".into()),
            ..Default::default()
        };
        let job = JobConfig::resolve(&request, &lookup).expect("resolve");
        assert_eq!(job.bucket, "request-bucket");
        assert_eq!(job.operation, OperationType::Delete);
    }

    #[test]
    fn defaults_apply_when_request_and_environment_are_silent() {
        let lookup = lookup_from(&[("S3_BUCKET", "docs")]);
        let job = JobConfig::resolve(&JobRequest::default(), &lookup).expect("resolve");
        assert_eq!(job.operation, OperationType::ExtractOnly);
        assert_eq!(job.partition_size, 10);
        assert_eq!(job.partition_index, 0);
        assert_eq!(job.document_language, "zh");
        assert_eq!(job.index_type, IndexType::Qd);
        assert_eq!(job.embedding_model_id, "default-embedding");
    }

    #[test]
    fn unknown_operation_is_rejected() {
        let lookup = lookup_from(&[("S3_BUCKET", "docs")]);
        let request = JobRequest {
            operation_type: Some("rebuild".into()),
            ..Default::default()
        };
        let error = JobConfig::resolve(&request, &lookup).unwrap_err();
        assert!(matches!(error, ConfigError::UnknownOperation(value) if value == "rebuild"));
    }

    #[test]
    fn zero_partition_size_is_rejected() {
        let lookup = lookup_from(&[("S3_BUCKET", "docs"), ("BATCH_FILE_NUMBER", "0")]);
        let error = JobConfig::resolve(&JobRequest::default(), &lookup).unwrap_err();
        assert!(matches!(error, ConfigError::ZeroPartitionSize));
    }

    #[test]
    fn missing_bucket_is_rejected() {
        let lookup = lookup_from(&[]);
        let error = JobConfig::resolve(&JobRequest::default(), &lookup).unwrap_err();
        assert!(matches!(error, ConfigError::MissingVariable(key) if key == "S3_BUCKET"));
    }

    #[test]
    fn request_accepts_numeric_partition_fields() {
        let request: JobRequest = serde_json::from_value(serde_json::json!({
            "s3_bucket": "docs",
            "batch_file_number": 25,
            "batch_indice": "2"
        }))
        .expect("request");
        let job = JobConfig::resolve(&request, &lookup_from(&[])).expect("resolve");
        assert_eq!(job.partition_size, 25);
        assert_eq!(job.partition_index, 2);
    }

    #[test]
    fn index_type_selects_allowed_files() {
        assert_eq!(
            IndexType::Qq.allowed_file_types(),
            vec!["jsonl", "xlsx", "xls"]
        );
        assert!(IndexType::Qd.allowed_file_types().contains(&"pdf".to_string()));
        assert!(!IndexType::Intention.allowed_file_types().contains(&"pdf".to_string()));
    }

    #[test]
    fn process_config_reads_splitter_overrides() {
        let lookup = lookup_from(&[
            ("TEXT_SPLITTER_CHUNK_SIZE", "256"),
            ("EMBEDDING_PROVIDER", "openai"),
            ("INGEST_BATCH_SIZE", "0"),
        ]);
        let config = Config::from_lookup(&lookup).expect("config");
        assert_eq!(config.text_splitter_chunk_size, 256);
        assert_eq!(config.text_splitter_chunk_overlap, 30);
        assert_eq!(config.embedding_provider, EmbeddingProvider::OpenAI);
        assert_eq!(config.ingest_batch_size, 1);
        assert!(config.qdrant_url.is_none());
    }

    #[test]
    fn process_config_rejects_bad_numbers() {
        let lookup = lookup_from(&[("SERVER_PORT", "not-a-port")]);
        let error = Config::from_lookup(&lookup).unwrap_err();
        assert!(matches!(error, ConfigError::InvalidValue(key) if key == "SERVER_PORT"));
    }
}
