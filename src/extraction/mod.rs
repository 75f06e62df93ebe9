//! Document processor registry.
//!
//! File types form a closed set; each registered type is bound to one [`Extractor`]. Format
//! parsing itself lives behind the trait: the built-in extractors only cover plain text,
//! markdown, and line-delimited records so the pipeline runs end to end without external
//! services.

mod lines;
mod markdown;

pub use lines::LineRecordExtractor;
pub use markdown::MarkdownExtractor;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::document::{Document, ProcessingParameters};
use crate::storage::{ObjectStore, StorageError};

/// Errors raised while extracting content from a source object.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// No extractor is registered for the object's file type.
    #[error("Unsupported file type: '{file_type}'. Supported types are: {supported}")]
    UnsupportedFileType {
        /// Lower-cased suffix that failed to resolve.
        file_type: String,
        /// Comma-separated registered types.
        supported: String,
    },
    /// The source object could not be read.
    #[error("Failed to read source object: {0}")]
    Storage(#[from] StorageError),
    /// Extractor needs an object store but none is configured.
    #[error("Object store unavailable; cannot read {0}")]
    StoreUnavailable(String),
    /// Tabular source could not be parsed.
    #[error("Failed to parse CSV: {0}")]
    Csv(#[from] csv::Error),
    /// Extractor-specific failure.
    #[error("Extraction failed: {0}")]
    Failed(String),
}

/// Closed set of file types the pipeline knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FileType {
    /// Comma-separated values.
    Csv,
    /// Legacy Word document.
    Doc,
    /// Word document.
    Docx,
    /// HTML page.
    Html,
    /// JSON document.
    Json,
    /// JSON lines.
    Jsonl,
    /// Markdown.
    Md,
    /// PDF.
    Pdf,
    /// Plain text.
    Txt,
    /// Excel workbook.
    Xlsx,
    /// Legacy Excel workbook.
    Xls,
    /// PNG image.
    Png,
    /// JPG image.
    Jpg,
    /// JPEG image.
    Jpeg,
    /// WebP image.
    Webp,
}

impl FileType {
    /// Every known file type.
    pub const ALL: [FileType; 15] = [
        Self::Csv,
        Self::Doc,
        Self::Docx,
        Self::Html,
        Self::Json,
        Self::Jsonl,
        Self::Md,
        Self::Pdf,
        Self::Txt,
        Self::Xlsx,
        Self::Xls,
        Self::Png,
        Self::Jpg,
        Self::Jpeg,
        Self::Webp,
    ];

    /// Lower-case suffix.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Doc => "doc",
            Self::Docx => "docx",
            Self::Html => "html",
            Self::Json => "json",
            Self::Jsonl => "jsonl",
            Self::Md => "md",
            Self::Pdf => "pdf",
            Self::Txt => "txt",
            Self::Xlsx => "xlsx",
            Self::Xls => "xls",
            Self::Png => "png",
            Self::Jpg => "jpg",
            Self::Jpeg => "jpeg",
            Self::Webp => "webp",
        }
    }

    /// Tabular and line-delimited formats whose extracted documents bypass chunking.
    pub fn is_splittable(self) -> bool {
        !matches!(self, Self::Csv | Self::Xlsx | Self::Xls | Self::Jsonl)
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|candidate| candidate.as_str() == normalized)
            .ok_or(())
    }
}

/// Whether documents of `file_type` go through the chunking engine.
///
/// Unknown suffixes count as splittable; they fail in the registry before chunking matters.
pub fn is_splittable(file_type: &str) -> bool {
    file_type
        .parse::<FileType>()
        .map(FileType::is_splittable)
        .unwrap_or(true)
}

/// Turns one source object into documents.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Extract documents for the object described by `params`.
    async fn extract(&self, params: &ProcessingParameters) -> Result<Vec<Document>, ExtractionError>;
}

/// Maps file types to extractors.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    extractors: BTreeMap<FileType, Arc<dyn Extractor>>,
}

impl ProcessorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in text, markdown, and line-record extractors.
    pub fn with_builtin(store: Option<Arc<dyn ObjectStore>>) -> Self {
        let markdown: Arc<dyn Extractor> = Arc::new(MarkdownExtractor::new(store.clone()));
        let lines: Arc<dyn Extractor> = Arc::new(LineRecordExtractor::new(store));
        Self::new()
            .register(FileType::Md, markdown.clone())
            .register(FileType::Txt, markdown)
            .register(FileType::Csv, lines.clone())
            .register(FileType::Jsonl, lines)
    }

    /// Bind `file_type` to `extractor`, replacing any previous binding.
    pub fn register(mut self, file_type: FileType, extractor: Arc<dyn Extractor>) -> Self {
        self.extractors.insert(file_type, extractor);
        self
    }

    /// Registered types in a stable order.
    pub fn supported_types(&self) -> Vec<FileType> {
        self.extractors.keys().copied().collect()
    }

    /// Dispatch to the extractor registered for `params.file_type`.
    pub async fn extract(
        &self,
        params: &ProcessingParameters,
    ) -> Result<Vec<Document>, ExtractionError> {
        let extractor = params
            .file_type
            .parse::<FileType>()
            .ok()
            .and_then(|file_type| self.extractors.get(&file_type))
            .ok_or_else(|| self.unsupported(&params.file_type))?;
        let documents = extractor.extract(params).await?;
        tracing::debug!(
            source_path = %params.source_path(),
            file_type = %params.file_type,
            documents = documents.len(),
            "Extracted documents"
        );
        Ok(documents)
    }

    fn unsupported(&self, file_type: &str) -> ExtractionError {
        let supported = self
            .supported_types()
            .iter()
            .map(|value| value.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        ExtractionError::UnsupportedFileType {
            file_type: file_type.to_lowercase(),
            supported,
        }
    }
}

/// Read the whole source object through an optional store.
pub(crate) async fn read_source(
    store: Option<&Arc<dyn ObjectStore>>,
    params: &ProcessingParameters,
) -> Result<String, ExtractionError> {
    let store = store.ok_or_else(|| ExtractionError::StoreUnavailable(params.source_path()))?;
    let bytes = store
        .get_object(&params.source.bucket, &params.source.key)
        .await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Deterministic chunk id stem for an object: the first 12 hex chars of its path digest.
pub(crate) fn chunk_id_stem(params: &ProcessingParameters) -> String {
    let mut hasher = Sha256::new();
    hasher.update(params.source_path().as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..12].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{ExtractionModelParameters, ObjectLocation};

    fn params(key: &str, file_type: &str) -> ProcessingParameters {
        ProcessingParameters {
            source: ObjectLocation::new("docs", key),
            file_type: file_type.into(),
            document_language: "en".into(),
            result_bucket: String::new(),
            portal_bucket: String::new(),
            extraction_endpoint: String::new(),
            model: ExtractionModelParameters::default(),
            execution_id: "exec".into(),
        }
    }

    #[test]
    fn file_types_parse_case_insensitively() {
        assert_eq!("PDF".parse::<FileType>(), Ok(FileType::Pdf));
        assert_eq!("jsonl".parse::<FileType>(), Ok(FileType::Jsonl));
        assert!("exe".parse::<FileType>().is_err());
    }

    #[test]
    fn tabular_types_bypass_chunking() {
        assert!(!is_splittable("csv"));
        assert!(!is_splittable("xlsx"));
        assert!(!is_splittable("xls"));
        assert!(!is_splittable("jsonl"));
        assert!(is_splittable("pdf"));
        assert!(is_splittable("md"));
    }

    #[tokio::test]
    async fn unknown_types_list_supported_ones() {
        let registry = ProcessorRegistry::with_builtin(None);
        let error = registry.extract(&params("a.pdf", "pdf")).await.unwrap_err();
        match error {
            ExtractionError::UnsupportedFileType {
                file_type,
                supported,
            } => {
                assert_eq!(file_type, "pdf");
                assert_eq!(supported, "csv, jsonl, md, txt");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn registered_extractor_without_store_reports_it() {
        let registry = ProcessorRegistry::with_builtin(None);
        let error = registry.extract(&params("a.md", "md")).await.unwrap_err();
        assert!(matches!(error, ExtractionError::StoreUnavailable(_)));
    }

    #[test]
    fn chunk_id_stem_is_stable_per_object() {
        let first = chunk_id_stem(&params("a.md", "md"));
        let again = chunk_id_stem(&params("a.md", "md"));
        let other = chunk_id_stem(&params("b.md", "md"));
        assert_eq!(first, again);
        assert_ne!(first, other);
        assert_eq!(first.len(), 12);
    }
}
