#![deny(missing_docs)]

//! Core library for the kb-ingest document pipeline.

/// HTTP routing and job handlers.
pub mod api;
/// Environment-driven process and job configuration.
pub mod config;
/// Document, metadata, and per-object parameter types.
pub mod document;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Partition-windowed object enumeration.
pub mod enumerator;
/// File-type extractors and their registry.
pub mod extraction;
/// Vector index abstraction and in-memory backend.
pub mod index;
/// Structured logging and tracing setup.
pub mod logging;
/// Pipeline metrics helpers.
pub mod metrics;
/// Operation dispatch and per-object processing.
pub mod pipeline;
/// Chunking and batch generation.
pub mod processing;
/// Qdrant vector store integration.
pub mod qdrant;
/// Per-object status tracking.
pub mod status;
/// Object storage backends and result persistence.
pub mod storage;
/// Ingestion and deletion workers.
pub mod workers;
