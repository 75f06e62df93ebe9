//! Qdrant vector store integration.

pub mod client;
pub mod payload;
/// Streaming helpers for Qdrant scroll pagination.
pub mod scroller;
pub mod types;

pub use client::QdrantIndex;
pub use types::QdrantError;
