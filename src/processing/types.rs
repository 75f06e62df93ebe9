//! Error definitions for the processing stage.

use thiserror::Error;

/// Errors produced while turning extracted documents into chunks.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// Configuration requested an impossible character budget.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
}
