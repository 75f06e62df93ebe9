//! Document processing: two-pass chunking and batch generation.

pub mod batching;
pub mod chunking;
pub mod types;

pub use batching::{Batches, ChunkBatcher, IdBatcher};
pub use chunking::{TextSplitter, chunk_documents, emit, probe_sizes};
pub use types::ChunkingError;
