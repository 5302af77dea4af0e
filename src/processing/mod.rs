//! Document ingestion pipeline: extraction, chunking, embedding, persistence.

pub mod chunking;
mod persist;
mod service;
pub mod types;

pub use chunking::chunk_document;
pub use persist::PersistenceService;
pub use service::{IngestApi, IngestionPipeline};
pub use types::{
    ChunkDraft, ChunkingError, DocumentMetadata, PersistOutcome, ProcessingError, ProcessingResult,
};
