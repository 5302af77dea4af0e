//! Core data types and error definitions for the ingestion pipeline.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::embedding::EmbeddingClientError;
use crate::extract::ExtractionError;
use crate::storage::StorageError;

/// Errors produced while turning a structured document into chunk drafts.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// Ingestion configured an impossible token budget.
    #[error("chunk token budget must be greater than zero")]
    InvalidChunkSize,
    /// The structured document carried no sections at all.
    #[error("cannot chunk an empty document")]
    EmptyDocument,
    /// Tokenizer resources were unavailable for the configured model.
    #[error("failed to initialize tokenizer for model '{model}': {source}")]
    Tokenizer {
        /// Embedding model we attempted to load.
        model: String,
        /// Underlying error raised by the tokenizer library.
        #[source]
        source: anyhow::Error,
    },
}

/// Errors emitted by the document ingestion pipeline.
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// Conversion of the source file failed.
    #[error("Failed to extract document: {0}")]
    Extraction(#[from] ExtractionError),
    /// Chunking step failed to segment the document.
    #[error("Failed to chunk document: {0}")]
    Chunking(#[from] ChunkingError),
    /// Embedding provider failed to produce vectors for the input text.
    #[error("Failed to generate embeddings: {0}")]
    Embedding(#[from] EmbeddingClientError),
    /// Document store interaction failed during persistence.
    #[error("Storage request failed: {0}")]
    Storage(#[from] StorageError),
}

/// Ordered chunk produced by the splitting stage, before embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkDraft {
    /// Text span that will be embedded and stored verbatim.
    pub text: String,
    /// Sorted distinct 1-based pages the span covers, or `None` when the
    /// source format carries no page provenance.
    pub page_numbers: Option<Vec<u32>>,
    /// First heading covering the span, when one exists.
    pub heading: Option<String>,
}

/// Typed metadata envelope accompanying a document through the pipeline.
///
/// Well-known fields are explicit; everything else the producer sent rides
/// along in `extra` and round-trips untouched. Consumers must not assume a
/// fixed key set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Filename recorded on the document row.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Title derived during extraction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Identifier of the ingestion job that carried the document.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    /// Open extension map for keys this pipeline does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DocumentMetadata {
    /// Build an envelope from a producer-supplied JSON object, lifting the
    /// well-known keys out of the open map.
    pub fn from_map(mut map: Map<String, Value>) -> Self {
        let filename = take_string(&mut map, "filename");
        let title = take_string(&mut map, "title");
        let job_id = take_string(&mut map, "job_id");
        Self {
            filename,
            title,
            job_id,
            extra: map,
        }
    }

    /// Attach an extension value, overwriting any previous entry.
    pub fn insert_extra(&mut self, key: &str, value: Value) {
        self.extra.insert(key.to_string(), value);
    }
}

fn take_string(map: &mut Map<String, Value>, key: &str) -> Option<String> {
    match map.remove(key) {
        Some(Value::String(value)) => Some(value),
        Some(other) => {
            // Non-string value for a well-known key stays in the open map.
            map.insert(key.to_string(), other);
            None
        }
        None => None,
    }
}

/// Summary of a completed ingestion produced by
/// [`crate::processing::IngestionPipeline::process`].
#[derive(Debug, Clone)]
pub struct ProcessingResult {
    /// Title derived during extraction, when one exists.
    pub title: Option<String>,
    /// Number of chunks produced and persisted for the document.
    pub chunk_count: usize,
    /// Metadata envelope as enriched by the pipeline.
    pub metadata: DocumentMetadata,
}

/// Outcome of the persistence step for one document.
#[derive(Debug, Clone, Copy)]
pub struct PersistOutcome {
    /// Identifier of the document row created for this ingestion.
    pub document_id: i64,
    /// Number of chunk rows the bulk insert reported.
    pub chunks_persisted: u64,
}
