//! Persistence of a document and its embedded chunks.

use std::sync::Arc;

use serde_json::json;

use crate::embedding::EmbeddingClient;
use crate::processing::types::{ChunkDraft, DocumentMetadata, PersistOutcome, ProcessingError};
use crate::storage::{DocumentStore, NewChunk};

/// Creates the document record, embeds every chunk, and bulk-inserts the
/// chunk rows as one atomic batch.
pub struct PersistenceService {
    store: Arc<dyn DocumentStore>,
    embedding: Arc<dyn EmbeddingClient>,
}

impl PersistenceService {
    /// Build the service over the shared store and embedding client.
    pub fn new(store: Arc<dyn DocumentStore>, embedding: Arc<dyn EmbeddingClient>) -> Self {
        Self { store, embedding }
    }

    /// Persist one document and its chunk drafts.
    ///
    /// The document row is created first, even for zero drafts. If any
    /// embedding call fails the whole operation aborts before a single chunk
    /// row is written; the document row deliberately survives, so a document
    /// with zero chunks marks a failed or empty ingestion. Re-ingestion
    /// creates a fresh document rather than mutating the old one.
    pub async fn persist(
        &self,
        drafts: &[ChunkDraft],
        metadata: &DocumentMetadata,
    ) -> Result<PersistOutcome, ProcessingError> {
        let document_id = self
            .store
            .insert_document(metadata.filename.as_deref())
            .await?;
        tracing::info!(document_id, drafts = drafts.len(), "Created document record");

        let mut rows = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let embedding = self.embedding.embed(&draft.text).await?;
            rows.push(NewChunk {
                chunk_text: draft.text.clone(),
                embedding,
                page_numbers: draft
                    .page_numbers
                    .as_ref()
                    .map(|pages| pages.iter().map(|&page| page as i32).collect()),
                metadata: json!({
                    "filename": metadata.filename,
                    "title": draft.heading,
                }),
            });
        }

        let chunks_persisted = self.store.insert_chunks(document_id, &rows).await?;
        Ok(PersistOutcome {
            document_id,
            chunks_persisted,
        })
    }
}
