//! Ingestion orchestrator sequencing extraction, chunking, and persistence.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::config::Config;
use crate::extract::DocumentExtractor;
use crate::notifier::{DocumentStatus, Notifier};
use crate::processing::chunking::chunk_document;
use crate::processing::persist::PersistenceService;
use crate::processing::types::{DocumentMetadata, ProcessingError, ProcessingResult};

/// Abstraction over the ingestion pipeline used by the message consumer.
#[async_trait]
pub trait IngestApi: Send + Sync {
    /// Run the full pipeline for one document.
    async fn process(
        &self,
        job_id: &str,
        path: &Path,
        metadata: DocumentMetadata,
    ) -> Result<ProcessingResult, ProcessingError>;
}

/// Sequences extract → chunk → persist for one document at a time.
///
/// Each stage transition emits a best-effort status notification before work
/// on the next stage begins. Stage failures are annotated with a `failed`
/// event and re-raised unchanged; this pipeline never swallows an error.
pub struct IngestionPipeline {
    extractor: DocumentExtractor,
    persistence: PersistenceService,
    notifier: Arc<dyn Notifier>,
    chunk_max_tokens: usize,
    embedding_model: String,
}

impl IngestionPipeline {
    /// Assemble the pipeline from its collaborators.
    pub fn new(
        config: &Config,
        persistence: PersistenceService,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            extractor: DocumentExtractor::new(),
            persistence,
            notifier,
            chunk_max_tokens: config.chunk_max_tokens,
            embedding_model: config.embedding_model.clone(),
        }
    }

    async fn stage(&self, job_id: &str, stage: &str) {
        self.notifier
            .notify(job_id, DocumentStatus::Processing, json!({ "stage": stage }))
            .await;
    }

    async fn failed(&self, job_id: &str, stage: &str, error: &ProcessingError) {
        self.notifier
            .notify(
                job_id,
                DocumentStatus::Failed,
                json!({ "stage": stage, "error": error.to_string() }),
            )
            .await;
    }
}

#[async_trait]
impl IngestApi for IngestionPipeline {
    async fn process(
        &self,
        job_id: &str,
        path: &Path,
        metadata: DocumentMetadata,
    ) -> Result<ProcessingResult, ProcessingError> {
        tracing::info!(job_id, path = %path.display(), "Starting document processing");
        self.stage(job_id, "started").await;

        self.stage(job_id, "extracting").await;
        let document = match self.extractor.extract(path) {
            Ok(document) => document,
            Err(err) => {
                let err = ProcessingError::from(err);
                self.failed(job_id, "extracting", &err).await;
                return Err(err);
            }
        };

        self.stage(job_id, "chunking").await;
        let drafts = match chunk_document(&document, self.chunk_max_tokens, &self.embedding_model)
        {
            Ok(drafts) => drafts,
            Err(err) => {
                let err = ProcessingError::from(err);
                self.failed(job_id, "chunking", &err).await;
                return Err(err);
            }
        };
        tracing::info!(job_id, chunks = drafts.len(), "Chunked document");

        let mut metadata = metadata;
        metadata.title = document.title.clone();
        metadata.insert_extra("document_structure", document.structure.clone());

        self.stage(job_id, "embedding").await;
        let outcome = match self.persistence.persist(&drafts, &metadata).await {
            Ok(outcome) => outcome,
            Err(err) => {
                self.failed(job_id, "embedding", &err).await;
                return Err(err);
            }
        };

        let result = ProcessingResult {
            title: document.title,
            chunk_count: drafts.len(),
            metadata,
        };
        self.notifier
            .notify(
                job_id,
                DocumentStatus::Completed,
                json!({
                    "title": result.title,
                    "chunk_count": result.chunk_count,
                }),
            )
            .await;
        tracing::info!(
            job_id,
            document_id = outcome.document_id,
            chunks = outcome.chunks_persisted,
            "Document processing complete"
        );
        Ok(result)
    }
}
