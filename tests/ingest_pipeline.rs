//! End-to-end pipeline tests over in-memory collaborator doubles.
//!
//! These exercise the public crate API the way the running service wires it:
//! a persistence service and search service sharing one document store, with
//! the orchestrator emitting lifecycle notifications around them.

use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};

use docflow::embedding::{EmbeddingClient, EmbeddingClientError};
use docflow::notifier::{DocumentStatus, Notifier};
use docflow::processing::{ChunkDraft, DocumentMetadata, PersistenceService, ProcessingError};
use docflow::search::{SearchApi, SearchRequest, SearchService};
use docflow::storage::{DocumentStore, NewChunk, ScoredChunk, StorageError};

/// Store double holding documents and chunks in memory.
///
/// `similarity_search` ranks by a fixed per-chunk score assigned at insert
/// time, mimicking the pushed-down ORDER BY/LIMIT contract.
#[derive(Default)]
struct MemoryStore {
    next_document_id: AtomicI64,
    documents: Mutex<Vec<(i64, Option<String>)>>,
    chunks: Mutex<Vec<(i64, i64, NewChunk, f64)>>,
}

impl MemoryStore {
    fn chunk_count_for(&self, document_id: i64) -> usize {
        self.chunks
            .lock()
            .expect("lock")
            .iter()
            .filter(|(_, owner, _, _)| *owner == document_id)
            .count()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn insert_document(&self, filename: Option<&str>) -> Result<i64, StorageError> {
        let id = self.next_document_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.documents
            .lock()
            .expect("lock")
            .push((id, filename.map(str::to_string)));
        Ok(id)
    }

    async fn insert_chunks(
        &self,
        document_id: i64,
        chunks: &[NewChunk],
    ) -> Result<u64, StorageError> {
        let mut stored = self.chunks.lock().expect("lock");
        for (idx, chunk) in chunks.iter().enumerate() {
            let id = stored.len() as i64 + 1;
            // Earlier chunks score higher so ordering is deterministic.
            let score = 0.95 - (idx as f64) * 0.1;
            stored.push((id, document_id, chunk.clone(), score));
        }
        Ok(chunks.len() as u64)
    }

    async fn similarity_search(
        &self,
        _embedding: &[f32],
        document_id: Option<i64>,
        top_k: u32,
    ) -> Result<Vec<ScoredChunk>, StorageError> {
        let stored = self.chunks.lock().expect("lock");
        let mut rows: Vec<ScoredChunk> = stored
            .iter()
            .filter(|(_, owner, _, _)| document_id.is_none_or(|scope| *owner == scope))
            .map(|(id, owner, chunk, score)| ScoredChunk {
                id: *id,
                document_id: *owner,
                text: chunk.chunk_text.clone(),
                score: *score,
                metadata: Some(chunk.metadata.clone()),
            })
            .collect();
        rows.sort_by(|a, b| b.score.total_cmp(&a.score));
        rows.truncate(top_k as usize);
        Ok(rows)
    }

    async fn ping(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

struct DeterministicEmbedder;

#[async_trait]
impl EmbeddingClient for DeterministicEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingClientError> {
        if text.trim().is_empty() {
            return Err(EmbeddingClientError::EmptyInput);
        }
        Ok(vec![text.len() as f32, 1.0, 0.0])
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}

/// Embedder that fails on a chosen call, for atomicity scenarios.
struct FlakyEmbedder {
    calls: AtomicUsize,
    fail_on: usize,
}

#[async_trait]
impl EmbeddingClient for FlakyEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingClientError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_on {
            return Err(EmbeddingClientError::UnexpectedStatus {
                status: reqwest::StatusCode::BAD_GATEWAY,
                body: "provider down".to_string(),
            });
        }
        Ok(vec![1.0, 0.0, 0.0])
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}

#[derive(Default)]
struct SilentNotifier {
    events: Mutex<Vec<(String, Value)>>,
}

#[async_trait]
impl Notifier for SilentNotifier {
    async fn notify(&self, _file_id: &str, status: DocumentStatus, metadata: Value) -> bool {
        self.events
            .lock()
            .expect("lock")
            .push((status.as_str().to_string(), metadata));
        true
    }
}

fn draft(text: &str, pages: Option<Vec<u32>>) -> ChunkDraft {
    ChunkDraft {
        text: text.to_string(),
        page_numbers: pages,
        heading: None,
    }
}

fn metadata_named(filename: &str) -> DocumentMetadata {
    DocumentMetadata {
        filename: Some(filename.to_string()),
        ..DocumentMetadata::default()
    }
}

#[tokio::test]
async fn two_chunk_ingest_creates_document_and_matching_chunk_rows() {
    let store = Arc::new(MemoryStore::default());
    let persistence = PersistenceService::new(store.clone(), Arc::new(DeterministicEmbedder));

    let drafts = vec![
        draft("spans pages one and two", Some(vec![1, 2])),
        draft("lives on page three", Some(vec![3])),
    ];
    let outcome = persistence
        .persist(&drafts, &metadata_named("report.pdf"))
        .await
        .expect("persist");

    assert_eq!(outcome.chunks_persisted, 2);
    assert_eq!(store.chunk_count_for(outcome.document_id), drafts.len());

    let chunks = store.chunks.lock().expect("lock");
    assert_eq!(chunks[0].2.page_numbers, Some(vec![1, 2]));
    assert_eq!(chunks[1].2.page_numbers, Some(vec![3]));
    for (_, owner, _, _) in chunks.iter() {
        assert_eq!(*owner, outcome.document_id);
    }
}

#[tokio::test]
async fn embedding_failure_leaves_document_without_chunks() {
    let store = Arc::new(MemoryStore::default());
    let persistence = PersistenceService::new(
        store.clone(),
        Arc::new(FlakyEmbedder {
            calls: AtomicUsize::new(0),
            fail_on: 2,
        }),
    );

    let drafts = vec![draft("one", None), draft("two", None), draft("three", None)];
    let err = persistence
        .persist(&drafts, &metadata_named("doc.pdf"))
        .await
        .expect_err("embedding failure");
    assert!(matches!(err, ProcessingError::Embedding(_)));

    let documents = store.documents.lock().expect("lock");
    assert_eq!(documents.len(), 1);
    assert_eq!(store.chunk_count_for(documents[0].0), 0);
}

#[tokio::test]
async fn search_twice_over_unchanged_data_is_idempotent() {
    let store = Arc::new(MemoryStore::default());
    let persistence = PersistenceService::new(store.clone(), Arc::new(DeterministicEmbedder));
    persistence
        .persist(
            &[
                draft("rust ownership rules", None),
                draft("borrow checker basics", None),
                draft("async executors", None),
            ],
            &metadata_named("book.pdf"),
        )
        .await
        .expect("persist");

    let search = SearchService::new(store, Arc::new(DeterministicEmbedder));
    let request = SearchRequest {
        query: "ownership".to_string(),
        document_id: None,
        top_k: 5,
        min_score: 0.0,
    };

    let first = search.search(request.clone()).await.expect("first search");
    let second = search.search(request).await.expect("second search");

    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(a.id, b.id);
        assert_eq!(a.score, b.score);
        assert_eq!(a.text, b.text);
    }
    for window in first.windows(2) {
        assert!(window[0].score >= window[1].score);
    }
}

#[tokio::test]
async fn document_scope_restricts_search_results() {
    let store = Arc::new(MemoryStore::default());
    let persistence = PersistenceService::new(store.clone(), Arc::new(DeterministicEmbedder));

    let first = persistence
        .persist(&[draft("alpha text", None)], &metadata_named("a.pdf"))
        .await
        .expect("persist");
    let second = persistence
        .persist(&[draft("beta text", None)], &metadata_named("b.pdf"))
        .await
        .expect("persist");
    assert_ne!(first.document_id, second.document_id);

    let search = SearchService::new(store, Arc::new(DeterministicEmbedder));
    let hits = search
        .search(SearchRequest {
            query: "text".to_string(),
            document_id: Some(second.document_id),
            top_k: 10,
            min_score: 0.0,
        })
        .await
        .expect("search");

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].document_id, second.document_id);
}

#[tokio::test]
async fn pipeline_processes_an_upload_end_to_end() {
    use docflow::config::Config;
    use docflow::processing::{IngestApi, IngestionPipeline};

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("guide.md");
    std::fs::write(
        &path,
        "# Field Guide\nShort introduction.\n\n## Usage\nRun the service and watch the queue.\n",
    )
    .expect("write");

    // Config is only read for the chunk budget and model here; point the
    // external endpoints at placeholders.
    let config = {
        // SAFETY: Test process sets its environment up front.
        unsafe {
            std::env::set_var("DATABASE_URL", "postgres://localhost/docflow-test");
            std::env::set_var("OPENAI_API_KEY", "sk-test");
        }
        Config::from_env().expect("config")
    };

    let store = Arc::new(MemoryStore::default());
    let notifier = Arc::new(SilentNotifier::default());
    let persistence = PersistenceService::new(store.clone(), Arc::new(DeterministicEmbedder));
    let pipeline = IngestionPipeline::new(&config, persistence, notifier.clone());

    let mut metadata = metadata_named("guide.md");
    metadata.insert_extra("original_filename", json!("guide.md"));
    let result = pipeline
        .process("job-md-1", Path::new(&path), metadata)
        .await
        .expect("pipeline");

    assert_eq!(result.title.as_deref(), Some("Field Guide"));
    assert!(result.chunk_count >= 1);
    let documents = store.documents.lock().expect("lock");
    assert_eq!(documents.len(), 1);
    assert_eq!(store.chunk_count_for(documents[0].0), result.chunk_count);

    let events = notifier.events.lock().expect("lock");
    assert_eq!(events.first().expect("events").1["stage"], "started");
    assert_eq!(events.last().expect("events").0, "completed");
}
