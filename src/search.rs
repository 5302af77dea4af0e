//! Similarity search over stored chunks.
//!
//! Ranking and the `top_k` limit are pushed down to the store; the score
//! threshold is applied client-side afterwards. That ordering is part of the
//! documented contract: a row can pass the threshold yet miss the results
//! because it fell outside the top-`k` window before filtering.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::embedding::{EmbeddingClient, EmbeddingClientError};
use crate::storage::{DocumentStore, StorageError};

/// Returned chunk text is bounded to this many characters.
pub const MAX_RESULT_TEXT_CHARS: usize = 1000;
/// Marker appended when a result text was truncated.
const TRUNCATION_MARKER: &str = "...";

/// Errors emitted while orchestrating similarity searches.
#[derive(Debug, Error)]
pub enum SearchError {
    /// Query text was empty or whitespace-only.
    #[error("Search query cannot be empty")]
    EmptyQuery,
    /// Embedding provider failed to return a vector for the query text.
    #[error("Failed to generate embeddings: {0}")]
    Embedding(#[from] EmbeddingClientError),
    /// Similarity query against the store failed.
    #[error("Storage request failed: {0}")]
    Storage(#[from] StorageError),
}

/// Parameters supplied to the search pipeline.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    /// Natural-language query text to embed.
    pub query: String,
    /// Optional scope restricting results to one document.
    pub document_id: Option<i64>,
    /// Maximum number of rows the store may return.
    pub top_k: u32,
    /// Rows scoring strictly below this value are discarded client-side.
    pub min_score: f64,
}

/// Ranked search result returned to API consumers.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    /// Chunk identifier.
    pub id: i64,
    /// Owning document identifier.
    pub document_id: i64,
    /// Chunk text, truncated to [`MAX_RESULT_TEXT_CHARS`].
    pub text: String,
    /// Similarity score, `1 − cosine distance`; descending across results.
    pub score: f64,
    /// Stored chunk metadata, when present.
    pub metadata: Option<Value>,
}

/// Abstraction over the search pipeline used by the HTTP surface.
#[async_trait]
pub trait SearchApi: Send + Sync {
    /// Embed the query and return ranked, filtered, truncated results.
    async fn search(&self, request: SearchRequest) -> Result<Vec<SearchHit>, SearchError>;
}

/// Embeds queries and ranks stored chunks through the storage gateway.
pub struct SearchService {
    store: Arc<dyn DocumentStore>,
    embedding: Arc<dyn EmbeddingClient>,
}

impl SearchService {
    /// Build the service over the shared store and embedding client.
    pub fn new(store: Arc<dyn DocumentStore>, embedding: Arc<dyn EmbeddingClient>) -> Self {
        Self { store, embedding }
    }
}

#[async_trait]
impl SearchApi for SearchService {
    async fn search(&self, request: SearchRequest) -> Result<Vec<SearchHit>, SearchError> {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(SearchError::EmptyQuery);
        }

        tracing::debug!(query, top_k = request.top_k, "Embedding search query");
        let vector = self.embedding.embed(query).await?;
        let rows = self
            .store
            .similarity_search(&vector, request.document_id, request.top_k)
            .await?;

        let hits: Vec<SearchHit> = rows
            .into_iter()
            .filter(|row| row.score >= request.min_score)
            .map(|row| SearchHit {
                id: row.id,
                document_id: row.document_id,
                text: truncate_text(row.text),
                score: row.score,
                metadata: row.metadata,
            })
            .collect();
        tracing::info!(query, results = hits.len(), "Search complete");
        Ok(hits)
    }
}

/// Bound result text to [`MAX_RESULT_TEXT_CHARS`], marker included.
fn truncate_text(text: String) -> String {
    if text.chars().count() <= MAX_RESULT_TEXT_CHARS {
        return text;
    }
    let mut truncated: String = text
        .chars()
        .take(MAX_RESULT_TEXT_CHARS - TRUNCATION_MARKER.len())
        .collect();
    truncated.push_str(TRUNCATION_MARKER);
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{NewChunk, ScoredChunk};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubStore {
        rows: Vec<ScoredChunk>,
        requested_top_k: Mutex<Option<u32>>,
    }

    impl StubStore {
        fn with_scores(scores: &[f64]) -> Self {
            let rows = scores
                .iter()
                .enumerate()
                .map(|(idx, &score)| ScoredChunk {
                    id: idx as i64 + 1,
                    document_id: 1,
                    text: format!("chunk {idx}"),
                    score,
                    metadata: None,
                })
                .collect();
            Self {
                rows,
                requested_top_k: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl DocumentStore for StubStore {
        async fn insert_document(&self, _filename: Option<&str>) -> Result<i64, StorageError> {
            Ok(1)
        }

        async fn insert_chunks(
            &self,
            _document_id: i64,
            chunks: &[NewChunk],
        ) -> Result<u64, StorageError> {
            Ok(chunks.len() as u64)
        }

        async fn similarity_search(
            &self,
            _embedding: &[f32],
            _document_id: Option<i64>,
            top_k: u32,
        ) -> Result<Vec<ScoredChunk>, StorageError> {
            *self.requested_top_k.lock().expect("lock") = Some(top_k);
            Ok(self
                .rows
                .iter()
                .take(top_k as usize)
                .cloned()
                .collect())
        }

        async fn ping(&self) -> Result<(), StorageError> {
            Ok(())
        }
    }

    struct CountingEmbedder {
        calls: AtomicUsize,
    }

    impl CountingEmbedder {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl EmbeddingClient for CountingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![1.0, 0.0])
        }

        async fn embed_batch(
            &self,
            texts: &[String],
        ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    fn request(query: &str, top_k: u32, min_score: f64) -> SearchRequest {
        SearchRequest {
            query: query.to_string(),
            document_id: None,
            top_k,
            min_score,
        }
    }

    fn service_with(store: Arc<StubStore>, embedder: Arc<CountingEmbedder>) -> SearchService {
        SearchService::new(store, embedder)
    }

    #[tokio::test]
    async fn blank_query_fails_before_embedding() {
        let embedder = Arc::new(CountingEmbedder::new());
        let service = service_with(
            Arc::new(StubStore::with_scores(&[0.9])),
            embedder.clone(),
        );

        let err = service
            .search(request("   ", 5, 0.0))
            .await
            .expect_err("blank query");
        assert!(matches!(err, SearchError::EmptyQuery));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn threshold_above_best_score_yields_no_results() {
        let service = service_with(
            Arc::new(StubStore::with_scores(&[0.85, 0.7])),
            Arc::new(CountingEmbedder::new()),
        );

        let hits = service
            .search(request("storage engines", 5, 0.9))
            .await
            .expect("search");
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn threshold_filters_after_the_top_k_window() {
        let store = Arc::new(StubStore::with_scores(&[0.95, 0.92, 0.4, 0.3, 0.2]));
        let service = service_with(store.clone(), Arc::new(CountingEmbedder::new()));

        let hits = service
            .search(request("storage engines", 5, 0.9))
            .await
            .expect("search");
        assert_eq!(hits.len(), 2);
        assert_eq!(
            store.requested_top_k.lock().expect("lock").expect("recorded"),
            5
        );
    }

    #[tokio::test]
    async fn scores_are_non_increasing_across_results() {
        let service = service_with(
            Arc::new(StubStore::with_scores(&[0.9, 0.8, 0.8, 0.5])),
            Arc::new(CountingEmbedder::new()),
        );

        let hits = service
            .search(request("ordering", 10, 0.0))
            .await
            .expect("search");
        for window in hits.windows(2) {
            assert!(window[0].score >= window[1].score);
        }
    }

    #[tokio::test]
    async fn long_result_text_is_truncated_with_marker() {
        let mut store = StubStore::with_scores(&[0.9]);
        store.rows[0].text = "x".repeat(1500);
        let service = service_with(Arc::new(store), Arc::new(CountingEmbedder::new()));

        let hits = service
            .search(request("long text", 1, 0.0))
            .await
            .expect("search");
        assert_eq!(hits[0].text.chars().count(), MAX_RESULT_TEXT_CHARS);
        assert!(hits[0].text.ends_with("..."));
    }

    #[test]
    fn text_at_the_bound_is_left_alone() {
        let text = "y".repeat(MAX_RESULT_TEXT_CHARS);
        assert_eq!(truncate_text(text.clone()), text);
    }
}
