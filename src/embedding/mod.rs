//! Embedding client abstraction and the OpenAI-compatible HTTP adapter.
//!
//! The client is a pure text → fixed-length vector function with no state and
//! no internal retries; callers own the retry policy. Dimensionality is a hard
//! contract with the store's similarity operator, so a mismatched response is
//! treated as a configuration error rather than a per-record one.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::config::Config;

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingClientError {
    /// Input text was empty; rejected before any provider call.
    #[error("Cannot embed empty text")]
    EmptyInput,
    /// HTTP layer failed before receiving a response.
    #[error("Embedding request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Provider responded with an unexpected status code.
    #[error("Unexpected embedding provider response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the provider.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// Provider returned fewer vectors than inputs.
    #[error("Embedding provider returned no vector for input {index}")]
    MissingEmbedding {
        /// Position of the input that received no vector.
        index: usize,
    },
    /// Returned vector length does not match the configured dimensionality.
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimensionality configured for the store's vector columns.
        expected: usize,
        /// Dimensionality the provider actually returned.
        actual: usize,
    },
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Produce an embedding vector for a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingClientError>;

    /// Produce one vector per input text, outputs ordered to match inputs.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingClientError>;
}

/// Embedding client backed by an OpenAI-compatible `/v1/embeddings` endpoint.
pub struct OpenAiEmbeddingClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    dimension: usize,
}

impl OpenAiEmbeddingClient {
    /// Construct a new client from configuration.
    pub fn new(config: &Config) -> Result<Self, EmbeddingClientError> {
        let client = Client::builder().user_agent("docflow/0.1").build()?;
        Ok(Self {
            client,
            base_url: config.embedding_api_base.trim_end_matches('/').to_string(),
            api_key: config.embedding_api_key.clone(),
            model: config.embedding_model.clone(),
            dimension: config.embedding_dimension,
        })
    }

    async fn request_embeddings(
        &self,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        let body = json!({
            "model": self.model,
            "input": texts,
            "dimensions": self.dimension,
        });

        let response = self
            .client
            .post(format!("{}/v1/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = EmbeddingClientError::UnexpectedStatus { status, body };
            tracing::error!(error = %error, "Embedding provider returned an error");
            return Err(error);
        }

        let payload: EmbeddingsResponse = response.json().await?;
        let mut ordered: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        for item in payload.data {
            if let Some(slot) = ordered.get_mut(item.index) {
                *slot = Some(item.embedding);
            }
        }

        ordered
            .into_iter()
            .enumerate()
            .map(|(index, vector)| {
                let vector = vector.ok_or(EmbeddingClientError::MissingEmbedding { index })?;
                if vector.len() != self.dimension {
                    return Err(EmbeddingClientError::DimensionMismatch {
                        expected: self.dimension,
                        actual: vector.len(),
                    });
                }
                Ok(vector)
            })
            .collect()
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingClientError> {
        if text.trim().is_empty() {
            return Err(EmbeddingClientError::EmptyInput);
        }
        let mut vectors = self.request_embeddings(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or(EmbeddingClientError::MissingEmbedding { index: 0 })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.iter().any(|text| text.trim().is_empty()) {
            return Err(EmbeddingClientError::EmptyInput);
        }
        self.request_embeddings(texts).await
    }
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingObject>,
}

#[derive(Deserialize)]
struct EmbeddingObject {
    index: usize,
    embedding: Vec<f32>,
}
