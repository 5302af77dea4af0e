//! Shared types used by the storage gateway.

use serde_json::Value;
use sqlx::postgres::PgRow;
use thiserror::Error;

/// Errors returned while interacting with the document store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Pool creation or initial connectivity failed.
    #[error("Failed to connect to the document store: {0}")]
    Connect(#[source] sqlx::Error),
    /// No pooled connection became available within the acquire timeout.
    #[error("Connection pool exhausted: {0}")]
    ResourceExhausted(#[source] sqlx::Error),
    /// Statement execution failed; any surrounding transaction was rolled back.
    #[error("Statement execution failed: {0}")]
    Query(#[source] sqlx::Error),
    /// A returned row could not be decoded into the expected shape.
    #[error("Row decoding failed: {0}")]
    Row(#[source] sqlx::Error),
}

impl StorageError {
    /// Classify an execution-path sqlx error, keeping pool exhaustion distinct.
    pub(crate) fn from_execution(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => Self::ResourceExhausted(err),
            other => Self::Query(other),
        }
    }
}

/// How [`crate::storage::StorageGateway::execute`] should shape its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    /// Fetch every row the statement produces.
    Rows,
    /// Fetch at most one row.
    SingleRow,
    /// Execute and report the number of affected rows.
    RowCount,
}

/// Result of a gateway statement execution, shaped by [`QueryMode`].
pub enum QueryOutput {
    /// All rows returned by the statement.
    Rows(Vec<PgRow>),
    /// The first row, when one exists.
    Row(Option<PgRow>),
    /// Number of rows affected by a write.
    Count(u64),
}

/// Typed bind value accepted by the generic execution contract.
#[derive(Debug, Clone)]
pub enum SqlParam {
    /// Text bind, including pgvector literals cast in the statement.
    Text(String),
    /// Nullable text bind.
    OptionalText(Option<String>),
    /// 64-bit integer bind.
    Int(i64),
}

/// Chunk row ready for the bulk insert, embedding already computed.
#[derive(Debug, Clone)]
pub struct NewChunk {
    /// Literal text span that produced the embedding.
    pub chunk_text: String,
    /// Fixed-dimensionality embedding vector.
    pub embedding: Vec<f32>,
    /// Sorted distinct page numbers the span covers, when known.
    pub page_numbers: Option<Vec<i32>>,
    /// Per-chunk metadata (filename, first heading, extensions).
    pub metadata: Value,
}

/// Scored row returned by the similarity query, ordered by descending score.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    /// Chunk identifier assigned by the store.
    pub id: i64,
    /// Owning document identifier.
    pub document_id: i64,
    /// Stored chunk text.
    pub text: String,
    /// Similarity score, `1 − cosine distance` against the query vector.
    pub score: f64,
    /// Stored chunk metadata, when present.
    pub metadata: Option<Value>,
}

/// Render a pgvector literal (`[v0,v1,…]`) for binding with a `::vector` cast.
pub(crate) fn vector_literal(values: &[f32]) -> String {
    let rendered: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    format!("[{}]", rendered.join(","))
}

/// Statements that mutate state run inside an internally managed transaction.
pub(crate) fn is_write_statement(statement: &str) -> bool {
    let head = statement.trim_start().to_ascii_uppercase();
    !(head.starts_with("SELECT") || head.starts_with("WITH"))
}
