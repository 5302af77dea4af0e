//! Pooled gateway over PostgreSQL with the pgvector extension.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::pool::PoolConnection;
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

use crate::config::Config;
use crate::storage::types::{
    NewChunk, QueryMode, QueryOutput, ScoredChunk, SqlParam, StorageError, is_write_statement,
    vector_literal,
};

/// Typed operations the ingestion and search paths need from the store.
///
/// [`StorageGateway`] is the only implementation that touches raw connections;
/// tests exercise the services above this seam with in-memory doubles.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert one document row and return its generated id.
    async fn insert_document(&self, filename: Option<&str>) -> Result<i64, StorageError>;

    /// Bulk-insert every chunk row for a document in a single transaction.
    ///
    /// Either all rows become visible or none do. Returns the inserted count.
    async fn insert_chunks(
        &self,
        document_id: i64,
        chunks: &[NewChunk],
    ) -> Result<u64, StorageError>;

    /// Rank stored chunks against a query vector, highest score first.
    ///
    /// Ordering and the `top_k` limit are pushed down to the store; callers
    /// apply any score threshold on the returned rows.
    async fn similarity_search(
        &self,
        embedding: &[f32],
        document_id: Option<i64>,
        top_k: u32,
    ) -> Result<Vec<ScoredChunk>, StorageError>;

    /// Trivial connectivity probe used by the health surface.
    async fn ping(&self) -> Result<(), StorageError>;
}

/// Process-wide connection pool plus the statement-execution contract.
pub struct StorageGateway {
    pool: PgPool,
}

impl StorageGateway {
    /// Build the shared connection pool from configuration.
    pub async fn connect(config: &Config) -> Result<Self, StorageError> {
        tracing::info!(
            min_connections = config.db_min_connections,
            max_connections = config.db_max_connections,
            acquire_timeout_secs = config.db_acquire_timeout_secs,
            "Creating database connection pool"
        );
        let pool = PgPoolOptions::new()
            .min_connections(config.db_min_connections)
            .max_connections(config.db_max_connections)
            .acquire_timeout(Duration::from_secs(config.db_acquire_timeout_secs))
            .connect(&config.database_url)
            .await
            .map_err(StorageError::Connect)?;

        Ok(Self { pool })
    }

    /// Check out a connection for exclusive use.
    ///
    /// The connection returns to the pool when the handle drops, on every exit
    /// path. Acquisition blocks up to the configured timeout and then fails
    /// with [`StorageError::ResourceExhausted`].
    pub async fn acquire(&self) -> Result<PoolConnection<Postgres>, StorageError> {
        self.pool.acquire().await.map_err(StorageError::from_execution)
    }

    /// Run one statement under the gateway's transaction discipline.
    ///
    /// Read statements execute directly against the pool. Write statements run
    /// inside an internally managed transaction: commit on success, rollback on
    /// any execution error, with the error re-raised as [`StorageError`].
    pub async fn execute(
        &self,
        statement: &str,
        params: &[SqlParam],
        mode: QueryMode,
    ) -> Result<QueryOutput, StorageError> {
        if is_write_statement(statement) {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(StorageError::from_execution)?;
            match run_statement(&mut *tx, statement, params, mode).await {
                Ok(output) => {
                    tx.commit().await.map_err(StorageError::from_execution)?;
                    Ok(output)
                }
                Err(err) => {
                    if let Err(rollback_err) = tx.rollback().await {
                        tracing::warn!(error = %rollback_err, "Rollback failed after statement error");
                    }
                    Err(err)
                }
            }
        } else {
            run_statement(&self.pool, statement, params, mode).await
        }
    }

    /// Verify that the vector extension and core tables exist.
    ///
    /// Absence is logged as a warning, never fatal: the service still starts
    /// and later operations surface [`StorageError`] when they hit the missing
    /// object.
    pub async fn verify_schema(&self) {
        match self.scalar_exists("SELECT EXISTS(SELECT 1 FROM pg_extension WHERE extname = 'vector')", &[]).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!("Vector extension is not installed in the database"),
            Err(err) => tracing::warn!(error = %err, "Could not verify vector extension"),
        }

        let mut missing = Vec::new();
        for table in ["documents", "chunks"] {
            let statement = "SELECT EXISTS (SELECT FROM information_schema.tables \
                             WHERE table_schema = 'public' AND table_name = $1)";
            match self
                .scalar_exists(statement, &[SqlParam::Text(table.to_string())])
                .await
            {
                Ok(true) => {}
                Ok(false) => missing.push(table),
                Err(err) => tracing::warn!(table, error = %err, "Could not verify table"),
            }
        }

        if missing.is_empty() {
            tracing::info!("Database schema verified: documents and chunks tables exist");
        } else {
            tracing::warn!(?missing, "Required database tables are absent");
        }
    }

    /// Close every pooled connection. Called once at shutdown.
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("Database connection pool closed");
    }

    async fn scalar_exists(
        &self,
        statement: &str,
        params: &[SqlParam],
    ) -> Result<bool, StorageError> {
        match self.execute(statement, params, QueryMode::SingleRow).await? {
            QueryOutput::Row(Some(row)) => row.try_get::<bool, _>(0).map_err(StorageError::Row),
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl DocumentStore for StorageGateway {
    async fn insert_document(&self, filename: Option<&str>) -> Result<i64, StorageError> {
        let output = self
            .execute(
                "INSERT INTO documents (filename) VALUES ($1) RETURNING id",
                &[SqlParam::OptionalText(filename.map(str::to_string))],
                QueryMode::SingleRow,
            )
            .await?;

        match output {
            QueryOutput::Row(Some(row)) => row.try_get::<i64, _>("id").map_err(StorageError::Row),
            _ => Err(StorageError::Row(sqlx::Error::RowNotFound)),
        }
    }

    async fn insert_chunks(
        &self,
        document_id: i64,
        chunks: &[NewChunk],
    ) -> Result<u64, StorageError> {
        if chunks.is_empty() {
            return Ok(0);
        }

        // One batched statement inside one transaction: all rows or none.
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO chunks (document_id, chunk_text, embedding, page_numbers, metadata) ",
        );
        builder.push_values(chunks.iter(), |mut row, chunk| {
            row.push_bind(document_id)
                .push_bind(&chunk.chunk_text)
                .push_bind(vector_literal(&chunk.embedding))
                .push_unseparated("::vector")
                .push_bind(&chunk.page_numbers)
                .push_bind(&chunk.metadata);
        });

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(StorageError::from_execution)?;
        match builder.build().execute(&mut *tx).await {
            Ok(done) => {
                tx.commit().await.map_err(StorageError::from_execution)?;
                tracing::info!(
                    document_id,
                    chunks = done.rows_affected(),
                    "Stored chunk batch"
                );
                Ok(done.rows_affected())
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(error = %rollback_err, "Rollback failed after bulk insert error");
                }
                tracing::error!(document_id, error = %err, "Chunk batch insert failed");
                Err(StorageError::Query(err))
            }
        }
    }

    async fn similarity_search(
        &self,
        embedding: &[f32],
        document_id: Option<i64>,
        top_k: u32,
    ) -> Result<Vec<ScoredChunk>, StorageError> {
        let mut statement = String::from(
            "SELECT c.id, c.document_id, c.chunk_text AS text, c.metadata, \
             1 - (c.embedding <=> $1::vector) AS score FROM chunks c",
        );
        let mut params = vec![SqlParam::Text(vector_literal(embedding))];

        if let Some(id) = document_id {
            statement.push_str(" WHERE c.document_id = $2");
            params.push(SqlParam::Int(id));
        }

        statement.push_str(&format!(
            " ORDER BY score DESC LIMIT ${}",
            params.len() + 1
        ));
        params.push(SqlParam::Int(i64::from(top_k)));

        let output = self.execute(&statement, &params, QueryMode::Rows).await?;
        let rows = match output {
            QueryOutput::Rows(rows) => rows,
            _ => Vec::new(),
        };
        rows.into_iter().map(scored_chunk_from_row).collect()
    }

    async fn ping(&self) -> Result<(), StorageError> {
        self.execute("SELECT 1", &[], QueryMode::SingleRow)
            .await
            .map(|_| ())
    }
}

async fn run_statement<'c, E>(
    executor: E,
    statement: &str,
    params: &[SqlParam],
    mode: QueryMode,
) -> Result<QueryOutput, StorageError>
where
    E: sqlx::PgExecutor<'c>,
{
    let mut query = sqlx::query(statement);
    for param in params {
        query = bind_param(query, param);
    }

    match mode {
        QueryMode::Rows => query
            .fetch_all(executor)
            .await
            .map(QueryOutput::Rows)
            .map_err(StorageError::from_execution),
        QueryMode::SingleRow => query
            .fetch_optional(executor)
            .await
            .map(QueryOutput::Row)
            .map_err(StorageError::from_execution),
        QueryMode::RowCount => query
            .execute(executor)
            .await
            .map(|done| QueryOutput::Count(done.rows_affected()))
            .map_err(StorageError::from_execution),
    }
}

fn bind_param<'q>(
    query: Query<'q, Postgres, PgArguments>,
    param: &SqlParam,
) -> Query<'q, Postgres, PgArguments> {
    match param {
        SqlParam::Text(value) => query.bind(value.clone()),
        SqlParam::OptionalText(value) => query.bind(value.clone()),
        SqlParam::Int(value) => query.bind(*value),
    }
}

fn scored_chunk_from_row(row: PgRow) -> Result<ScoredChunk, StorageError> {
    Ok(ScoredChunk {
        id: row.try_get("id").map_err(StorageError::Row)?,
        document_id: row.try_get("document_id").map_err(StorageError::Row)?,
        text: row.try_get("text").map_err(StorageError::Row)?,
        score: row.try_get("score").map_err(StorageError::Row)?,
        metadata: row.try_get("metadata").map_err(StorageError::Row)?,
    })
}
