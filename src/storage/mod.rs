//! PostgreSQL/pgvector storage gateway.
//!
//! The gateway owns the process-wide connection pool and is the only component
//! that touches raw connections. Everything above it goes through either the
//! generic [`StorageGateway::execute`] contract or the typed operations exposed
//! by the [`DocumentStore`] trait.

mod gateway;
pub mod types;

pub use gateway::{DocumentStore, StorageGateway};
pub use types::{NewChunk, QueryMode, QueryOutput, ScoredChunk, SqlParam, StorageError};
