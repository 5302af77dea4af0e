use std::env;
use std::path::PathBuf;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the docflow service.
///
/// Loaded once in `main` and handed to each component at construction time;
/// nothing in the pipeline reads the environment after startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string for the document store.
    pub database_url: String,
    /// Minimum number of pooled connections kept warm.
    pub db_min_connections: u32,
    /// Maximum number of pooled connections.
    pub db_max_connections: u32,
    /// Seconds to wait for a pooled connection before failing with `ResourceExhausted`.
    pub db_acquire_timeout_secs: u64,
    /// AMQP endpoint of the message broker.
    pub amqp_url: String,
    /// Name of the durable queue carrying ingestion jobs.
    pub queue_name: String,
    /// Directory holding uploaded files; job file paths resolve against this root.
    pub uploads_dir: PathBuf,
    /// API key for the embedding provider.
    pub embedding_api_key: String,
    /// Base URL of the embedding provider (overridable for tests).
    pub embedding_api_base: String,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Token budget per chunk handed to the splitter.
    pub chunk_max_tokens: usize,
    /// Base URL of the collaborator service receiving status notifications.
    pub notify_base_url: String,
    /// Shared secret sent with each status notification.
    pub internal_api_key: String,
    /// Port for the HTTP search surface.
    pub server_port: u16,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            database_url: load_env("DATABASE_URL")?,
            db_min_connections: parse_env_or("DB_MIN_CONNECTIONS", 1)?,
            db_max_connections: parse_env_or("DB_MAX_CONNECTIONS", 10)?,
            db_acquire_timeout_secs: parse_env_or("DB_ACQUIRE_TIMEOUT_SECS", 30)?,
            amqp_url: load_env_or("AMQP_URL", "amqp://localhost:5672"),
            queue_name: load_env_or("QUEUE_NAME", "document_processing"),
            uploads_dir: PathBuf::from(load_env_or("UPLOADS_DIR", "uploads")),
            embedding_api_key: load_env("OPENAI_API_KEY")?,
            embedding_api_base: load_env_or("EMBEDDING_API_BASE", "https://api.openai.com"),
            embedding_model: load_env_or("EMBEDDING_MODEL", "text-embedding-3-large"),
            embedding_dimension: parse_env_or("EMBEDDING_DIMENSION", 1536)?,
            chunk_max_tokens: parse_env_or("CHUNK_MAX_TOKENS", 8191)?,
            notify_base_url: load_env_or("API_SERVER_URL", "http://localhost:3000"),
            internal_api_key: load_env_or("INTERNAL_API_KEY", "development_key"),
            server_port: parse_env_or("SERVER_PORT", 8000)?,
        })
    }
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingVariable(key.to_string()))
}

fn load_env_or(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        _ => Ok(default),
    }
}
