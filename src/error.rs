use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the recollect engine
#[derive(Error, Debug)]
pub enum RecollectError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Embedding provider errors
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Completion provider errors
    #[error("Completion error: {0}")]
    Completion(String),

    /// Vector store errors
    #[error("Vector store error: {0}")]
    VectorStore(String),

    /// Lexical index errors
    #[error("Lexical index error: {0}")]
    Lexical(String),

    /// Indexing job errors
    #[error("Indexing error: {0}")]
    Indexing(String),

    /// Indexing job not found
    #[error("Indexing job not found: {id}")]
    JobNotFound { id: String },

    /// An indexing pass is already running for the user
    #[error("Indexing already running for user {user_id}")]
    IndexingAlreadyRunning { user_id: String },

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Connection pool errors
    #[error("Connection pool error: {0}")]
    Pool(String),

    /// Retrieval errors (all channels failed)
    #[error("Retrieval failed: {0}")]
    Retrieval(String),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for recollect operations
pub type Result<T> = std::result::Result<T, RecollectError>;
