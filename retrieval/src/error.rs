//! Error types for the retrieval engine.

use thiserror::Error;

/// Result type alias for retrieval operations.
pub type Result<T> = std::result::Result<T, RetrievalError>;

/// Errors that can occur in the retrieval engine.
#[derive(Error, Debug)]
pub enum RetrievalError {
    /// Embedding or similarity error, passed through unchanged.
    #[error("embedding error: {0}")]
    Embedding(#[from] docsim_embeddings::EmbeddingError),

    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed TOML configuration.
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
