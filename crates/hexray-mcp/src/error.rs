//! Error types for the MCP server

use thiserror::Error;

/// Result type for MCP operations
pub type Result<T> = std::result::Result<T, ServerError>;

/// Errors that can occur in the MCP server
#[derive(Error, Debug)]
pub enum ServerError {
    /// No index exists for the project yet
    #[error("No index found: {0}")]
    NoIndex(String),

    /// Indexing run failed
    #[error("Indexing failed: {0}")]
    Index(String),

    /// Query failed
    #[error("Query failed: {0}")]
    Query(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<hexray_core::QueryError> for ServerError {
    fn from(e: hexray_core::QueryError) -> Self {
        match e {
            hexray_core::QueryError::NoIndex(path) => {
                ServerError::NoIndex(path.display().to_string())
            }
            other => ServerError::Query(other.to_string()),
        }
    }
}

impl From<hexray_core::IndexerError> for ServerError {
    fn from(e: hexray_core::IndexerError) -> Self {
        ServerError::Index(e.to_string())
    }
}
