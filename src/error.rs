//! Error types for the query pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Diagnostic returned by the query store when a statement fails.
///
/// `message` is the engine's literal text; the analyst forwards it verbatim
/// into the next drafting prompt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct QueryError {
    pub message: String,
}

impl QueryError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<sqlx::Error> for QueryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db) => Self::new(db.message()),
            other => Self::new(other.to_string()),
        }
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {

    // =============================
    // Core Pipeline Errors
    // =============================

    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    #[error("Generation unavailable: {0}")]
    GenerationUnavailable(String),

    #[error("Retries exhausted after {attempts} attempt(s)")]
    RetriesExhausted { attempts: u32 },

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl PipelineError {
    /// Short, stable label used in event payloads instead of the full message.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Query(_) => "query_error",
            PipelineError::GenerationUnavailable(_) => "generation_unavailable",
            PipelineError::RetriesExhausted { .. } => "retries_exhausted",
            PipelineError::Schema(_) => "schema_error",
            PipelineError::Config(_) => "config_error",
            PipelineError::Database(_) => "database_error",
            PipelineError::SerializationError(_) => "serialization_error",
            PipelineError::HttpError(_) => "http_error",
            PipelineError::IoError(_) => "io_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_error_displays_literal_message() {
        let err = QueryError::new("no such column: amout");
        assert_eq!(err.to_string(), "no such column: amout");

        let wrapped: PipelineError = err.into();
        assert_eq!(wrapped.kind(), "query_error");
        assert!(wrapped.to_string().contains("no such column: amout"));
    }

    #[test]
    fn test_retries_exhausted_message() {
        let err = PipelineError::RetriesExhausted { attempts: 3 };
        assert_eq!(err.to_string(), "Retries exhausted after 3 attempt(s)");
    }
}
