//! Error taxonomy for the classifier core.
//!
//! Per-bug failures (retrieval, model, parse) are isolated and folded into
//! `Unresolved` results by the engine; configuration errors are fatal at
//! startup and never surface mid-run.

use thiserror::Error;

/// Errors produced by the classifier core.
#[derive(Debug, Error)]
pub enum TriageError {
    /// Malformed feedback, rejected rather than coerced
    #[error("invalid feedback: {0}")]
    Validation(String),

    /// Feedback store or similarity index unreachable
    #[error("feedback retrieval failed: {0}")]
    Retrieval(String),

    /// Transport or rate-limit exhaustion after retries
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    /// Model answer not mappable to a known feature or "none"
    #[error("unparseable model answer: {0}")]
    Parse(String),

    /// Bad configuration, surfaced at startup
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<rusqlite::Error> for TriageError {
    fn from(e: rusqlite::Error) -> Self {
        TriageError::Retrieval(e.to_string())
    }
}

impl From<serde_json::Error> for TriageError {
    fn from(e: serde_json::Error) -> Self {
        TriageError::Retrieval(format!("record serialization: {e}"))
    }
}

/// Convenience alias for core operations.
pub type Result<T> = std::result::Result<T, TriageError>;
