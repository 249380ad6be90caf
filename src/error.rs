//! Error types for vimcq.

use thiserror::Error;

/// Result type alias using vimcq's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading, routing or answering questions.
///
/// Most of these never escape a single question: the orchestrator converts
/// handler failures into the default answer. Only resource acquisition
/// failures (input files, knowledge store, credentials) reach the caller.
#[derive(Error, Debug)]
pub enum Error {
    /// LLM API error
    #[error("LLM API error: {provider} - {message}")]
    LlmApi { provider: String, message: String },

    /// LLM error (simple variant)
    #[error("LLM error: {0}")]
    LLM(String),

    /// Subprocess communication error
    #[error("Subprocess communication error: {0}")]
    SubprocessComm(String),

    /// Timeout during operation
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Knowledge store error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV read/write error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A question failed validation
    #[error("Invalid question {id}: {reason}")]
    InvalidQuestion { id: String, reason: String },

    /// Pipeline state transition violated
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an LLM API error.
    pub fn llm_api(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LlmApi {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create an invalid question error.
    pub fn invalid_question(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidQuestion {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::llm_api("google", "quota exceeded");
        assert_eq!(err.to_string(), "LLM API error: google - quota exceeded");

        let err = Error::timeout(1500);
        assert_eq!(err.to_string(), "Operation timed out after 1500ms");

        let err = Error::invalid_question("q7", "needs at least 2 choices");
        assert_eq!(
            err.to_string(),
            "Invalid question q7: needs at least 2 choices"
        );
    }
}
