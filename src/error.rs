//! Error types shared across the memory pipeline.

use std::path::PathBuf;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error for every fallible operation in the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    /// A query arrived before any build installed an index.
    #[error("memory is not ready: no index has been built yet")]
    MemoryNotReady,

    #[error("question must not be empty")]
    EmptyQuestion,

    #[error("file watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// True for errors the interactive loop reports in place and moves past.
    pub fn is_user_facing(&self) -> bool {
        matches!(self, Error::MemoryNotReady | Error::EmptyQuestion)
    }
}

/// Startup configuration problems. Always fatal.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("environment variable {0} is not set")]
    MissingCredential(&'static str),

    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("invalid prompt template: {0}")]
    Template(#[from] minijinja::Error),
}

/// Vector store failures.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("LanceDB error: {0}")]
    LanceDb(String),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),

    #[error("vector dimension mismatch: collection expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("failed to open vector store at {path}: {reason}")]
    Open { path: PathBuf, reason: String },
}

impl From<lancedb::Error> for DbError {
    fn from(error: lancedb::Error) -> Self {
        DbError::LanceDb(error.to_string())
    }
}

/// Remote (or local) model failures: embeddings and generation.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("HTTP {status} from model API: {body}")]
    Status { status: u16, body: String },

    #[error("request failed: {0}")]
    Transport(String),

    #[error("model returned an empty response")]
    EmptyResponse,
}

impl LlmError {
    /// Whether another attempt of the same call can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Timeout { .. } | LlmError::Transport(_) => true,
            LlmError::Status { status, .. } => *status == 429 || *status >= 500,
            LlmError::EmbeddingFailed(_) | LlmError::EmptyResponse => false,
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(error: reqwest::Error) -> Self {
        if let Some(status) = error.status() {
            return LlmError::Status {
                status: status.as_u16(),
                body: error.to_string(),
            };
        }
        LlmError::Transport(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        let throttled = LlmError::Status {
            status: 429,
            body: String::new(),
        };
        let unavailable = LlmError::Status {
            status: 503,
            body: String::new(),
        };
        let unauthorized = LlmError::Status {
            status: 401,
            body: String::new(),
        };

        assert!(throttled.is_retryable());
        assert!(unavailable.is_retryable());
        assert!(!unauthorized.is_retryable());
        assert!(
            LlmError::Timeout {
                operation: "embed",
                after: Duration::from_secs(1)
            }
            .is_retryable()
        );
        assert!(!LlmError::EmptyResponse.is_retryable());
    }

    #[test]
    fn not_ready_is_user_facing() {
        assert!(Error::MemoryNotReady.is_user_facing());
        assert!(!Error::from(LlmError::EmptyResponse).is_user_facing());
    }
}
