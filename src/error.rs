//! Error types for the ingestion pipeline and its collaborators.
//!
//! Every fallible component returns [`Result`] over [`NewsError`]. Enrichment
//! has its own [`EnrichError`] so the pipeline can tell a schema mismatch from
//! a provider outage when it records why an article was skipped.

use std::path::PathBuf;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum NewsError {
    /// Configuration file could not be read or is invalid.
    #[error("config error: {message}")]
    Config { message: String },

    /// One or more required API keys are missing.
    #[error("missing credentials: {0}")]
    Credentials(String),

    /// Transport-level HTTP failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The news listing API answered with a non-ok status.
    #[error("news api error ({code}): {message}")]
    NewsApi { code: String, message: String },

    /// Page download or extraction failure.
    #[error("scrape error: {0}")]
    Scrape(String),

    /// LLM enrichment failure.
    #[error("enrichment error: {0}")]
    Enrichment(#[from] EnrichError),

    /// Database error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, NewsError>;

impl NewsError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn storage(msg: impl ToString) -> Self {
        Self::Storage(msg.to_string())
    }

    pub fn scrape(msg: impl Into<String>) -> Self {
        Self::Scrape(msg.into())
    }

    /// Wrap a `std::io::Error` with the path it happened at.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<libsql::Error> for NewsError {
    fn from(e: libsql::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

/// Why a structured enrichment response was rejected.
///
/// Any of these means the article is skipped; nothing is stored for it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnrichError {
    #[error("model returned an empty response")]
    EmptyResponse,

    #[error("model stopped with finish reason `{0}`")]
    FinishReason(String),

    #[error("model refused: {0}")]
    Refusal(String),

    #[error("response does not match schema: {0}")]
    Schema(String),

    #[error("provider error: {0}")]
    Provider(String),
}
