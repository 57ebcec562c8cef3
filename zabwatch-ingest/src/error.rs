//! Error types for ingestion.

use thiserror::Error;

/// Errors that can occur while fetching alert data from the remote API.
#[derive(Debug, Error)]
pub enum IngestError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// Failed to parse response.
    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// Authentication failed.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Connection failed.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Timeout waiting for response.
    #[error("Request timed out")]
    Timeout,
}

impl From<reqwest::Error> for IngestError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            IngestError::Timeout
        } else if err.is_connect() {
            IngestError::Connection(err.to_string())
        } else {
            IngestError::Http(err.to_string())
        }
    }
}
