//! Gateway error types.

use thiserror::Error;

/// Errors raised while talking to an external provider.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// The provider rejected the request body (HTTP 422).
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The provider account has run out of credit.
    #[error("Provider quota exhausted")]
    QuotaExhausted,

    /// The provider refused the request with a readable message.
    #[error("Rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("Provider unavailable: {0}")]
    Unavailable(String),
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
