//! Common error types for photodrive.

use thiserror::Error;

/// Top-level error type for photodrive operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport failure talking to Drive or to an upload source.
    #[error("Network error: {0}")]
    Network(String),

    /// OAuth2 authorization or token refresh failed.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Drive answered with a non-success status.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Access to the resource was denied.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A one-shot upload source was already consumed by an earlier attempt.
    #[error("Source exhausted: {0}")]
    SourceExhausted(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Short, stable label for the error variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Network(_) => "network",
            Error::Authentication(_) => "authentication",
            Error::Api { .. } => "api",
            Error::NotFound(_) => "not_found",
            Error::PermissionDenied(_) => "permission_denied",
            Error::InvalidInput(_) => "invalid_input",
            Error::SourceExhausted(_) => "source_exhausted",
            Error::Serialization(_) => "serialization",
            Error::Io(_) => "io",
        }
    }

    /// Whether repeating the same call could produce a different outcome.
    ///
    /// Everything is retryable except errors caused by the request itself.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Error::InvalidInput(_) | Error::SourceExhausted(_))
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
