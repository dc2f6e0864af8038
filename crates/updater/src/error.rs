use reqwest::StatusCode;

use crate::version::ParseVersionError;

/// Convenient result alias for update operations.
pub type Result<T> = std::result::Result<T, UpdateError>;

/// Errors that can occur while negotiating, downloading, or pushing an update.
#[derive(thiserror::Error, Debug)]
pub enum UpdateError {
    /// Network request failed (connection, timeout, TLS, ...).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// The server answered with an unexpected HTTP status.
    #[error("unexpected status {status}: {body}")]
    Status {
        /// HTTP status code returned by the server.
        status: StatusCode,
        /// Response body, when one was read.
        body: String,
    },
    /// The response body did not have the expected JSON shape.
    #[error("malformed response: {0}")]
    Protocol(String),
    /// The downloaded artefact size or hash did not match expectations.
    #[error("integrity check failed (expected {expected}, got {actual})")]
    Integrity {
        /// Expected size or SHA-256 digest.
        expected: String,
        /// Actual size or SHA-256 digest.
        actual: String,
    },
    /// Failed to perform an I/O operation.
    #[error("filesystem operation failed: {0}")]
    Io(#[from] std::io::Error),
    /// Failed to parse a version string.
    #[error("version error: {0}")]
    Version(#[from] ParseVersionError),
    /// A transfer precondition was violated before any network call.
    #[error("transfer precondition failed: {0}")]
    Precondition(String),
    /// Generic error.
    #[error("{0}")]
    Other(String),
}

impl UpdateError {
    /// Helper for wrapping protocol-shape failures.
    pub fn protocol(msg: impl Into<String>) -> Self {
        UpdateError::Protocol(msg.into())
    }
}
