//! Error taxonomy shared by the token, search and download components
//!
//! Retryable classes (`Network`, `Transient`) are retried inside the component
//! that issued the call; every other variant propagates to the caller.

use std::path::PathBuf;

/// Client errors
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Credentials were rejected or a session could not be re-established
    #[error("authentication failed{}: {reason}", status_suffix(.status))]
    Auth {
        /// HTTP status returned by the server, if any
        status: Option<u16>,
        /// Reason reported by the server
        reason: String,
    },

    /// Connection-level failure (DNS, refused, reset, timeout)
    #[error("network error calling {endpoint}: {message}")]
    Network {
        /// Endpoint that was being called
        endpoint: String,
        /// Underlying error message
        message: String,
    },

    /// Server kept answering 429 or 5xx until the retry budget ran out
    #[error("transient HTTP {status} from {endpoint} persisted after {attempts} attempts")]
    Transient {
        /// Last HTTP status received
        status: u16,
        /// Endpoint that was being called
        endpoint: String,
        /// Attempts made
        attempts: u32,
    },

    /// Non-retryable HTTP failure (4xx other than 401 and 429)
    #[error("HTTP {status} from {endpoint}: {body}")]
    Http {
        /// HTTP status
        status: u16,
        /// Endpoint that was being called
        endpoint: String,
        /// Response body, truncated
        body: String,
    },

    /// Payload could not be interpreted
    #[error("parse error ({context}): {message}")]
    Parse {
        /// Where the payload came from, e.g. `page 3`
        context: String,
        /// What was wrong with it
        message: String,
    },

    /// Caller-supplied input is invalid
    #[error("validation error: {0}")]
    Validation(String),

    /// Product is on the offline tier and cannot be fetched
    #[error("product {product_id} is OFFLINE and must be staged before download")]
    NotAvailable {
        /// Product identifier
        product_id: String,
    },

    /// Downloaded bytes do not match the declared digest
    #[error("checksum mismatch for {product_id}: expected {algorithm} {expected}, got {actual}")]
    Integrity {
        /// Product identifier
        product_id: String,
        /// Digest algorithm
        algorithm: String,
        /// Declared digest
        expected: String,
        /// Digest of the bytes on disk
        actual: String,
    },

    /// Local filesystem failure
    #[error("IO error on {}: {message}", .path.display())]
    Io {
        /// File or directory involved
        path: PathBuf,
        /// Underlying error message
        message: String,
    },

    /// Operation stopped because cancellation was requested
    #[error("operation cancelled")]
    Cancelled,
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

impl ClientError {
    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Network { .. } | ClientError::Transient { .. })
    }

    /// Build a parse error for a search result page.
    pub fn page_parse(page: u32, message: impl Into<String>) -> Self {
        ClientError::Parse {
            context: format!("page {page}"),
            message: message.into(),
        }
    }

    /// Build an IO error for `path`.
    pub fn io(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        ClientError::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// Short machine-friendly label, used for metrics and task summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientError::Auth { .. } => "auth",
            ClientError::Network { .. } => "network",
            ClientError::Transient { .. } => "transient",
            ClientError::Http { .. } => "http",
            ClientError::Parse { .. } => "parse",
            ClientError::Validation(_) => "validation",
            ClientError::NotAvailable { .. } => "not_available",
            ClientError::Integrity { .. } => "integrity",
            ClientError::Io { .. } => "io",
            ClientError::Cancelled => "cancelled",
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}
