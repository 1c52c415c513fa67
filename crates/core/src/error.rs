//! Error types for respath
//!
//! Every failure surfaced by a backend is one of these variants. Transient
//! transport failures are absorbed by the retry engine up to its budget;
//! everything else propagates to the caller unchanged.

use thiserror::Error;

/// Result alias used throughout the respath crates
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by URI dispatch and backend operations
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed URI or a scheme no backend is registered for
    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    /// Local credential setup is inconsistent or unreadable
    #[error("Authentication configuration error: {0}")]
    AuthConfiguration(String),

    /// No connection became available within the acquisition timeout
    #[error("Connection pool exhausted for {authority} after {waited_ms}ms")]
    PoolExhausted { authority: String, waited_ms: u64 },

    /// Network reset, timeout, server error or throttling
    #[error("Transient transport error: {message}")]
    TransientTransport {
        message: String,
        status: Option<u16>,
    },

    /// The server rejected the request and retrying will not help
    #[error("Request for {url} failed with status {status}: {message}")]
    PermanentRequest {
        status: u16,
        url: String,
        message: String,
    },

    /// Retry budget spent; wraps the last transient failure
    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<Error>,
    },

    /// Destination exists and overwrite was not requested
    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    /// The backend does not implement this capability
    #[error("Operation not supported: {0}")]
    Unsupported(String),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Transient failure without an HTTP status (reset, timeout, refused)
    pub fn transient(message: impl Into<String>) -> Self {
        Error::TransientTransport {
            message: message.into(),
            status: None,
        }
    }

    /// Transient failure signalled by a server status code
    pub fn transient_status(status: u16, url: &str) -> Self {
        Error::TransientTransport {
            message: format!("{url} answered with status {status}"),
            status: Some(status),
        }
    }

    /// Permanent rejection for `url`
    pub fn permanent(status: u16, url: impl Into<String>, message: impl Into<String>) -> Self {
        Error::PermanentRequest {
            status,
            url: url.into(),
            message: message.into(),
        }
    }

    /// True when the error means the resource does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::PermanentRequest { status, .. } => *status == 404 || *status == 410,
            Error::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::PermanentRequest { status, .. } => Some(*status),
            Error::TransientTransport { status, .. } => *status,
            Error::RetriesExhausted { last, .. } => last.status(),
            _ => None,
        }
    }
}
