//! Common error type used throughout chunkstream.
//!
//! Every failure a stream can run into is one variant of [`Error`]. Backend
//! local conditions (rate limits, pool exhaustion, transient I/O) are normally
//! absorbed by the prefetch engine; the rest map 1:1 onto HTTP status codes
//! through [`Error::http_status`].

use std::time::Duration;

/// Common error type for chunkstream.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The stream token or backend object is unknown.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The requested byte range cannot be served for this object.
    #[error("Range not satisfiable for object of {object_size} bytes")]
    RangeNotSatisfiable {
        /// Total size of the object, echoed back in `Content-Range: bytes */size`.
        object_size: u64,
    },

    /// The backend asked us to slow down on one handle.
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// Every handle in the session pool is cooling down.
    #[error("Session pool exhausted, retry after {retry_after:?}")]
    PoolExhausted { retry_after: Duration },

    /// A recoverable backend failure (timeout, reset, short read).
    #[error("Transient backend error: {0}")]
    Transient(String),

    /// Retries or the rate-limit wait budget are exhausted.
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The HTTP client went away; not a failure, only a cancellation path.
    #[error("Client disconnected")]
    ClientDisconnected,

    /// Invalid input was provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new NotFound error.
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a new RangeNotSatisfiable error.
    pub fn range_not_satisfiable(object_size: u64) -> Self {
        Self::RangeNotSatisfiable { object_size }
    }

    /// Create a new Transient error.
    pub fn transient<S: Into<String>>(msg: S) -> Self {
        Self::Transient(msg.into())
    }

    /// Create a new BackendUnavailable error.
    pub fn backend_unavailable<S: Into<String>>(msg: S) -> Self {
        Self::BackendUnavailable(msg.into())
    }

    /// Create a new InvalidInput error.
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a new Internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// HTTP status code this error surfaces as.
    ///
    /// `ClientDisconnected` has no response at all; 499 is only used for
    /// logging.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::RangeNotSatisfiable { .. } => 416,
            Self::RateLimited { .. } | Self::PoolExhausted { .. } => 503,
            Self::Transient(_) | Self::BackendUnavailable(_) => 502,
            Self::ClientDisconnected => 499,
            Self::InvalidInput(_) => 400,
            Self::Internal(_) => 500,
        }
    }

    /// Short machine-readable code used in JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::RangeNotSatisfiable { .. } => "range_not_satisfiable",
            Self::RateLimited { .. } => "rate_limited",
            Self::PoolExhausted { .. } => "pool_exhausted",
            Self::Transient(_) => "transient_error",
            Self::BackendUnavailable(_) => "backend_unavailable",
            Self::ClientDisconnected => "client_disconnected",
            Self::InvalidInput(_) => "invalid_input",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Whether the engine may retry the operation that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::PoolExhausted { .. } | Self::Transient(_)
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Transient(e.to_string())
    }
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;
