//! Capabilities the engine consumes from the outside world.
//!
//! The messaging backend itself is opaque: the engine only needs a way to
//! turn a token into a [`StreamObject`] and a way to read part of one chunk
//! through a pooled [`SessionHandle`].

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chunkstream_common::{Error, FetchDescriptor, Result, StreamObject};

use crate::pool::SessionHandle;

/// Failure modes of a single chunk read.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    /// The backend throttled this handle; do not use it again before `retry_after`.
    #[error("rate limited, retry after {0:?}")]
    RateLimited(Duration),

    /// Anything else worth retrying on another handle.
    #[error("transient failure: {0}")]
    Transient(String),
}

impl From<FetchError> for Error {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::RateLimited(retry_after) => Error::RateLimited { retry_after },
            FetchError::Transient(message) => Error::transient(message),
        }
    }
}

/// Reads chunk data from the backend.
///
/// The returned bytes must start at `descriptor.offset_in_chunk`. Returning
/// more than `descriptor.length` bytes (for example the rest of the chunk) is
/// allowed; returning fewer is treated as a short read and retried.
#[async_trait]
pub trait ChunkFetcher: Send + Sync {
    async fn fetch(
        &self,
        handle: &SessionHandle,
        object: &StreamObject,
        descriptor: &FetchDescriptor,
    ) -> std::result::Result<Bytes, FetchError>;
}

/// Maps an opaque stream token to the object it names.
#[async_trait]
pub trait ObjectResolver: Send + Sync {
    /// Returns [`Error::NotFound`](chunkstream_common::Error::NotFound) for
    /// unknown tokens.
    async fn resolve(&self, token: &str) -> Result<StreamObject>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn fetch_errors_map_onto_common_errors() {
        assert_matches!(
            Error::from(FetchError::RateLimited(Duration::from_secs(5))),
            Error::RateLimited { retry_after } if retry_after == Duration::from_secs(5)
        );
        assert_matches!(
            Error::from(FetchError::Transient("reset".into())),
            Error::Transient(message) if message == "reset"
        );
    }
}
