//! Data model shared by the engine and the HTTP layer.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A remote file as resolved from a stream token.
///
/// Immutable once resolved; the chunk granularity is dictated by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamObject {
    /// Opaque identifier understood by the chunk fetcher.
    pub backend_id: String,
    /// Total size in bytes.
    pub size: u64,
    /// Bytes per backend chunk.
    pub chunk_size: u64,
    /// Media type, if the backend knows it.
    pub mime_type: Option<String>,
    /// Original file name, used for `Content-Disposition`.
    pub file_name: Option<String>,
    /// Backend endpoint that holds the object; used as the pool affinity hint.
    pub endpoint: Option<String>,
}

impl StreamObject {
    pub fn new(backend_id: impl Into<String>, size: u64, chunk_size: u64) -> Self {
        Self {
            backend_id: backend_id.into(),
            size,
            chunk_size,
            mime_type: None,
            file_name: None,
            endpoint: None,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}

/// An inclusive byte window `[start, end]` inside an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteWindow {
    pub start: u64,
    pub end: u64,
}

impl ByteWindow {
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    /// Number of bytes covered by the window.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// A window always covers at least one byte.
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl fmt::Display for ByteWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// A request for a sub-range of one backend chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchDescriptor {
    pub chunk_index: u64,
    pub offset_in_chunk: u64,
    pub length: u64,
}

impl FetchDescriptor {
    /// Absolute object offset of the first byte this descriptor covers.
    pub fn object_offset(&self, chunk_size: u64) -> u64 {
        self.chunk_index * chunk_size + self.offset_in_chunk
    }
}

/// The outcome of executing one [`FetchDescriptor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResult {
    pub chunk_index: u64,
    pub bytes: Bytes,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_window_len() {
        assert_eq!(ByteWindow::new(0, 0).len(), 1);
        assert_eq!(ByteWindow::new(2_000_000, 2_999_999).len(), 1_000_000);
        assert_eq!(ByteWindow::new(5, 9).to_string(), "5-9");
    }

    #[test]
    fn test_descriptor_object_offset() {
        let d = FetchDescriptor {
            chunk_index: 1,
            offset_in_chunk: 951_424,
            length: 97_152,
        };
        assert_eq!(d.object_offset(1_048_576), 2_000_000);
    }

    #[test]
    fn test_stream_object_builder() {
        let obj = StreamObject::new("file-1", 100, 10)
            .with_mime_type("video/mp4")
            .with_file_name("movie.mp4")
            .with_endpoint("dc4");
        assert_eq!(obj.mime_type.as_deref(), Some("video/mp4"));
        assert_eq!(obj.file_name.as_deref(), Some("movie.mp4"));
        assert_eq!(obj.endpoint.as_deref(), Some("dc4"));
    }
}
