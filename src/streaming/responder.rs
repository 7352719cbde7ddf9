//! Range responder.
//!
//! Serves `GET`/`HEAD /:token`. A request moves through
//! `ParsingRange -> Planning -> Streaming -> Completed | Aborted`:
//!
//! - the token is resolved and the `Range` header turned into a byte window
//!   (416 for anything unsatisfiable)
//! - the window is planned onto the backend chunk grid and prefetching starts
//! - the first chunk is awaited before the status line is committed, so a
//!   backend that is down from the start yields a 502
//! - remaining chunks are written in order; a failure after that point can
//!   only end the body early
//!
//! The body stream owns the prefetcher and a [`StreamGuard`]. When the client
//! goes away hyper drops the body, which aborts the workers and records the
//! stream as cancelled.

use axum::{
    body::Body,
    extract::{ConnectInfo, Path, State},
    http::{header, response::Builder, HeaderMap, Method, StatusCode},
    response::Response,
};
use bytes::Bytes;
use chunkstream_common::{ByteWindow, Error, FetchDescriptor, Result, StreamId, StreamObject};
use std::net::SocketAddr;
use std::sync::Arc;

use super::range::resolve_range_header;
use super::stats::{StreamStats, StreamStatus};
use crate::server::{AppContext, AppError};
use crate::store::guess_content_type;

/// Response header carrying the stream id used by the stats endpoints.
pub const STREAM_ID_HEADER: &str = "x-stream-id";

const CACHE_CONTROL_VALUE: &str = "public, max-age=3600, immutable";

/// Stream an object, honouring a single byte range.
///
/// Error bodies carry the stream id as `request_id`, matching the
/// `X-Stream-Id` header a successful response would have had.
pub async fn stream_object(
    State(ctx): State<AppContext>,
    Path(token): Path<String>,
    method: Method,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
) -> std::result::Result<Response, AppError> {
    let stream_id = StreamId::new();
    let peer = peer.map(|ConnectInfo(addr)| addr);
    serve_stream(ctx, token, method, headers, peer, stream_id)
        .await
        .map_err(|e| AppError::from(e).with_request_id(stream_id.to_string()))
}

async fn serve_stream(
    ctx: AppContext,
    token: String,
    method: Method,
    headers: HeaderMap,
    peer: Option<SocketAddr>,
    stream_id: StreamId,
) -> Result<Response> {
    let object = Arc::new(ctx.resolver.resolve(&token).await?);

    // A header that is not valid ASCII cannot be a byte range.
    let range_header = headers
        .get(header::RANGE)
        .map(|value| value.to_str().unwrap_or_default());
    let requested = resolve_range_header(range_header, object.size)?;
    let partial = requested.is_some();
    let window = requested.or_else(|| full_window(object.size));

    let builder = response_head(&object, window, partial, stream_id);

    if method == Method::HEAD {
        return finish_response(builder, Body::empty());
    }
    let Some(window) = window else {
        return finish_response(builder, Body::empty());
    };

    let cancel = ctx.shutdown.child_token();
    let mut prefetcher = ctx.engine.open(Arc::clone(&object), window, cancel)?;
    let plan: Vec<FetchDescriptor> = prefetcher.plan().to_vec();
    tracing::debug!(
        stream_id = %stream_id,
        token = %token,
        range = %window,
        chunks = plan.len(),
        "Planned stream"
    );

    let requester = requester_identity(&headers, peer);
    ctx.stats.begin(
        stream_id,
        token.as_str(),
        requester,
        object.endpoint.clone(),
        window,
        object.size,
    );
    let mut guard = StreamGuard::new(stream_id, Arc::clone(&ctx.stats));

    let first = match prefetcher.next().await {
        Some(Ok(chunk)) => trim_to_descriptor(chunk.bytes, &plan[0]),
        Some(Err(e)) => {
            guard.fail(&e);
            prefetcher.shutdown().await;
            return Err(e);
        }
        None => {
            let e = Error::internal("plan produced no chunks");
            guard.fail(&e);
            return Err(e);
        }
    };
    guard.record(first.len());

    let body = async_stream::stream! {
        let mut guard = guard;
        let mut prefetcher = prefetcher;
        let mut emitted = 1;

        yield Ok::<Bytes, std::io::Error>(first);

        loop {
            match prefetcher.next().await {
                None => {
                    guard.complete();
                    break;
                }
                Some(Ok(chunk)) => {
                    let bytes = trim_to_descriptor(chunk.bytes, &plan[emitted]);
                    emitted += 1;
                    guard.record(bytes.len());
                    yield Ok(bytes);
                }
                Some(Err(e)) => {
                    guard.fail(&e);
                    yield Err(std::io::Error::other(e));
                    break;
                }
            }
        }
    };

    finish_response(builder, Body::from_stream(body))
}

fn full_window(object_size: u64) -> Option<ByteWindow> {
    (object_size > 0).then(|| ByteWindow::new(0, object_size - 1))
}

fn response_head(
    object: &StreamObject,
    window: Option<ByteWindow>,
    partial: bool,
    stream_id: StreamId,
) -> Builder {
    let content_length = window.map_or(0, |w| w.len());
    let status = if partial {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type(object))
        .header(header::CONTENT_LENGTH, content_length.to_string())
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CACHE_CONTROL, CACHE_CONTROL_VALUE)
        .header(STREAM_ID_HEADER, stream_id.to_string());

    if let (true, Some(window)) = (partial, window) {
        builder = builder.header(
            header::CONTENT_RANGE,
            format!("bytes {}-{}/{}", window.start, window.end, object.size),
        );
    }

    if let Some(name) = &object.file_name {
        builder = builder.header(
            header::CONTENT_DISPOSITION,
            format!("inline; filename=\"{}\"", sanitize_file_name(name)),
        );
    }

    builder
}

fn finish_response(builder: Builder, body: Body) -> Result<Response> {
    builder
        .body(body)
        .map_err(|e| Error::internal(format!("failed to build response: {}", e)))
}

fn content_type(object: &StreamObject) -> String {
    object
        .mime_type
        .clone()
        .or_else(|| object.file_name.as_deref().map(|n| guess_content_type(n).to_string()))
        .unwrap_or_else(|| "application/octet-stream".to_string())
}

/// Keep header-safe ASCII only; quotes and backslashes would break the
/// quoted-string.
fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if (c.is_ascii_graphic() || c == ' ') && c != '"' && c != '\\' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Fetchers may return the rest of the chunk; only the planned bytes go out.
fn trim_to_descriptor(bytes: Bytes, descriptor: &FetchDescriptor) -> Bytes {
    let length = descriptor.length as usize;
    if bytes.len() > length {
        bytes.slice(..length)
    } else {
        bytes
    }
}

fn requester_identity(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Records the outcome of one stream in the stats registry.
///
/// Dropped without [`complete`](Self::complete) or [`fail`](Self::fail)
/// means the client went away mid-body.
struct StreamGuard {
    id: StreamId,
    stats: Arc<StreamStats>,
    ended: bool,
}

impl StreamGuard {
    fn new(id: StreamId, stats: Arc<StreamStats>) -> Self {
        Self {
            id,
            stats,
            ended: false,
        }
    }

    fn record(&self, bytes: usize) {
        self.stats.record_bytes(self.id, bytes as u64);
    }

    fn complete(&mut self) {
        self.ended = true;
        self.stats.finish(self.id, StreamStatus::Finished, None);
    }

    fn fail(&mut self, error: &Error) {
        self.ended = true;
        match error {
            Error::ClientDisconnected => {
                self.stats.finish(self.id, StreamStatus::Cancelled, None);
            }
            other => {
                tracing::warn!(stream_id = %self.id, error = %other, "Stream aborted");
                self.stats
                    .finish(self.id, StreamStatus::Error, Some(other.to_string()));
            }
        }
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if !self.ended {
            tracing::debug!(stream_id = %self.id, "Client disconnected");
            self.stats.finish(self.id, StreamStatus::Cancelled, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_trim_to_descriptor() {
        let descriptor = FetchDescriptor {
            chunk_index: 0,
            offset_in_chunk: 0,
            length: 3,
        };
        let trimmed = trim_to_descriptor(Bytes::from_static(b"abcdef"), &descriptor);
        assert_eq!(&trimmed[..], b"abc");

        let short = trim_to_descriptor(Bytes::from_static(b"ab"), &descriptor);
        assert_eq!(&short[..], b"ab");
    }

    #[test]
    fn test_full_window() {
        assert_eq!(full_window(0), None);
        assert_eq!(full_window(10), Some(ByteWindow::new(0, 9)));
    }

    #[test]
    fn test_requester_identity_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        let peer: SocketAddr = "10.0.0.9:5000".parse().unwrap();
        assert_eq!(requester_identity(&headers, Some(peer)), "10.0.0.9");
        assert_eq!(requester_identity(&headers, None), "unknown");

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(requester_identity(&headers, Some(peer)), "203.0.113.7");
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("My \"Movie\".mkv"), "My _Movie_.mkv");
        assert_eq!(sanitize_file_name("café.mp4"), "caf_.mp4");
    }

    #[test]
    fn test_content_type_fallbacks() {
        let object = StreamObject::new("x", 10, 4);
        assert_eq!(content_type(&object), "application/octet-stream");

        let named = object.clone().with_file_name("clip.webm");
        assert_eq!(content_type(&named), "video/webm");

        let typed = named.with_mime_type("video/custom");
        assert_eq!(content_type(&typed), "video/custom");
    }

    #[test]
    fn test_response_head_partial() {
        let object = StreamObject::new("x", 10_000_000, 1_048_576).with_file_name("a.mkv");
        let window = ByteWindow::new(2_000_000, 2_999_999);
        let response = response_head(&object, Some(window), true, StreamId::new())
            .body(Body::empty())
            .unwrap();

        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_LENGTH], "1000000");
        assert_eq!(
            headers[header::CONTENT_RANGE],
            "bytes 2000000-2999999/10000000"
        );
        assert_eq!(headers[header::CONTENT_DISPOSITION], "inline; filename=\"a.mkv\"");
        assert!(headers.contains_key(STREAM_ID_HEADER));
    }

    #[test]
    fn test_guard_drop_records_cancelled() {
        let stats = Arc::new(StreamStats::default());
        let id = StreamId::new();
        stats.begin(id, "t", "r", None, ByteWindow::new(0, 9), 10);

        let guard = StreamGuard::new(id, Arc::clone(&stats));
        guard.record(4);
        drop(guard);

        let record = stats.get(id).unwrap();
        assert_eq!(record.status, StreamStatus::Cancelled);
        assert_eq!(record.bytes_served, 4);
    }
}
