//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`] which wires an in-memory [`MemoryBackend`], a
//! session pool and a full [`AppContext`]. The [`TestHarness::with_server`]
//! constructor starts Axum on a random port for socket-level testing.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use bytes::Bytes;
use http_body_util::BodyExt;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use chunkstream::config::Config;
use chunkstream::server::{create_router, AppContext};
use chunkstream::streaming::StreamStats;
use chunkstream_common::{Error, FetchDescriptor, Result, StreamObject};
use chunkstream_engine::{
    ChunkFetcher, EngineConfig, FetchError, HandleSpec, ObjectResolver, SessionHandle,
    SessionPool, StreamEngine,
};

/// Deterministic, non-repeating-per-chunk content.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Objects held in memory. Fetches return the rest of the chunk after the
/// requested offset, like a backend that only serves whole chunks.
#[derive(Default)]
pub struct MemoryBackend {
    objects: Mutex<HashMap<String, (StreamObject, Bytes)>>,
    failing: Mutex<HashSet<(String, u64)>>,
    fetch_delay: Mutex<Option<Duration>>,
    fetches: AtomicUsize,
}

impl MemoryBackend {
    pub fn insert(&self, token: &str, data: Vec<u8>, chunk_size: u64) -> StreamObject {
        let object = StreamObject::new(token, data.len() as u64, chunk_size).with_file_name(token);
        self.insert_object(object, data)
    }

    pub fn insert_object(&self, object: StreamObject, data: Vec<u8>) -> StreamObject {
        self.objects
            .lock()
            .insert(object.backend_id.clone(), (object.clone(), Bytes::from(data)));
        object
    }

    /// Every fetch of this chunk fails transiently.
    pub fn fail_chunk(&self, token: &str, chunk_index: u64) {
        self.failing.lock().insert((token.to_string(), chunk_index));
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        *self.fetch_delay.lock() = Some(delay);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectResolver for MemoryBackend {
    async fn resolve(&self, token: &str) -> Result<StreamObject> {
        self.objects
            .lock()
            .get(token)
            .map(|(object, _)| object.clone())
            .ok_or_else(|| Error::not_found(format!("stream token '{}'", token)))
    }
}

#[async_trait]
impl ChunkFetcher for MemoryBackend {
    async fn fetch(
        &self,
        _handle: &SessionHandle,
        object: &StreamObject,
        descriptor: &FetchDescriptor,
    ) -> std::result::Result<Bytes, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        let delay = *self.fetch_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self
            .failing
            .lock()
            .contains(&(object.backend_id.clone(), descriptor.chunk_index))
        {
            return Err(FetchError::Transient("injected failure".into()));
        }

        let data = self
            .objects
            .lock()
            .get(&object.backend_id)
            .map(|(_, data)| data.clone())
            .ok_or_else(|| FetchError::Transient("object vanished".into()))?;

        let chunk_start = descriptor.chunk_index * object.chunk_size;
        let start = (chunk_start + descriptor.offset_in_chunk) as usize;
        let end = ((chunk_start + object.chunk_size) as usize).min(data.len());
        Ok(data.slice(start..end))
    }
}

/// Test harness wrapping a fully-constructed [`AppContext`] backed by a
/// [`MemoryBackend`].
pub struct TestHarness {
    pub ctx: AppContext,
    pub backend: Arc<MemoryBackend>,
}

impl TestHarness {
    /// Two handles, window 4, two workers, one transient retry.
    pub fn new() -> Self {
        let config = EngineConfig::new(4, 2)
            .expect("valid engine config")
            .with_transient_retries(1)
            .with_rate_limit_budget(Duration::from_secs(5));
        Self::with_engine(config, 2)
    }

    pub fn with_engine(engine_config: EngineConfig, handles: usize) -> Self {
        let backend = Arc::new(MemoryBackend::default());
        let specs = (0..handles)
            .map(|i| HandleSpec::new(format!("handle-{}", i)))
            .collect();
        let pool = SessionPool::new(specs).expect("failed to create pool");
        let engine = StreamEngine::new(pool, backend.clone(), engine_config)
            .expect("failed to create engine");

        let ctx = AppContext {
            config: Arc::new(Config::default()),
            engine: Arc::new(engine),
            resolver: backend.clone(),
            stats: Arc::new(StreamStats::default()),
            shutdown: CancellationToken::new(),
        };

        Self { ctx, backend }
    }

    pub fn router(&self) -> Router {
        create_router(self.ctx.clone())
    }

    /// Send a GET, optionally with a `Range` header.
    pub async fn get(&self, uri: &str, range: Option<&str>) -> Response<Body> {
        let mut request = Request::get(uri);
        if let Some(range) = range {
            request = request.header("range", range);
        }
        self.router()
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    pub async fn head(&self, uri: &str, range: Option<&str>) -> Response<Body> {
        let mut request = Request::head(uri);
        if let Some(range) = range {
            request = request.header("range", range);
        }
        self.router()
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    /// Start an Axum server on a random port and return the harness together
    /// with the bound socket address.
    pub async fn with_server(self) -> (Self, SocketAddr) {
        let app = self.router();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .ok();
        });

        (self, addr)
    }
}

/// Collect a response body.
pub async fn body_bytes(body: Body) -> Bytes {
    body.collect().await.unwrap().to_bytes()
}

pub async fn body_json(body: Body) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(body).await).unwrap()
}

pub fn header<'a>(response: &'a Response<Body>, name: &str) -> &'a str {
    response
        .headers()
        .get(name)
        .unwrap_or_else(|| panic!("missing header {}", name))
        .to_str()
        .unwrap()
}
