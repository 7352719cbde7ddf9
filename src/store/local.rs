//! Directory-backed object store.
//!
//! Every regular file directly under the media directory is an object; its
//! file name is the stream token. Objects are read in `chunk_size` chunks,
//! one positioned read per descriptor.
//!
//! An optional per-handle request quota makes the store behave like a
//! rate-limited remote backend: once a handle has used up its quota, fetches
//! through it fail with [`FetchError::RateLimited`] carrying the time until
//! the next request would be allowed.

use async_trait::async_trait;
use bytes::Bytes;
use chunkstream_common::{Error, FetchDescriptor, HandleId, Result, StreamObject};
use chunkstream_engine::{ChunkFetcher, FetchError, ObjectResolver, SessionHandle};
use dashmap::DashMap;
use governor::clock::{Clock, DefaultClock};
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::io::SeekFrom;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::guess_content_type;
use crate::config::StoreConfig;

/// A shared rate limiter instance.
pub type SharedLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

pub struct LocalStore {
    root: PathBuf,
    chunk_size: u64,
    endpoint: Option<String>,
    quota: Option<Quota>,
    limiters: DashMap<HandleId, SharedLimiter>,
    clock: DefaultClock,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>, chunk_size: u64) -> Self {
        Self {
            root: root.into(),
            chunk_size,
            endpoint: None,
            quota: None,
            limiters: DashMap::new(),
            clock: DefaultClock::default(),
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        let mut store = Self::new(config.media_dir.clone(), config.chunk_size);
        if let Some(rps) = config.requests_per_second.and_then(NonZeroU32::new) {
            store = store.with_requests_per_second(rps);
        }
        if let Some(endpoint) = &config.endpoint {
            store = store.with_endpoint(endpoint.clone());
        }
        store
    }

    /// Limit every handle to `rps` fetches per second.
    pub fn with_requests_per_second(mut self, rps: NonZeroU32) -> Self {
        self.quota = Some(Quota::per_second(rps));
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn limiter_for(&self, handle: HandleId) -> Option<SharedLimiter> {
        let quota = self.quota?;
        let limiter = self
            .limiters
            .entry(handle)
            .or_insert_with(|| Arc::new(RateLimiter::direct(quota)));
        Some(Arc::clone(limiter.value()))
    }

    /// Map a token onto a file path, rejecting anything that could escape
    /// the media directory.
    fn object_path(&self, token: &str) -> Option<PathBuf> {
        let valid = !token.is_empty()
            && !token.starts_with('.')
            && !token.contains(['/', '\\', '\0']);
        valid.then(|| self.root.join(token))
    }
}

#[async_trait]
impl ObjectResolver for LocalStore {
    async fn resolve(&self, token: &str) -> Result<StreamObject> {
        let path = self
            .object_path(token)
            .ok_or_else(|| Error::not_found(format!("stream token '{}'", token)))?;

        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|_| Error::not_found(format!("stream token '{}'", token)))?;
        if !metadata.is_file() {
            return Err(Error::not_found(format!("stream token '{}'", token)));
        }

        let mut object = StreamObject::new(token, metadata.len(), self.chunk_size)
            .with_file_name(token)
            .with_mime_type(guess_content_type(token));
        if let Some(endpoint) = &self.endpoint {
            object = object.with_endpoint(endpoint.clone());
        }

        tracing::debug!(token, size = object.size, "Resolved local object");
        Ok(object)
    }
}

#[async_trait]
impl ChunkFetcher for LocalStore {
    async fn fetch(
        &self,
        handle: &SessionHandle,
        object: &StreamObject,
        descriptor: &FetchDescriptor,
    ) -> std::result::Result<Bytes, FetchError> {
        if let Some(limiter) = self.limiter_for(handle.id) {
            if let Err(not_until) = limiter.check() {
                let wait = not_until.wait_time_from(self.clock.now());
                tracing::debug!(
                    handle = %handle.id,
                    wait_ms = wait.as_millis() as u64,
                    "Handle over quota"
                );
                return Err(FetchError::RateLimited(wait));
            }
        }

        let path = self
            .object_path(&object.backend_id)
            .ok_or_else(|| FetchError::Transient(format!("invalid object id '{}'", object.backend_id)))?;
        let offset = descriptor.object_offset(object.chunk_size);

        let mut file = File::open(&path)
            .await
            .map_err(|e| FetchError::Transient(format!("open {:?}: {}", path, e)))?;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| FetchError::Transient(format!("seek to {}: {}", offset, e)))?;

        let mut buf = Vec::with_capacity(descriptor.length as usize);
        file.take(descriptor.length)
            .read_to_end(&mut buf)
            .await
            .map_err(|e| FetchError::Transient(format!("read at {}: {}", offset, e)))?;

        Ok(Bytes::from(buf))
    }
}
