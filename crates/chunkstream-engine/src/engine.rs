//! Entry point tying the pool, planner and prefetcher together.

use std::sync::Arc;

use chunkstream_common::{ByteWindow, FetchDescriptor, Result, StreamObject};
use tokio_util::sync::CancellationToken;

use crate::backend::ChunkFetcher;
use crate::config::EngineConfig;
use crate::planner;
use crate::pool::SessionPool;
use crate::prefetch::Prefetcher;

/// Process-wide streaming engine. Cheap to share behind an `Arc`.
pub struct StreamEngine {
    pool: Arc<SessionPool>,
    fetcher: Arc<dyn ChunkFetcher>,
    config: EngineConfig,
}

impl StreamEngine {
    pub fn new(
        pool: Arc<SessionPool>,
        fetcher: Arc<dyn ChunkFetcher>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            pool,
            fetcher,
            config,
        })
    }

    pub fn pool(&self) -> &Arc<SessionPool> {
        &self.pool
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Plan `window` over `object` and start prefetching it.
    pub fn open(
        &self,
        object: Arc<StreamObject>,
        window: ByteWindow,
        cancel: CancellationToken,
    ) -> Result<Prefetcher> {
        let plan = planner::plan(object.size, object.chunk_size, window.start, Some(window.end))?;
        Ok(self.prefetch(object, plan, cancel))
    }

    /// Start prefetching an already computed plan.
    pub fn prefetch(
        &self,
        object: Arc<StreamObject>,
        plan: Vec<FetchDescriptor>,
        cancel: CancellationToken,
    ) -> Prefetcher {
        Prefetcher::start(
            plan,
            object,
            Arc::clone(&self.pool),
            Arc::clone(&self.fetcher),
            &self.config,
            cancel,
        )
    }
}

impl std::fmt::Debug for StreamEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamEngine")
            .field("handles", &self.pool.len())
            .field("config", &self.config)
            .finish()
    }
}
