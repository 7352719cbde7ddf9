//! Chunkstream-Engine: ordered, concurrent chunk streaming.
//!
//! Turns a byte range of a remote object into an ordered sequence of chunk
//! reads executed through a small pool of rate-limited backend connections:
//!
//! - [`pool`]: the [`SessionPool`] of backend handles with cooldowns
//! - [`planner`]: maps a byte range onto the backend chunk grid
//! - [`reorder`]: puts out-of-order completions back in sequence
//! - [`prefetch`]: bounded concurrent fetching with backpressure
//! - [`backend`]: the capabilities the engine needs from a backend
//!
//! # Example
//!
//! ```rust,ignore
//! let pool = SessionPool::new(vec![HandleSpec::new("bot-1")])?;
//! let engine = StreamEngine::new(pool, fetcher, EngineConfig::default())?;
//! let mut chunks = engine.open(object, ByteWindow::new(0, 1023), CancellationToken::new())?;
//! while let Some(chunk) = chunks.next().await {
//!     let chunk = chunk?;
//!     // write chunk.bytes
//! }
//! ```

pub mod backend;
pub mod config;
pub mod engine;
pub mod planner;
pub mod pool;
pub mod prefetch;
pub mod reorder;

pub use backend::{ChunkFetcher, FetchError, ObjectResolver};
pub use config::EngineConfig;
pub use engine::StreamEngine;
pub use pool::{HandleSnapshot, HandleSpec, HandleState, Lease, SessionHandle, SessionPool};
pub use prefetch::Prefetcher;
pub use reorder::ReorderBuffer;
