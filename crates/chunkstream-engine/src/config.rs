//! Immutable engine configuration.
//!
//! Captured once at startup from the service config file and passed by value
//! into [`StreamEngine`](crate::StreamEngine); nothing in the engine reads
//! ambient settings after construction.

use std::time::Duration;

use chunkstream_common::{Error, Result};

/// Default number of chunks admitted but not yet emitted per stream.
pub const DEFAULT_WINDOW_SIZE: usize = 8;

/// Default number of concurrent chunk fetches per stream.
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Default retries for transient backend failures of a single chunk.
pub const DEFAULT_TRANSIENT_RETRIES: u32 = 3;

/// Default per-stream budget for rate-limit and pool-exhaustion waits.
pub const DEFAULT_RATE_LIMIT_BUDGET: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum descriptors in flight or waiting in the reorder buffer.
    pub window_size: usize,
    /// Maximum concurrent fetch operations.
    pub worker_count: usize,
    /// Retries of one descriptor after transient failures.
    pub transient_retries: u32,
    /// Total time one stream may spend waiting on cooldowns.
    pub rate_limit_budget: Duration,
}

impl EngineConfig {
    /// Build and validate a configuration.
    pub fn new(window_size: usize, worker_count: usize) -> Result<Self> {
        let config = Self {
            window_size,
            worker_count,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_transient_retries(mut self, retries: u32) -> Self {
        self.transient_retries = retries;
        self
    }

    pub fn with_rate_limit_budget(mut self, budget: Duration) -> Self {
        self.rate_limit_budget = budget;
        self
    }

    /// Check `window_size >= worker_count >= 1`.
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(Error::invalid_input("worker_count must be at least 1"));
        }
        if self.window_size < self.worker_count {
            return Err(Error::invalid_input(format!(
                "window_size ({}) must be >= worker_count ({})",
                self.window_size, self.worker_count
            )));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            worker_count: DEFAULT_WORKER_COUNT,
            transient_retries: DEFAULT_TRANSIENT_RETRIES,
            rate_limit_budget: DEFAULT_RATE_LIMIT_BUDGET,
        }
    }
}
