use chunkstream_engine::{config as engine_defaults, EngineConfig, HandleSpec};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub engine: EngineSettings,

    /// Backend handles making up the session pool.
    #[serde(default = "default_sessions")]
    pub sessions: Vec<HandleSpec>,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub stats: StatsConfig,
}

fn default_sessions() -> Vec<HandleSpec> {
    vec![HandleSpec::new("local")]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            engine: EngineSettings::default(),
            sessions: default_sessions(),
            store: StoreConfig::default(),
            stats: StatsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineSettings {
    /// Maximum descriptors in flight or buffered per stream.
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Concurrent fetch tasks per stream.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    #[serde(default = "default_transient_retries")]
    pub transient_retries: u32,

    /// Total time a stream may spend waiting out rate limits.
    #[serde(default = "default_rate_limit_budget_secs")]
    pub rate_limit_budget_secs: u64,
}

fn default_window_size() -> usize {
    engine_defaults::DEFAULT_WINDOW_SIZE
}
fn default_worker_count() -> usize {
    engine_defaults::DEFAULT_WORKER_COUNT
}
fn default_transient_retries() -> u32 {
    engine_defaults::DEFAULT_TRANSIENT_RETRIES
}
fn default_rate_limit_budget_secs() -> u64 {
    engine_defaults::DEFAULT_RATE_LIMIT_BUDGET.as_secs()
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            worker_count: default_worker_count(),
            transient_retries: default_transient_retries(),
            rate_limit_budget_secs: default_rate_limit_budget_secs(),
        }
    }
}

impl EngineSettings {
    pub fn to_engine_config(&self) -> chunkstream_common::Result<EngineConfig> {
        Ok(EngineConfig::new(self.window_size, self.worker_count)?
            .with_transient_retries(self.transient_retries)
            .with_rate_limit_budget(Duration::from_secs(self.rate_limit_budget_secs)))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    /// Directory whose files are served; the file name is the stream token.
    #[serde(default = "default_media_dir")]
    pub media_dir: PathBuf,

    /// Backend chunk size in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Per-handle request quota. Unset means unlimited.
    #[serde(default)]
    pub requests_per_second: Option<u32>,

    /// Endpoint objects from this store live on, used for handle affinity.
    #[serde(default)]
    pub endpoint: Option<String>,
}

fn default_media_dir() -> PathBuf {
    PathBuf::from("./media")
}
fn default_chunk_size() -> u64 {
    1024 * 1024
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            media_dir: default_media_dir(),
            chunk_size: default_chunk_size(),
            requests_per_second: None,
            endpoint: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StatsConfig {
    /// Seconds a finished stream stays in the active map before it moves
    /// to the recent list.
    #[serde(default = "default_retain_finished_secs")]
    pub retain_finished_secs: u64,

    /// Upper bound on the recent list.
    #[serde(default = "default_recent_capacity")]
    pub recent_capacity: usize,

    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

fn default_retain_finished_secs() -> u64 {
    3
}
fn default_recent_capacity() -> usize {
    100
}
fn default_cleanup_interval_secs() -> u64 {
    1
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            retain_finished_secs: default_retain_finished_secs(),
            recent_capacity: default_recent_capacity(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}
