use crate::config::Config;
use crate::store::LocalStore;
use crate::streaming::{self, start_cleanup_task, StreamStats};
use anyhow::{Context, Result};
use axum::{
    http::{header, Method, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use chunkstream_engine::{ObjectResolver, SessionPool, StreamEngine};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

mod error;
pub mod routes_stats;

pub use error::AppError;

/// Shared application context
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    /// Pool, planner and prefetcher behind one handle
    pub engine: Arc<StreamEngine>,
    /// Maps stream tokens to objects
    pub resolver: Arc<dyn ObjectResolver>,
    /// Per-stream statistics
    pub stats: Arc<StreamStats>,
    /// Cancelled on shutdown; every stream holds a child token
    pub shutdown: CancellationToken,
}

impl AppContext {
    /// Build a context backed by the local directory store.
    pub fn from_config(config: Config) -> Result<Self> {
        let engine_config = config
            .engine
            .to_engine_config()
            .context("Invalid engine settings")?;
        let pool = SessionPool::new(config.sessions.clone()).context("Invalid session list")?;
        let store = Arc::new(LocalStore::from_config(&config.store));
        let engine = StreamEngine::new(pool, store.clone(), engine_config)
            .context("Failed to create stream engine")?;

        Ok(Self {
            stats: Arc::new(StreamStats::new(
                Duration::from_secs(config.stats.retain_finished_secs),
                config.stats.recent_capacity,
            )),
            config: Arc::new(config),
            engine: Arc::new(engine),
            resolver: store,
            shutdown: CancellationToken::new(),
        })
    }
}

/// Create the Axum router with all routes
pub fn create_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::HEAD])
        .allow_headers([header::RANGE])
        .expose_headers([
            header::CONTENT_RANGE,
            header::CONTENT_LENGTH,
            header::ACCEPT_RANGES,
        ]);

    Router::new()
        // Health check
        .route("/health", get(health_check))
        .merge(routes_stats::stats_routes())
        .merge(streaming::stream_router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

/// Start the HTTP server
pub async fn start_server(config: Config) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    let cleanup_interval = config.stats.cleanup_interval_secs;
    let ctx = AppContext::from_config(config)?;

    tracing::info!(
        handles = ctx.engine.pool().len(),
        window = ctx.engine.config().window_size,
        workers = ctx.engine.config().worker_count,
        media_dir = ?ctx.config.store.media_dir,
        "Stream engine ready"
    );

    let cleanup = start_cleanup_task(Arc::clone(&ctx.stats), cleanup_interval);
    let shutdown = ctx.shutdown.clone();
    let app = create_router(ctx);

    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown))
    .await?;

    cleanup.abort();
    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, cancelling active streams");
    // Open bodies would otherwise keep graceful shutdown waiting.
    shutdown.cancel();
}
