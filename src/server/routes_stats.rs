use crate::server::{AppContext, AppError};
use crate::streaming::StreamRecord;
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chunkstream_common::{Error, StreamId};
use chunkstream_engine::HandleSnapshot;
use serde::Serialize;
use std::collections::BTreeMap;

pub fn stats_routes() -> Router<AppContext> {
    Router::new()
        .route("/stream/stats", get(all_stats))
        .route("/stream/stats/:id", get(stream_stats))
}

#[derive(Serialize)]
struct StatsResponse {
    active_streams: BTreeMap<String, StreamRecord>,
    recent_streams: Vec<StreamRecord>,
    healthy_handles: usize,
    pool: Vec<HandleSnapshot>,
}

async fn all_stats(State(ctx): State<AppContext>) -> impl IntoResponse {
    let active_streams = ctx
        .stats
        .active()
        .into_iter()
        .map(|record| (record.id.to_string(), record))
        .collect();

    Json(StatsResponse {
        active_streams,
        recent_streams: ctx.stats.recent(),
        healthy_handles: ctx.engine.pool().healthy_count(),
        pool: ctx.engine.pool().snapshot(),
    })
}

async fn stream_stats(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<StreamRecord>, AppError> {
    let id: StreamId = id
        .parse()
        .map_err(|_| Error::invalid_input(format!("invalid stream id '{}'", id)))?;

    ctx.stats
        .get(id)
        .map(Json)
        .ok_or_else(|| Error::not_found(format!("stream {}", id)).into())
}
