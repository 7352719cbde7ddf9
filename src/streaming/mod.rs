//! HTTP range streaming.
//!
//! # Routes
//!
//! - `GET /{token}` - stream an object, honouring a single `Range`
//! - `HEAD /{token}` - response headers only, nothing is fetched
//! - `GET /stream/stats` - active and recent streams plus pool state
//! - `GET /stream/stats/{stream_id}` - one stream

mod range;
mod responder;
pub mod stats;

pub use range::{resolve_range_header, RangeSpec};
pub use responder::{stream_object, STREAM_ID_HEADER};
pub use stats::{start_cleanup_task, StreamRecord, StreamStats, StreamStatus};

use axum::{routing::get, Router};

use crate::server::AppContext;

/// Create the object streaming router.
pub fn stream_router() -> Router<AppContext> {
    // `get` also answers HEAD.
    Router::new().route("/:token", get(stream_object))
}
