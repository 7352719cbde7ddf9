//! Integration tests for the range streaming route.

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use chunkstream_common::StreamObject;
use chunkstream_engine::EngineConfig;
use common::{body_bytes, body_json, header, pattern, TestHarness};
use http_body_util::BodyExt;

const MIB: u64 = 1_048_576;

#[tokio::test]
async fn full_request_returns_whole_object() {
    let h = TestHarness::new();
    let data = pattern(10_000);
    h.backend.insert("movie.mkv", data.clone(), 1024);

    let resp = h.get("/movie.mkv", None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(header(&resp, "content-length"), "10000");
    assert_eq!(header(&resp, "accept-ranges"), "bytes");
    assert_eq!(header(&resp, "content-type"), "video/x-matroska");
    assert_eq!(
        header(&resp, "cache-control"),
        "public, max-age=3600, immutable"
    );
    assert_eq!(
        header(&resp, "content-disposition"),
        "inline; filename=\"movie.mkv\""
    );
    assert!(resp.headers().get("content-range").is_none());

    let body = body_bytes(resp.into_body()).await;
    assert_eq!(&body[..], &data[..]);
}

#[tokio::test]
async fn mid_object_range_spanning_chunks() {
    let h = TestHarness::new();
    let data = pattern(10_000_000);
    h.backend.insert("big.bin", data.clone(), MIB);

    let resp = h.get("/big.bin", Some("bytes=2000000-2999999")).await;
    assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        header(&resp, "content-range"),
        "bytes 2000000-2999999/10000000"
    );
    assert_eq!(header(&resp, "content-length"), "1000000");

    let body = body_bytes(resp.into_body()).await;
    assert_eq!(body.len(), 1_000_000);
    assert_eq!(&body[..], &data[2_000_000..3_000_000]);
    // Chunk 1 from offset 951424, chunk 2 up to 902848 bytes.
    assert_eq!(h.backend.fetch_count(), 2);
}

#[tokio::test]
async fn open_ended_range_runs_to_end() {
    let h = TestHarness::new();
    let data = pattern(5000);
    h.backend.insert("a.bin", data.clone(), 1000);

    let resp = h.get("/a.bin", Some("bytes=1234-")).await;
    assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(header(&resp, "content-range"), "bytes 1234-4999/5000");

    let body = body_bytes(resp.into_body()).await;
    assert_eq!(&body[..], &data[1234..]);
}

#[tokio::test]
async fn suffix_range_serves_tail() {
    let h = TestHarness::new();
    let data = pattern(5000);
    h.backend.insert("a.bin", data.clone(), 1000);

    let resp = h.get("/a.bin", Some("bytes=-1500")).await;
    assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(header(&resp, "content-range"), "bytes 3500-4999/5000");

    let body = body_bytes(resp.into_body()).await;
    assert_eq!(&body[..], &data[3500..]);
}

#[tokio::test]
async fn range_end_is_clamped_to_last_byte() {
    let h = TestHarness::new();
    let data = pattern(1000);
    h.backend.insert("a.bin", data.clone(), 256);

    let resp = h.get("/a.bin", Some("bytes=999-5000")).await;
    assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(header(&resp, "content-range"), "bytes 999-999/1000");
    assert_eq!(header(&resp, "content-length"), "1");

    let body = body_bytes(resp.into_body()).await;
    assert_eq!(&body[..], &data[999..]);
}

#[tokio::test]
async fn range_starting_at_size_is_not_satisfiable() {
    let h = TestHarness::new();
    h.backend.insert("a.bin", pattern(1000), 256);

    let resp = h.get("/a.bin", Some("bytes=1000-")).await;
    assert_eq!(resp.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(header(&resp, "content-range"), "bytes */1000");
    assert_eq!(h.backend.fetch_count(), 0);

    let json = body_json(resp.into_body()).await;
    assert_eq!(json["code"], "range_not_satisfiable");
}

#[tokio::test]
async fn malformed_range_is_not_satisfiable() {
    let h = TestHarness::new();
    h.backend.insert("a.bin", pattern(1000), 256);

    for range in [
        "bytes=abc-",
        "bytes=0-1,4-5",
        "lines=0-10",
        "bytes=-0",
        "bytes=+10-20",
        "bytes=+10-+20",
        "bytes=-+5",
    ] {
        let resp = h.get("/a.bin", Some(range)).await;
        assert_eq!(resp.status(), StatusCode::RANGE_NOT_SATISFIABLE, "{}", range);
        assert_eq!(header(&resp, "content-range"), "bytes */1000");
    }
}

#[tokio::test]
async fn unknown_token_is_not_found() {
    let h = TestHarness::new();

    let resp = h.get("/nope", None).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let json = body_json(resp.into_body()).await;
    assert_eq!(json["code"], "not_found");
    assert_eq!(json["retryable"], false);
    let request_id = json["request_id"].as_str().unwrap();
    assert!(request_id.parse::<chunkstream_common::StreamId>().is_ok());
}

#[tokio::test]
async fn empty_object_full_request_is_empty_200() {
    let h = TestHarness::new();
    h.backend.insert("empty.bin", Vec::new(), 256);

    let resp = h.get("/empty.bin", None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(header(&resp, "content-length"), "0");
    assert!(body_bytes(resp.into_body()).await.is_empty());

    let resp = h.get("/empty.bin", Some("bytes=0-")).await;
    assert_eq!(resp.status(), StatusCode::RANGE_NOT_SATISFIABLE);
}

#[tokio::test]
async fn head_returns_headers_without_fetching() {
    let h = TestHarness::new();
    h.backend.insert("a.bin", pattern(5000), 1000);

    let resp = h.head("/a.bin", Some("bytes=100-199")).await;
    assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(header(&resp, "content-range"), "bytes 100-199/5000");
    assert_eq!(header(&resp, "content-length"), "100");

    assert!(body_bytes(resp.into_body()).await.is_empty());
    assert_eq!(h.backend.fetch_count(), 0);
    assert!(h.ctx.stats.is_empty());
}

#[tokio::test]
async fn first_chunk_failure_is_bad_gateway() {
    let h = TestHarness::new();
    h.backend.insert("a.bin", pattern(5000), 1000);
    h.backend.fail_chunk("a.bin", 0);

    let resp = h.get("/a.bin", None).await;
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

    let json = body_json(resp.into_body()).await;
    assert_eq!(json["code"], "backend_unavailable");

    let active = h.ctx.stats.active();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].status, chunkstream::streaming::StreamStatus::Error);
    assert_eq!(json["request_id"], active[0].id.to_string());
    assert_eq!(h.ctx.engine.pool().outstanding_leases(), 0);
}

#[tokio::test]
async fn later_chunk_failure_truncates_body() {
    let config = EngineConfig::new(2, 1).unwrap().with_transient_retries(1);
    let h = TestHarness::with_engine(config, 2);
    h.backend.insert("a.bin", pattern(10_000), 1000);
    h.backend.fail_chunk("a.bin", 8);

    let resp = h.get("/a.bin", None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let stream_id = header(&resp, "x-stream-id").to_string();

    assert!(resp.into_body().collect().await.is_err());

    let record = h.ctx.stats.get(stream_id.parse().unwrap()).unwrap();
    assert_eq!(record.status, chunkstream::streaming::StreamStatus::Error);
    assert_eq!(record.bytes_served, 8000);
    assert!(record.error.unwrap().contains("chunk 8"));
}

#[tokio::test]
async fn completed_stream_is_recorded() {
    let h = TestHarness::new();
    h.backend.insert_object(
        StreamObject::new("a.bin", 4096, 1024).with_endpoint("dc4"),
        pattern(4096),
    );

    let request = axum::http::Request::get("/a.bin")
        .header("range", "bytes=0-2047")
        .header("x-forwarded-for", "198.51.100.4")
        .body(axum::body::Body::empty())
        .unwrap();
    let resp = tower::ServiceExt::oneshot(h.router(), request).await.unwrap();
    let stream_id = header(&resp, "x-stream-id").to_string();
    body_bytes(resp.into_body()).await;

    let resp = h.get(&format!("/stream/stats/{}", stream_id), None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp.into_body()).await;
    assert_eq!(json["status"], "finished");
    assert_eq!(json["bytes_served"], 2048);
    assert_eq!(json["requester"], "198.51.100.4");
    assert_eq!(json["range"], "0-2047");
    assert_eq!(json["token"], "a.bin");
    assert_eq!(json["endpoint"], "dc4");

    let resp = h.get("/stream/stats", None).await;
    let json = body_json(resp.into_body()).await;
    assert_eq!(json["active_streams"][&stream_id]["status"], "finished");
    assert!(json["recent_streams"].as_array().unwrap().is_empty());
    assert_eq!(json["pool"].as_array().unwrap().len(), 2);
    assert_eq!(json["healthy_handles"], 2);
    assert_eq!(json["pool"][0]["state"], "idle");
}

#[tokio::test]
async fn stats_lookup_errors() {
    let h = TestHarness::new();

    let resp = h.get("/stream/stats/not-a-uuid", None).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = h
        .get("/stream/stats/00000000-0000-0000-0000-000000000000", None)
        .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_check() {
    let h = TestHarness::new();
    let resp = h.get("/health", None).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn server_shutdown_cancels_active_streams() {
    let h = TestHarness::new();
    h.backend.insert("slow.bin", pattern(50 * 1024), 1024);
    h.backend.set_fetch_delay(Duration::from_millis(20));

    let resp = h.get("/slow.bin", None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let stream_id = header(&resp, "x-stream-id").to_string();

    h.ctx.shutdown.cancel();
    assert!(resp.into_body().collect().await.is_err());

    let record = h.ctx.stats.get(stream_id.parse().unwrap()).unwrap();
    assert_eq!(record.status, chunkstream::streaming::StreamStatus::Cancelled);
    assert!(record.bytes_served < 50 * 1024);
}

#[tokio::test]
async fn client_disconnect_releases_resources() {
    let h = TestHarness::new();
    h.backend.insert("long.bin", pattern(200 * 1024), 1024);
    h.backend.set_fetch_delay(Duration::from_millis(50));
    let (h, addr) = h.with_server().await;

    let mut resp = reqwest::get(format!("http://{addr}/long.bin")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let stream_id = resp
        .headers()
        .get("x-stream-id")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(resp.chunk().await.unwrap().is_some());
    drop(resp);

    let id = stream_id.parse().unwrap();
    let mut cancelled = false;
    for _ in 0..100 {
        let record = h.ctx.stats.get(id).unwrap();
        if record.status == chunkstream::streaming::StreamStatus::Cancelled
            && h.ctx.engine.pool().outstanding_leases() == 0
        {
            cancelled = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(cancelled, "stream was not torn down after disconnect");

    let record = h.ctx.stats.get(id).unwrap();
    assert_eq!(record.requester, "127.0.0.1");
    assert!(record.bytes_served < 200 * 1024);
}
