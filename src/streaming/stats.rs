//! Stream statistics.
//!
//! Tracks every stream served by this process. A stream stays in the active
//! map while it runs and for a short grace period after it ends, then moves
//! to a bounded list of recent streams.

use chrono::{DateTime, Utc};
use chunkstream_common::{ByteWindow, StreamId};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Throughput is sampled over windows of this length for the peak figure.
const SAMPLE_WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    Streaming,
    Finished,
    Cancelled,
    Error,
}

impl StreamStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Streaming)
    }
}

#[derive(Debug, Clone)]
struct RateSample {
    started: Instant,
    window_start: Instant,
    window_bytes: u64,
}

impl RateSample {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            started: now,
            window_start: now,
            window_bytes: 0,
        }
    }
}

/// One stream as reported by the stats endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct StreamRecord {
    pub id: StreamId,
    pub token: String,
    pub requester: String,
    /// Backend endpoint the object lives on, when the resolver knows it.
    pub endpoint: Option<String>,
    pub range: String,
    pub object_size: u64,
    pub status: StreamStatus,
    pub bytes_served: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_secs: f64,
    pub avg_mbps: f64,
    pub peak_mbps: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    sample: RateSample,
}

fn mbps(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    (bytes as f64 * 8.0) / 1_000_000.0 / secs
}

impl StreamRecord {
    fn new(
        id: StreamId,
        token: String,
        requester: String,
        endpoint: Option<String>,
        window: ByteWindow,
        object_size: u64,
    ) -> Self {
        Self {
            id,
            token,
            requester,
            endpoint,
            range: window.to_string(),
            object_size,
            status: StreamStatus::Streaming,
            bytes_served: 0,
            started_at: Utc::now(),
            finished_at: None,
            duration_secs: 0.0,
            avg_mbps: 0.0,
            peak_mbps: 0.0,
            error: None,
            sample: RateSample::new(),
        }
    }

    fn add_bytes(&mut self, bytes: u64) {
        self.bytes_served += bytes;
        self.sample.window_bytes += bytes;

        let now = Instant::now();
        let window = now.duration_since(self.sample.window_start);
        if window >= SAMPLE_WINDOW {
            self.peak_mbps = self.peak_mbps.max(mbps(self.sample.window_bytes, window));
            self.sample.window_start = now;
            self.sample.window_bytes = 0;
        }

        let elapsed = now.duration_since(self.sample.started);
        self.duration_secs = elapsed.as_secs_f64();
        self.avg_mbps = mbps(self.bytes_served, elapsed);
    }

    fn finish(&mut self, status: StreamStatus, error: Option<String>) {
        let elapsed = self.sample.started.elapsed();
        self.status = status;
        self.error = error;
        self.finished_at = Some(Utc::now());
        self.duration_secs = elapsed.as_secs_f64();
        self.avg_mbps = mbps(self.bytes_served, elapsed);
        // Streams shorter than one sample window never produced a peak.
        if self.peak_mbps < self.avg_mbps {
            self.peak_mbps = self.avg_mbps;
        }
    }
}

/// Process-wide registry of stream statistics.
#[derive(Debug)]
pub struct StreamStats {
    active: DashMap<StreamId, StreamRecord>,
    recent: Mutex<VecDeque<StreamRecord>>,
    retain_finished: Duration,
    recent_capacity: usize,
}

impl StreamStats {
    pub fn new(retain_finished: Duration, recent_capacity: usize) -> Self {
        Self {
            active: DashMap::new(),
            recent: Mutex::new(VecDeque::with_capacity(recent_capacity)),
            retain_finished,
            recent_capacity,
        }
    }

    /// Register a stream that is about to send its first byte.
    pub fn begin(
        &self,
        id: StreamId,
        token: impl Into<String>,
        requester: impl Into<String>,
        endpoint: Option<String>,
        window: ByteWindow,
        object_size: u64,
    ) {
        let record = StreamRecord::new(
            id,
            token.into(),
            requester.into(),
            endpoint,
            window,
            object_size,
        );
        tracing::info!(
            stream_id = %id,
            token = %record.token,
            requester = %record.requester,
            range = %record.range,
            "Stream started"
        );
        self.active.insert(id, record);
    }

    pub fn record_bytes(&self, id: StreamId, bytes: u64) {
        if let Some(mut record) = self.active.get_mut(&id) {
            record.add_bytes(bytes);
        }
    }

    /// Mark a stream as ended. Only the first call has an effect.
    pub fn finish(&self, id: StreamId, status: StreamStatus, error: Option<String>) {
        let Some(mut record) = self.active.get_mut(&id) else {
            return;
        };
        if record.status.is_terminal() {
            return;
        }
        record.finish(status, error);
        tracing::info!(
            stream_id = %id,
            status = ?record.status,
            bytes = record.bytes_served,
            duration_secs = record.duration_secs,
            avg_mbps = record.avg_mbps,
            "Stream ended"
        );
    }

    /// Streams that are running or ended within the retention period.
    pub fn active(&self) -> Vec<StreamRecord> {
        self.active.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Pruned streams, newest first.
    pub fn recent(&self) -> Vec<StreamRecord> {
        self.recent.lock().iter().cloned().collect()
    }

    pub fn get(&self, id: StreamId) -> Option<StreamRecord> {
        if let Some(entry) = self.active.get(&id) {
            return Some(entry.value().clone());
        }
        self.recent.lock().iter().find(|r| r.id == id).cloned()
    }

    /// Move streams that ended before the retention period into the recent
    /// list. Returns how many were moved.
    pub fn prune_finished(&self) -> usize {
        self.prune_finished_before(Utc::now())
    }

    fn prune_finished_before(&self, now: DateTime<Utc>) -> usize {
        let retain = chrono::Duration::from_std(self.retain_finished)
            .unwrap_or_else(|_| chrono::Duration::seconds(3));

        let expired: Vec<StreamId> = self
            .active
            .iter()
            .filter(|entry| {
                entry
                    .finished_at
                    .is_some_and(|finished| now - finished >= retain)
            })
            .map(|entry| *entry.key())
            .collect();

        let mut moved = 0;
        for id in expired {
            if let Some((_, record)) = self.active.remove(&id) {
                let mut recent = self.recent.lock();
                recent.push_front(record);
                recent.truncate(self.recent_capacity);
                moved += 1;
            }
        }

        if moved > 0 {
            tracing::debug!(moved, "Pruned finished streams");
        }
        moved
    }

    /// Number of streams currently in the active map.
    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

impl Default for StreamStats {
    fn default() -> Self {
        Self::new(Duration::from_secs(3), 100)
    }
}

/// Start a background task that periodically prunes finished streams.
pub fn start_cleanup_task(
    stats: Arc<StreamStats>,
    interval_secs: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            stats.prune_finished();
        }
    })
}
