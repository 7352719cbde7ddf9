//! Ordered prefetch engine.
//!
//! A [`Prefetcher`] executes a chunk plan with bounded concurrency and hands
//! results back strictly in plan order.
//!
//! # Admission
//!
//! Up to `worker_count` worker tasks run per stream. Before claiming the next
//! descriptor a worker must take a permit from the stream's window semaphore
//! (`window_size` permits). The permit travels with the completed chunk into
//! the reorder buffer and is only dropped when the consumer takes the chunk,
//! so fetches in flight plus chunks waiting to be emitted never exceed
//! `window_size`. A slow consumer therefore stops new fetches from starting.
//!
//! # Failures
//!
//! - `RateLimited`: the handle is put into cooldown and the same descriptor is
//!   retried on another handle. When every handle is cooling the worker sleeps
//!   until the nearest expiry; those sleeps are charged to the stream's
//!   rate-limit budget and exceeding it fails the stream.
//! - `Transient` (and short reads): retried on a different handle up to
//!   `transient_retries` times.
//!
//! # Cancellation
//!
//! Cancelling the stream's token, calling [`Prefetcher::shutdown`] or
//! dropping the prefetcher stops admission and aborts every worker. Leases
//! taken by workers are parked in the stream's lease ledger; ending the
//! stream empties the ledger on the spot, so every handle is back in the pool
//! before `drop` returns rather than whenever the aborted tasks are next
//! polled.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chunkstream_common::{Error, FetchDescriptor, FetchResult, HandleId, Result, StreamObject};
use parking_lot::Mutex;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::backend::ChunkFetcher;
use crate::config::EngineConfig;
use crate::pool::{Lease, SessionHandle, SessionPool};
use crate::reorder::ReorderBuffer;

/// Floor for backend-supplied cooldowns so a zero `retry_after` cannot spin.
const MIN_COOLDOWN: Duration = Duration::from_millis(100);

/// Leases currently borrowed by one stream's workers.
#[derive(Default)]
struct LeaseLedger {
    state: Mutex<LedgerState>,
}

#[derive(Default)]
struct LedgerState {
    next_key: u64,
    held: HashMap<u64, Lease>,
    closed: bool,
}

impl LeaseLedger {
    /// Check out a handle and park its lease here.
    ///
    /// Returns `Ok(None)` once the ledger is closed. Checkout happens under the
    /// ledger lock so a concurrent [`reclaim_all`](Self::reclaim_all) can never
    /// miss a lease.
    fn checkout(
        self: &Arc<Self>,
        pool: &Arc<SessionPool>,
        affinity: Option<&str>,
        avoid: Option<HandleId>,
    ) -> Result<Option<HeldLease>> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(None);
        }

        let lease = pool.checkout_avoiding(affinity, avoid)?;
        let handle = lease.shared_handle();
        let key = state.next_key;
        state.next_key += 1;
        state.held.insert(key, lease);

        Ok(Some(HeldLease {
            ledger: Arc::clone(self),
            key,
            handle,
        }))
    }

    /// Close the ledger and return every parked lease to the pool.
    fn reclaim_all(&self) -> usize {
        let reclaimed: Vec<Lease> = {
            let mut state = self.state.lock();
            state.closed = true;
            state.held.drain().map(|(_, lease)| lease).collect()
        };
        reclaimed.len()
    }
}

/// A worker's claim on a parked lease. Dropping it returns the lease unless
/// the ledger already reclaimed it.
struct HeldLease {
    ledger: Arc<LeaseLedger>,
    key: u64,
    handle: Arc<SessionHandle>,
}

impl HeldLease {
    fn id(&self) -> HandleId {
        self.handle.id
    }
}

impl Drop for HeldLease {
    fn drop(&mut self) {
        let lease = self.ledger.state.lock().held.remove(&self.key);
        drop(lease);
    }
}

struct Completion {
    seq: usize,
    outcome: Result<Bytes>,
    permit: OwnedSemaphorePermit,
}

/// State shared by the workers of one stream.
struct Shared {
    plan: Arc<[FetchDescriptor]>,
    object: Arc<StreamObject>,
    pool: Arc<SessionPool>,
    fetcher: Arc<dyn ChunkFetcher>,
    leases: Arc<LeaseLedger>,
    transient_retries: u32,
    wait_budget: Mutex<Duration>,
    next_seq: AtomicUsize,
    window: Arc<Semaphore>,
    completions: mpsc::UnboundedSender<Completion>,
    cancel: CancellationToken,
}

impl Shared {
    /// Sleep out a pool-wide cooldown, charging it to the stream's budget.
    async fn wait_for_cooldown(&self, retry_after: Duration, chunk_index: u64) -> Result<()> {
        {
            let mut remaining = self.wait_budget.lock();
            if retry_after > *remaining {
                return Err(Error::backend_unavailable(format!(
                    "rate-limit wait budget exhausted at chunk {chunk_index}"
                )));
            }
            *remaining -= retry_after;
        }

        tracing::debug!(
            chunk = chunk_index,
            wait_ms = retry_after.as_millis() as u64,
            "All handles cooling, waiting"
        );
        tokio::time::sleep(retry_after).await;
        Ok(())
    }

    async fn fetch_descriptor(&self, descriptor: &FetchDescriptor) -> Result<Bytes> {
        let affinity = self.object.endpoint.as_deref();
        let mut transient_failures = 0u32;
        let mut avoid: Option<HandleId> = None;

        loop {
            let lease = match self.leases.checkout(&self.pool, affinity, avoid) {
                Ok(Some(lease)) => lease,
                Ok(None) => return Err(Error::ClientDisconnected),
                Err(Error::PoolExhausted { retry_after }) => {
                    self.wait_for_cooldown(retry_after, descriptor.chunk_index)
                        .await?;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let failure = match self
                .fetcher
                .fetch(&lease.handle, &self.object, descriptor)
                .await
            {
                Ok(bytes) if bytes.len() as u64 >= descriptor.length => {
                    tracing::trace!(
                        chunk = descriptor.chunk_index,
                        handle = %lease.id(),
                        bytes = bytes.len(),
                        "Chunk fetched"
                    );
                    return Ok(bytes);
                }
                Ok(bytes) => Error::transient(format!(
                    "short read: {} of {} bytes",
                    bytes.len(),
                    descriptor.length
                )),
                Err(e) => Error::from(e),
            };

            if let Error::RateLimited { retry_after } = failure {
                self.pool
                    .cool_down(lease.id(), retry_after.max(MIN_COOLDOWN));
                continue;
            }

            transient_failures += 1;
            tracing::warn!(
                chunk = descriptor.chunk_index,
                handle = %lease.id(),
                attempt = transient_failures,
                error = %failure,
                "Chunk fetch failed"
            );
            if transient_failures > self.transient_retries {
                return Err(Error::backend_unavailable(format!(
                    "chunk {} failed after {} attempts: {}",
                    descriptor.chunk_index, transient_failures, failure
                )));
            }
            avoid = Some(lease.id());
        }
    }
}

async fn run_worker(shared: Arc<Shared>, worker: usize) {
    loop {
        let permit = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => return,
            permit = Arc::clone(&shared.window).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
        };

        let seq = shared.next_seq.fetch_add(1, Ordering::SeqCst);
        let Some(descriptor) = shared.plan.get(seq).copied() else {
            tracing::trace!(worker, "Plan exhausted, worker exiting");
            return;
        };

        let outcome = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => return,
            outcome = shared.fetch_descriptor(&descriptor) => outcome,
        };

        let failed = outcome.is_err();
        if shared
            .completions
            .send(Completion {
                seq,
                outcome,
                permit,
            })
            .is_err()
            || failed
        {
            return;
        }
    }
}

/// Consumer side of one stream's prefetch pipeline.
pub struct Prefetcher {
    plan: Arc<[FetchDescriptor]>,
    reorder: ReorderBuffer<(Bytes, OwnedSemaphorePermit)>,
    completions: mpsc::UnboundedReceiver<Completion>,
    workers: JoinSet<()>,
    leases: Arc<LeaseLedger>,
    window: Arc<Semaphore>,
    window_size: usize,
    cancel: CancellationToken,
    done: bool,
}

impl Prefetcher {
    /// Spawn the workers for `plan` and return the ordered consumer.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        plan: Vec<FetchDescriptor>,
        object: Arc<StreamObject>,
        pool: Arc<SessionPool>,
        fetcher: Arc<dyn ChunkFetcher>,
        config: &EngineConfig,
        cancel: CancellationToken,
    ) -> Self {
        let plan: Arc<[FetchDescriptor]> = plan.into();
        let window = Arc::new(Semaphore::new(config.window_size));
        let (tx, rx) = mpsc::unbounded_channel();
        let leases = Arc::new(LeaseLedger::default());
        let worker_count = config.worker_count.min(plan.len());

        tracing::debug!(
            backend_id = %object.backend_id,
            chunks = plan.len(),
            workers = worker_count,
            window = config.window_size,
            "Starting prefetch"
        );

        let shared = Arc::new(Shared {
            plan: Arc::clone(&plan),
            object,
            pool,
            fetcher,
            leases: Arc::clone(&leases),
            transient_retries: config.transient_retries,
            wait_budget: Mutex::new(config.rate_limit_budget),
            next_seq: AtomicUsize::new(0),
            window: Arc::clone(&window),
            completions: tx,
            cancel: cancel.clone(),
        });

        let mut workers = JoinSet::new();
        for worker in 0..worker_count {
            workers.spawn(run_worker(Arc::clone(&shared), worker));
        }

        Self {
            plan,
            reorder: ReorderBuffer::new(),
            completions: rx,
            workers,
            leases,
            window,
            window_size: config.window_size,
            cancel,
            done: false,
        }
    }

    /// Next chunk in plan order, `None` once the plan is complete.
    ///
    /// The first error ends the stream: workers are stopped and later calls
    /// return `None`. Cancellation surfaces as [`Error::ClientDisconnected`].
    pub async fn next(&mut self) -> Option<Result<FetchResult>> {
        if self.done {
            return None;
        }

        loop {
            if let Some((seq, (bytes, permit))) = self.reorder.pop_ready() {
                drop(permit);
                let chunk_index = self.plan[seq as usize].chunk_index;
                return Some(Ok(FetchResult { chunk_index, bytes }));
            }

            if self.reorder.cursor() as usize == self.plan.len() {
                self.finish();
                return None;
            }

            let received = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                completion = self.completions.recv() => Some(completion),
            };

            let error = match received {
                None => Error::ClientDisconnected,
                Some(None) => Error::internal("prefetch workers exited before the plan completed"),
                Some(Some(Completion {
                    seq,
                    outcome: Ok(bytes),
                    permit,
                })) => match self.reorder.insert(seq as u64, (bytes, permit)) {
                    Ok(()) => continue,
                    Err(e) => e,
                },
                Some(Some(Completion { outcome: Err(e), .. })) => e,
            };

            self.finish();
            return Some(Err(error));
        }
    }

    /// Cancel, abort every worker and wait until they are gone.
    ///
    /// When this returns, every lease taken by this stream is back in the
    /// pool.
    pub async fn shutdown(mut self) {
        self.finish();
        self.workers.shutdown().await;
    }

    /// The plan being executed.
    pub fn plan(&self) -> &[FetchDescriptor] {
        &self.plan
    }

    /// Chunks handed to the consumer so far.
    pub fn emitted(&self) -> usize {
        self.reorder.cursor() as usize
    }

    /// Descriptors admitted (in flight or buffered) but not yet emitted.
    pub fn occupancy(&self) -> usize {
        self.window_size - self.window.available_permits()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn finish(&mut self) {
        self.done = true;
        self.cancel.cancel();
        self.workers.abort_all();
        let reclaimed = self.leases.reclaim_all();
        if reclaimed > 0 {
            tracing::debug!(leases = reclaimed, "Reclaimed in-flight leases");
        }
    }
}

impl Drop for Prefetcher {
    fn drop(&mut self) {
        self.finish();
    }
}

impl std::fmt::Debug for Prefetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prefetcher")
            .field("chunks", &self.plan.len())
            .field("emitted", &self.emitted())
            .field("occupancy", &self.occupancy())
            .field("done", &self.done)
            .finish()
    }
}
