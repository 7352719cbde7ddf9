//! Session pool of authenticated backend connections.
//!
//! Handles are provisioned once at startup and referenced by [`HandleId`].
//! Fetches borrow a handle through a [`Lease`]; dropping the lease returns it,
//! so an aborted fetch can never leak one. A handle is either healthy or
//! cooling down after the backend rate-limited it; cooling handles are skipped
//! by [`SessionPool::checkout`] until their cooldown expires.
//!
//! All state lives behind a single mutex so concurrent streams always observe
//! a consistent health snapshot.

use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use chunkstream_common::{Error, HandleId, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Provisioning input for one backend connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandleSpec {
    /// Account name or token identifying the connection.
    pub identity: String,
    /// Backend endpoint this connection is bound to, if known.
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl HandleSpec {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            endpoint: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}

/// One authenticated backend connection, as seen by a chunk fetcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    pub id: HandleId,
    pub identity: String,
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Health {
    Healthy,
    Cooling { until: Instant },
}

#[derive(Debug)]
struct Slot {
    handle: Arc<SessionHandle>,
    health: Health,
    leases: usize,
}

#[derive(Debug)]
struct PoolState {
    slots: Vec<Slot>,
    /// Round-robin cursor: index of the first slot to try on the next checkout.
    next: usize,
}

/// Observable state of a handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum HandleState {
    Idle,
    CheckedOut,
    Cooling { remaining_ms: u64 },
}

/// Point-in-time view of one handle, for stats and leak checks.
#[derive(Debug, Clone, Serialize)]
pub struct HandleSnapshot {
    pub id: HandleId,
    pub identity: String,
    pub endpoint: Option<String>,
    #[serde(flatten)]
    pub state: HandleState,
    pub leases: usize,
}

/// Fixed set of backend handles with round-robin checkout and cooldowns.
#[derive(Debug)]
pub struct SessionPool {
    state: Mutex<PoolState>,
}

impl SessionPool {
    /// Build a pool from provisioned handle specs.
    pub fn new(specs: Vec<HandleSpec>) -> Result<Arc<Self>> {
        if specs.is_empty() {
            return Err(Error::invalid_input(
                "session pool needs at least one handle",
            ));
        }

        let slots = specs
            .into_iter()
            .enumerate()
            .map(|(index, spec)| Slot {
                handle: Arc::new(SessionHandle {
                    id: HandleId::new(index),
                    identity: spec.identity,
                    endpoint: spec.endpoint,
                }),
                health: Health::Healthy,
                leases: 0,
            })
            .collect();

        Ok(Arc::new(Self {
            state: Mutex::new(PoolState { slots, next: 0 }),
        }))
    }

    /// Borrow a healthy handle, preferring one bound to `affinity`.
    ///
    /// Fails with [`Error::PoolExhausted`] carrying the shortest remaining
    /// cooldown when every handle is cooling.
    pub fn checkout(self: &Arc<Self>, affinity: Option<&str>) -> Result<Lease> {
        self.checkout_avoiding(affinity, None)
    }

    /// Like [`checkout`](Self::checkout), but skips `avoid` whenever another
    /// healthy handle exists. Used to rotate away from a handle that just
    /// failed.
    pub fn checkout_avoiding(
        self: &Arc<Self>,
        affinity: Option<&str>,
        avoid: Option<HandleId>,
    ) -> Result<Lease> {
        let now = Instant::now();
        let mut state = self.state.lock();
        let len = state.slots.len();

        for slot in state.slots.iter_mut() {
            if let Health::Cooling { until } = slot.health {
                if until <= now {
                    slot.health = Health::Healthy;
                    tracing::debug!(handle = %slot.handle.id, "Handle cooldown expired");
                }
            }
        }

        let picked = {
            let slots = &state.slots;
            let start = state.next;
            let order = || (0..len).map(move |offset| (start + offset) % len);
            let eligible = |index: usize, skip: Option<HandleId>| {
                let slot = &slots[index];
                slot.health == Health::Healthy && Some(slot.handle.id) != skip
            };

            affinity
                .and_then(|endpoint| {
                    order().find(|&i| {
                        eligible(i, avoid) && slots[i].handle.endpoint.as_deref() == Some(endpoint)
                    })
                })
                .or_else(|| order().find(|&i| eligible(i, avoid)))
                .or_else(|| order().find(|&i| eligible(i, None)))
        };

        let Some(index) = picked else {
            let retry_after = state
                .slots
                .iter()
                .filter_map(|slot| match slot.health {
                    Health::Cooling { until } => Some(until.saturating_duration_since(now)),
                    Health::Healthy => None,
                })
                .min()
                .unwrap_or_default();
            return Err(Error::PoolExhausted { retry_after });
        };

        state.next = (index + 1) % len;
        let slot = &mut state.slots[index];
        slot.leases += 1;
        let handle = Arc::clone(&slot.handle);
        tracing::trace!(handle = %handle.id, leases = slot.leases, "Handle checked out");

        Ok(Lease {
            pool: Arc::clone(self),
            handle,
        })
    }

    /// Return a lease to the pool. Equivalent to dropping it.
    pub fn release(&self, lease: Lease) {
        drop(lease);
    }

    /// Take the leased handle out of rotation until `now + retry_after`.
    ///
    /// A cooldown that already ends later is kept.
    pub fn mark_cooling(&self, lease: &Lease, retry_after: Duration) {
        self.cool_down(lease.handle.id, retry_after);
    }

    /// Cooldown by handle id, for callers whose lease may already be gone.
    pub(crate) fn cool_down(&self, id: HandleId, retry_after: Duration) {
        let until = Instant::now() + retry_after;
        let mut state = self.state.lock();
        let Some(slot) = state.slots.get_mut(id.index()) else {
            return;
        };
        let until = match slot.health {
            Health::Cooling { until: existing } if existing > until => existing,
            _ => until,
        };
        slot.health = Health::Cooling { until };
        tracing::warn!(
            handle = %id,
            identity = %slot.handle.identity,
            retry_after_ms = retry_after.as_millis() as u64,
            "Backend rate limit, handle cooling down"
        );
    }

    /// Number of handles in the pool.
    pub fn len(&self) -> usize {
        self.state.lock().slots.len()
    }

    /// A pool is never empty once built.
    pub fn is_empty(&self) -> bool {
        self.state.lock().slots.is_empty()
    }

    /// Handles currently eligible for checkout.
    pub fn healthy_count(&self) -> usize {
        let now = Instant::now();
        self.state
            .lock()
            .slots
            .iter()
            .filter(|slot| match slot.health {
                Health::Healthy => true,
                Health::Cooling { until } => until <= now,
            })
            .count()
    }

    /// Total leases not yet returned, across all handles.
    pub fn outstanding_leases(&self) -> usize {
        self.state.lock().slots.iter().map(|slot| slot.leases).sum()
    }

    pub fn snapshot(&self) -> Vec<HandleSnapshot> {
        let now = Instant::now();
        self.state
            .lock()
            .slots
            .iter()
            .map(|slot| {
                let state = match slot.health {
                    Health::Cooling { until } if until > now => HandleState::Cooling {
                        remaining_ms: until.duration_since(now).as_millis() as u64,
                    },
                    _ if slot.leases > 0 => HandleState::CheckedOut,
                    _ => HandleState::Idle,
                };
                HandleSnapshot {
                    id: slot.handle.id,
                    identity: slot.handle.identity.clone(),
                    endpoint: slot.handle.endpoint.clone(),
                    state,
                    leases: slot.leases,
                }
            })
            .collect()
    }

    fn return_lease(&self, id: HandleId) {
        let mut state = self.state.lock();
        let slot = &mut state.slots[id.index()];
        slot.leases = slot.leases.saturating_sub(1);
        tracing::trace!(handle = %id, leases = slot.leases, "Handle released");
    }
}

/// A borrowed handle. Returned to the pool on drop.
#[derive(Debug)]
pub struct Lease {
    pool: Arc<SessionPool>,
    handle: Arc<SessionHandle>,
}

impl Lease {
    pub fn id(&self) -> HandleId {
        self.handle.id
    }

    pub(crate) fn shared_handle(&self) -> Arc<SessionHandle> {
        Arc::clone(&self.handle)
    }
}

impl Deref for Lease {
    type Target = SessionHandle;

    fn deref(&self) -> &SessionHandle {
        &self.handle
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.pool.return_lease(self.handle.id);
    }
}
