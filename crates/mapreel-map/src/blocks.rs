//! Render-block bookkeeping.
//!
//! Every handle acquired from the video host is recorded here and released
//! through here, so that release happens exactly once per handle no matter
//! how many code paths (completion, timeout, teardown, supersession) try.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::host::{RenderHandleId, VideoHost};

#[derive(Debug, Clone)]
struct HandleRecord {
    description: String,
    created_at: Instant,
}

/// A handle that has not been released yet.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingHandle {
    pub id: RenderHandleId,
    pub description: String,
    pub age: Duration,
}

/// Ledger of render-block handles issued by one video host. Only pending
/// handles are kept; a record is removed when its handle is released.
pub struct BlockLedger {
    host: Arc<dyn VideoHost>,
    records: Mutex<HashMap<RenderHandleId, HandleRecord>>,
    issued: AtomicUsize,
}

impl BlockLedger {
    pub fn new(host: Arc<dyn VideoHost>) -> Arc<Self> {
        Arc::new(Self {
            host,
            records: Mutex::new(HashMap::new()),
            issued: AtomicUsize::new(0),
        })
    }

    pub fn host(&self) -> &Arc<dyn VideoHost> {
        &self.host
    }

    /// Acquire a new block. The returned guard releases it on drop.
    pub fn acquire(self: &Arc<Self>, description: impl Into<String>) -> RenderBlock {
        let description = description.into();
        let id = self.host.acquire_render_block(&description);
        tracing::debug!(handle = %id, %description, "render block acquired");
        self.issued.fetch_add(1, Ordering::Relaxed);
        self.records.lock().insert(
            id,
            HandleRecord {
                description,
                created_at: Instant::now(),
            },
        );
        RenderBlock {
            ledger: Arc::clone(self),
            id,
        }
    }

    /// Release `id` if it is still pending. Returns `true` only for the call
    /// that actually released it; later calls are no-ops.
    pub fn resolve(&self, id: RenderHandleId) -> bool {
        let removed = self.records.lock().remove(&id);
        if removed.is_none() {
            tracing::debug!(handle = %id, "render block unknown or already released, ignoring");
            return false;
        }
        self.host.release_render_block(id);
        tracing::debug!(handle = %id, "render block released");
        true
    }

    pub fn is_pending(&self, id: RenderHandleId) -> bool {
        self.records.lock().contains_key(&id)
    }

    /// All handles not yet released, oldest first.
    pub fn pending(&self) -> Vec<PendingHandle> {
        let now = Instant::now();
        let mut pending: Vec<PendingHandle> = self
            .records
            .lock()
            .iter()
            .map(|(id, r)| PendingHandle {
                id: *id,
                description: r.description.clone(),
                age: now.saturating_duration_since(r.created_at),
            })
            .collect();
        pending.sort_by(|a, b| b.age.cmp(&a.age).then(a.id.cmp(&b.id)));
        pending
    }

    /// Pending handles older than `threshold`, for diagnosing stuck renders.
    pub fn stuck(&self, threshold: Duration) -> Vec<PendingHandle> {
        let stuck: Vec<PendingHandle> = self
            .pending()
            .into_iter()
            .filter(|h| h.age >= threshold)
            .collect();
        for h in &stuck {
            tracing::warn!(handle = %h.id, description = %h.description, age_ms = h.age.as_millis() as u64, "render block appears stuck");
        }
        stuck
    }

    /// Release every pending handle. Returns how many were released.
    pub fn force_resolve_all(&self) -> usize {
        let ids: Vec<RenderHandleId> = self.records.lock().keys().copied().collect();
        ids.into_iter().filter(|id| self.resolve(*id)).count()
    }

    /// Number of handles ever issued through this ledger.
    pub fn issued(&self) -> usize {
        self.issued.load(Ordering::Relaxed)
    }
}

/// Guard for one acquired render block.
pub struct RenderBlock {
    ledger: Arc<BlockLedger>,
    id: RenderHandleId,
}

impl RenderBlock {
    pub fn id(&self) -> RenderHandleId {
        self.id
    }

    /// Release now. Idempotent.
    pub fn resolve(&self) -> bool {
        self.ledger.resolve(self.id)
    }

    pub fn is_pending(&self) -> bool {
        self.ledger.is_pending(self.id)
    }
}

impl Drop for RenderBlock {
    fn drop(&mut self) {
        // Teardown and cancellation land here; resolve() ignores handles that
        // were already released.
        self.ledger.resolve(self.id);
    }
}

impl std::fmt::Debug for RenderBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderBlock").field("id", &self.id).finish()
    }
}
