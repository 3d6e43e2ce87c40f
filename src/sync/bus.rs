use crate::session::AudioSyncState;
use crate::sync::SyncMetrics;
use parking_lot::Mutex;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::warn;

pub type SubscriberId = u64;

type Callback = Arc<dyn Fn(&AudioSyncState, &SyncMetrics) + Send + Sync>;

/// Best-effort, synchronous, in-process fan-out of reconciliation results.
///
/// Lets the playhead UI, diagnostics and the note scheduler all react to a
/// reconciliation without re-querying the coordinator. Subscribers may come
/// and go at any time; a publish iterates over a copy of the list, so
/// mid-publish changes only take effect on the next publish. No delivery
/// order is guaranteed across subscribers.
pub struct SyncEventBus {
    inner: Mutex<BusInner>,
}

struct BusInner {
    next_id: SubscriberId,
    subscribers: Vec<(SubscriberId, Callback)>,
}

impl SyncEventBus {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BusInner {
                next_id: 0,
                subscribers: Vec::new(),
            }),
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriberId
    where
        F: Fn(&AudioSyncState, &SyncMetrics) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.push((id, Arc::new(callback)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.subscribers.len();
        inner.subscribers.retain(|(sub_id, _)| *sub_id != id);
        inner.subscribers.len() != before
    }

    /// Deliver `(state, metrics)` to every subscriber. A panicking listener
    /// is logged and skipped; it never blocks delivery to the rest.
    pub fn publish(&self, state: &AudioSyncState, metrics: &SyncMetrics) {
        let subscribers: Vec<(SubscriberId, Callback)> = self.inner.lock().subscribers.clone();
        for (id, callback) in subscribers {
            if catch_unwind(AssertUnwindSafe(|| callback(state, metrics))).is_err() {
                warn!(subscriber = id, "sync listener panicked during publish");
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }
}

impl Default for SyncEventBus {
    fn default() -> Self {
        Self::new()
    }
}
