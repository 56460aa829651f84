//! Process-wide routing from queue id to [`RequestQueue`].
//!
//! Constructed lazily on first reference, using `once_cell::sync::Lazy`
//! for this "initialized on first use, torn down at process exit"
//! singleton shape rather than a hand-rolled `static mut` (see
//! `DESIGN.md`).

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::debug;

use crate::queue::{AioQueue, RequestQueue, SingleQueue, SplitQueue};

/// How a disk's queue should be constructed the first time it is
/// referenced.
#[derive(Debug, Clone, Copy)]
pub enum QueueKind {
    Single,
    Split,
    Aio { max_events: usize },
}

struct Registry {
    queues: Mutex<HashMap<i64, Arc<dyn RequestQueue>>>,
}

static REGISTRY: Lazy<Registry> = Lazy::new(|| Registry {
    queues: Mutex::new(HashMap::new()),
});

/// Process-wide disk-queue registry. Cheap to construct repeatedly: it
/// is a thin handle onto the lazily-initialized global map, so tests can
/// pass one around explicitly instead of relying on hidden global state.
#[derive(Clone, Copy, Default)]
pub struct DiskQueues;

impl DiskQueues {
    pub fn new() -> Self {
        DiskQueues
    }

    /// Get or construct the queue for `queue_id`, creating it with `kind`
    /// if this is the first reference.
    pub fn get_or_create(&self, queue_id: i64, kind: QueueKind) -> Arc<dyn RequestQueue> {
        let mut queues = REGISTRY.queues.lock();
        queues
            .entry(queue_id)
            .or_insert_with(|| {
                debug!(queue_id, ?kind, "constructing request queue");
                match kind {
                    QueueKind::Single => SingleQueue::new() as Arc<dyn RequestQueue>,
                    QueueKind::Split => SplitQueue::new() as Arc<dyn RequestQueue>,
                    QueueKind::Aio { max_events } => AioQueue::new(max_events) as Arc<dyn RequestQueue>,
                }
            })
            .clone()
    }

    pub fn get(&self, queue_id: i64) -> Option<Arc<dyn RequestQueue>> {
        REGISTRY.queues.lock().get(&queue_id).cloned()
    }

    /// Tear every queue down, waiting for each worker to terminate. Order
    /// across queues is unspecified.
    pub fn shutdown_all(&self) {
        let queues: Vec<_> = REGISTRY.queues.lock().drain().map(|(_, q)| q).collect();
        for queue in queues {
            queue.shutdown();
        }
    }

    pub fn queue_count(&self) -> usize {
        REGISTRY.queues.lock().len()
    }
}
