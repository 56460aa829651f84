//! Per-disk request queues: FIFO(s) of pending requests drained by one or
//! two dedicated worker threads.
//!
//! Three variants are implemented: a single-FIFO worker, a two-FIFO
//! read/write-split worker, and a kernel-AIO-style submitter/reaper
//! pair. All three share [`RequestQueue`] so the
//! [registry][crate::registry] can hold them as trait objects regardless
//! of which concrete worker strategy a disk ends up with.

mod aio;
mod single;
mod split;

pub use aio::AioQueue;
pub use single::SingleQueue;
pub use split::SplitQueue;

use std::sync::Arc;

use crate::request::{CancelTarget, Request};
use crate::stats::Stats;

/// Lifecycle of a queue's worker thread(s).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    NotRunning,
    Running,
    Terminating,
    Terminated,
}

/// One per-disk request queue.
pub trait RequestQueue: CancelTarget + Send + Sync {
    /// Enqueue a request for this queue's worker(s) to dispatch.
    fn add(self: Arc<Self>, req: Arc<Request>);

    /// Attempt to cancel a request still sitting in this queue.
    fn cancel(&self, req: &Arc<Request>) -> bool {
        self.try_cancel(req.id())
    }

    /// Number of requests currently queued (not yet dispatched).
    fn pending_len(&self) -> usize;

    /// Stop accepting work, wake the worker(s), and join them. Idempotent.
    fn shutdown(&self);

    fn worker_state(&self) -> WorkerState;

    /// Read/write counters and wait timings this queue's worker(s) have
    /// recorded.
    fn stats(&self) -> &Stats;
}
