use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info};

use super::{RequestQueue, WorkerState};
use crate::file::OpType;
use crate::request::{CancelTarget, Request};
use crate::stats::{Stats, Timer};

/// One worker thread draining one FIFO. `add` pushes, the worker pops in
/// order and calls `serve` then `complete`, so within one queue requests
/// complete in insertion order.
pub struct SingleQueue {
    pending: Mutex<VecDeque<Arc<Request>>>,
    not_empty: Condvar,
    state: Mutex<WorkerState>,
    worker: Mutex<Option<JoinHandle<()>>>,
    stats: Stats,
}

impl SingleQueue {
    pub fn new() -> Arc<Self> {
        let queue = Arc::new(SingleQueue {
            pending: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
            state: Mutex::new(WorkerState::NotRunning),
            worker: Mutex::new(None),
            stats: Stats::new(),
        });
        queue.start();
        queue
    }

    /// Read/write counters and wait timings this queue's worker has
    /// recorded.
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    fn start(self: &Arc<Self>) {
        *self.state.lock() = WorkerState::Running;
        let queue = self.clone();
        let handle = std::thread::Builder::new()
            .name("stxxl-io-single".into())
            .spawn(move || queue.worker_loop())
            .expect("spawning request-queue worker thread");
        *self.worker.lock() = Some(handle);
    }

    fn worker_loop(self: Arc<Self>) {
        debug!("single-fifo worker started");
        loop {
            let next = {
                let mut pending = self.pending.lock();
                loop {
                    if let Some(req) = pending.pop_front() {
                        break Some(req);
                    }
                    if *self.state.lock() == WorkerState::Terminating {
                        break None;
                    }
                    self.not_empty.wait(&mut pending);
                }
            };
            match next {
                Some(req) => {
                    let bytes = req.bytes();
                    let _timer = match req.op() {
                        OpType::Read => Timer::read(&self.stats, bytes),
                        OpType::Write => Timer::write(&self.stats, bytes),
                    };
                    req.run();
                }
                None => break,
            }
        }
        *self.state.lock() = WorkerState::Terminated;
        info!("single-fifo worker terminated");
    }
}

impl CancelTarget for SingleQueue {
    fn try_cancel(&self, req_id: u64) -> bool {
        let mut pending = self.pending.lock();
        if let Some(pos) = pending.iter().position(|r| r.id() == req_id) {
            pending.remove(pos);
            true
        } else {
            false
        }
    }

    fn stats(&self) -> &Stats {
        &self.stats
    }
}

impl RequestQueue for SingleQueue {
    fn add(self: Arc<Self>, req: Arc<Request>) {
        req.set_owner(self.clone());
        self.pending.lock().push_back(req);
        self.not_empty.notify_one();
    }

    fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    fn shutdown(&self) {
        {
            let _pending = self.pending.lock();
            let mut state = self.state.lock();
            if *state == WorkerState::Terminated || *state == WorkerState::Terminating {
                return;
            }
            *state = WorkerState::Terminating;
            self.not_empty.notify_all();
        }
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }

    fn worker_state(&self) -> WorkerState {
        *self.state.lock()
    }

    fn stats(&self) -> &Stats {
        &self.stats
    }
}

impl Drop for SingleQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::{FileBackend, MemoryFile};
    use crate::file::OpType;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn file() -> Arc<dyn FileBackend> {
        Arc::new(MemoryFile::new(0, 0, 1 << 20))
    }

    #[test]
    fn fifo_order_is_preserved() {
        let queue = SingleQueue::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut bufs: Vec<Vec<u8>> = (0..50).map(|_| vec![0u8; 64]).collect();
        let mut reqs = Vec::new();
        for (i, buf) in bufs.iter_mut().enumerate() {
            let order = order.clone();
            let req = unsafe {
                Request::new(
                    file(),
                    buf.as_mut_ptr(),
                    (i as u64) * 64,
                    64,
                    OpType::Write,
                    Some(Box::new(move |_| order.lock().push(i))),
                )
            };
            queue.clone().add(req.clone());
            reqs.push(req);
        }
        for req in &reqs {
            req.wait();
        }
        let seen = order.lock().clone();
        assert_eq!(seen, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn cancel_before_dispatch_skips_handler() {
        // A queue with no worker running yet (state flipped to
        // Terminating immediately) so add() always finds the request
        // still pending when we cancel it.
        let queue = SingleQueue::new();
        queue.shutdown();

        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();
        let mut buf = vec![0u8; 64];
        let req = unsafe {
            Request::new(
                file(),
                buf.as_mut_ptr(),
                0,
                64,
                OpType::Read,
                Some(Box::new(move |_| {
                    fired2.fetch_add(1, Ordering::SeqCst);
                })),
            )
        };
        queue.clone().add(req.clone());
        assert!(req.cancel());
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(req.poll());
    }

    #[test]
    fn completed_requests_are_reflected_in_stats() {
        let queue = SingleQueue::new();
        let mut buf = vec![0u8; 64];
        let req = unsafe { Request::new(file(), buf.as_mut_ptr(), 0, 64, OpType::Write, None) };
        queue.clone().add(req.clone());
        req.wait();
        let snap = queue.stats().snapshot();
        assert_eq!(snap.writes_started, 1);
        assert_eq!(snap.writes_finished, 1);
        assert_eq!(snap.bytes_written, 64);
    }
}
