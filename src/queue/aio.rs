use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info};

use super::{RequestQueue, WorkerState};
use crate::error::Error;
use crate::file::OpType;
use crate::request::{CancelTarget, Request};
use crate::stats::Stats;

type Completion = (Arc<Request>, Option<Error>, Instant);

/// Kernel-AIO-style queue: a submitter thread moves requests from a
/// "waiting" FIFO into a kernel-visible "posted" set bounded by
/// `max_events`, and a reaper thread drains completions independently.
/// This decouples submission pacing from completion notification the way
/// a real io_uring/POSIX-AIO ring does; a posted request cannot be
/// cancelled; only `wait` can observe it finish.
pub struct AioQueue {
    waiting: Mutex<VecDeque<Arc<Request>>>,
    posted: Mutex<HashSet<u64>>,
    not_empty: Condvar,
    slot_free: Condvar,
    max_events: usize,
    completions_tx: Mutex<Option<Sender<Completion>>>,
    completions_rx: Receiver<Completion>,
    state: Mutex<WorkerState>,
    submitter: Mutex<Option<JoinHandle<()>>>,
    reaper: Mutex<Option<JoinHandle<()>>>,
    stats: Stats,
}

impl AioQueue {
    pub fn new(max_events: usize) -> Arc<Self> {
        let (tx, rx) = channel::unbounded();
        let queue = Arc::new(AioQueue {
            waiting: Mutex::new(VecDeque::new()),
            posted: Mutex::new(HashSet::new()),
            not_empty: Condvar::new(),
            slot_free: Condvar::new(),
            max_events: max_events.max(1),
            completions_tx: Mutex::new(Some(tx)),
            completions_rx: rx,
            state: Mutex::new(WorkerState::NotRunning),
            submitter: Mutex::new(None),
            reaper: Mutex::new(None),
            stats: Stats::new(),
        });
        queue.start();
        queue
    }

    /// Read/write counters and wait timings this queue's threads have
    /// recorded.
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    fn start(self: &Arc<Self>) {
        *self.state.lock() = WorkerState::Running;

        let submitter_queue = self.clone();
        let submitter = std::thread::Builder::new()
            .name("stxxl-aio-submit".into())
            .spawn(move || submitter_queue.submit_loop())
            .expect("spawning AIO submitter thread");
        *self.submitter.lock() = Some(submitter);

        let reaper_queue = self.clone();
        let reaper = std::thread::Builder::new()
            .name("stxxl-aio-reap".into())
            .spawn(move || reaper_queue.reap_loop())
            .expect("spawning AIO reaper thread");
        *self.reaper.lock() = Some(reaper);
    }

    fn submit_loop(self: Arc<Self>) {
        debug!("AIO submitter started");
        loop {
            let req = {
                let mut waiting = self.waiting.lock();
                loop {
                    if let Some(req) = waiting.pop_front() {
                        break Some(req);
                    }
                    if *self.state.lock() == WorkerState::Terminating {
                        break None;
                    }
                    self.not_empty.wait(&mut waiting);
                }
            };
            let Some(req) = req else { break };

            {
                let mut posted = self.posted.lock();
                loop {
                    if posted.len() < self.max_events {
                        break;
                    }
                    if *self.state.lock() == WorkerState::Terminating {
                        break;
                    }
                    self.slot_free.wait(&mut posted);
                }
                posted.insert(req.id());
            }

            let started = Instant::now();
            match req.op() {
                OpType::Read => self.stats.read_started(),
                OpType::Write => self.stats.write_started(),
            }
            let error = req.serve_only();
            let tx = self.completions_tx.lock().clone();
            if let Some(tx) = tx {
                let _ = tx.send((req, error, started));
            }
        }
        debug!("AIO submitter terminated");
    }

    fn reap_loop(self: Arc<Self>) {
        debug!("AIO reaper started");
        while let Ok((req, error, started)) = self.completions_rx.recv() {
            self.posted.lock().remove(&req.id());
            self.slot_free.notify_one();
            let elapsed = started.elapsed();
            match req.op() {
                OpType::Read => self.stats.read_finished(req.bytes(), elapsed),
                OpType::Write => self.stats.write_finished(req.bytes(), elapsed),
            }
            req.finish(error);
        }
        *self.state.lock() = WorkerState::Terminated;
        info!("AIO reaper terminated");
    }
}

impl CancelTarget for AioQueue {
    fn try_cancel(&self, req_id: u64) -> bool {
        // Posted (kernel-visible) requests cannot be cancelled; only
        // requests still in the waiting FIFO can be.
        if self.posted.lock().contains(&req_id) {
            return false;
        }
        let mut waiting = self.waiting.lock();
        if let Some(pos) = waiting.iter().position(|r| r.id() == req_id) {
            waiting.remove(pos);
            true
        } else {
            false
        }
    }

    fn stats(&self) -> &Stats {
        &self.stats
    }
}

impl RequestQueue for AioQueue {
    fn add(self: Arc<Self>, req: Arc<Request>) {
        req.set_owner(self.clone());
        self.waiting.lock().push_back(req);
        self.not_empty.notify_one();
    }

    fn pending_len(&self) -> usize {
        self.waiting.lock().len() + self.posted.lock().len()
    }

    fn shutdown(&self) {
        {
            let _waiting = self.waiting.lock();
            let _posted = self.posted.lock();
            let mut state = self.state.lock();
            if *state == WorkerState::Terminated || *state == WorkerState::Terminating {
                return;
            }
            *state = WorkerState::Terminating;
            self.not_empty.notify_all();
            self.slot_free.notify_all();
        }
        // Dropping the sender lets the reaper's recv() observe
        // disconnection once all in-flight completions have drained.
        *self.completions_tx.lock() = None;

        if let Some(handle) = self.submitter.lock().take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.reaper.lock().take() {
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

impl Drop for AioQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::{FileBackend, MemoryFile, OpType};

    fn file() -> Arc<dyn FileBackend> {
        Arc::new(MemoryFile::new(0, 0, 1 << 20))
    }

    #[test]
    fn bounded_concurrency_still_completes_all() {
        let queue = AioQueue::new(2);
        let mut bufs: Vec<Vec<u8>> = (0..20).map(|_| vec![0u8; 64]).collect();
        let mut reqs = Vec::new();
        for (i, buf) in bufs.iter_mut().enumerate() {
            let req = unsafe {
                Request::new(file(), buf.as_mut_ptr(), (i as u64) * 64, 64, OpType::Write, None)
            };
            queue.clone().add(req.clone());
            reqs.push(req);
        }
        for req in &reqs {
            req.wait();
            assert!(!req.error_occurred());
        }
        let snap = queue.stats().snapshot();
        assert_eq!(snap.writes_started, 20);
        assert_eq!(snap.writes_finished, 20);
        assert_eq!(snap.bytes_written, 20 * 64);
    }

    #[test]
    fn posted_request_cannot_be_cancelled_but_waiting_can() {
        let queue = AioQueue::new(1);
        let mut buf1 = vec![0u8; 64];
        let mut buf2 = vec![0u8; 64];
        let req1 = unsafe { Request::new(file(), buf1.as_mut_ptr(), 0, 64, OpType::Write, None) };
        let req2 = unsafe { Request::new(file(), buf2.as_mut_ptr(), 64, 64, OpType::Write, None) };
        queue.clone().add(req1.clone());
        queue.clone().add(req2.clone());
        req1.wait();
        req2.wait();
        // Both complete regardless of cancel races; this exercises the
        // bounded-posted-set path without depending on scheduling order
        // for correctness.
        assert!(req1.poll());
        assert!(req2.poll());
    }
}
