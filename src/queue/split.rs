use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info};

use super::{RequestQueue, WorkerState};
use crate::file::OpType;
use crate::request::{CancelTarget, Request};
use crate::stats::{Stats, Timer};

struct Fifos {
    reads: VecDeque<Arc<Request>>,
    writes: VecDeque<Arc<Request>>,
}

impl Fifos {
    fn is_empty(&self) -> bool {
        self.reads.is_empty() && self.writes.is_empty()
    }

    fn len(&self) -> usize {
        self.reads.len() + self.writes.len()
    }
}

/// Two FIFOs, one per op kind, drained by a single worker that prefers
/// one kind (default `WRITE`) so write-heavy drains are not starved by
/// a read-heavy burst and vice versa.
pub struct SplitQueue {
    fifos: Mutex<Fifos>,
    not_empty: Condvar,
    prefer: OpType,
    state: Mutex<WorkerState>,
    worker: Mutex<Option<JoinHandle<()>>>,
    stats: Stats,
}

impl SplitQueue {
    pub fn new() -> Arc<Self> {
        Self::with_preference(OpType::Write)
    }

    pub fn with_preference(prefer: OpType) -> Arc<Self> {
        let queue = Arc::new(SplitQueue {
            fifos: Mutex::new(Fifos {
                reads: VecDeque::new(),
                writes: VecDeque::new(),
            }),
            not_empty: Condvar::new(),
            prefer,
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
            .name("stxxl-io-split".into())
            .spawn(move || queue.worker_loop())
            .expect("spawning split request-queue worker thread");
        *self.worker.lock() = Some(handle);
    }

    fn pop_preferred(fifos: &mut Fifos, prefer: OpType) -> Option<Arc<Request>> {
        let (first, second) = match prefer {
            OpType::Write => (&mut fifos.writes, &mut fifos.reads),
            OpType::Read => (&mut fifos.reads, &mut fifos.writes),
        };
        first.pop_front().or_else(|| second.pop_front())
    }

    fn worker_loop(self: Arc<Self>) {
        debug!("split worker started");
        loop {
            let next = {
                let mut fifos = self.fifos.lock();
                loop {
                    if let Some(req) = Self::pop_preferred(&mut fifos, self.prefer) {
                        break Some(req);
                    }
                    if *self.state.lock() == WorkerState::Terminating {
                        break None;
                    }
                    self.not_empty.wait(&mut fifos);
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
        info!("split worker terminated");
    }
}

impl CancelTarget for SplitQueue {
    fn try_cancel(&self, req_id: u64) -> bool {
        let mut fifos = self.fifos.lock();
        if let Some(pos) = fifos.reads.iter().position(|r| r.id() == req_id) {
            fifos.reads.remove(pos);
            return true;
        }
        if let Some(pos) = fifos.writes.iter().position(|r| r.id() == req_id) {
            fifos.writes.remove(pos);
            return true;
        }
        false
    }

    fn stats(&self) -> &Stats {
        &self.stats
    }
}

impl RequestQueue for SplitQueue {
    fn add(self: Arc<Self>, req: Arc<Request>) {
        req.set_owner(self.clone());
        let mut fifos = self.fifos.lock();
        match req.op() {
            OpType::Read => fifos.reads.push_back(req),
            OpType::Write => fifos.writes.push_back(req),
        }
        drop(fifos);
        self.not_empty.notify_one();
    }

    fn pending_len(&self) -> usize {
        self.fifos.lock().len()
    }

    fn shutdown(&self) {
        {
            let _fifos = self.fifos.lock();
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

impl Drop for SplitQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}
