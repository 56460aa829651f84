//! The reified I/O request: a single in-flight read or write that can be
//! waited on, polled, or cancelled, and that fires its completion handler
//! exactly once.
//!
//! The source library models this with an intrusive reference-counted
//! handle; here shared ownership is just `Arc<Request>` (see DESIGN.md,
//! REDESIGN FLAGS): the request's own strong reference held by its queue
//! while `serve` runs is what keeps it alive even if every caller has
//! already dropped its handle.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::file::{FileBackend, OpType};
use crate::stats::Stats;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// `OP -> DONE -> READY_TO_DIE`, monotone. `READY_TO_DIE` is terminal;
/// the `Request` is dropped once its last `Arc` reference goes away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Op,
    Done,
    ReadyToDie,
}

pub type CompletionHandler = Box<dyn FnOnce(&Request) + Send + 'static>;

struct Inner {
    state: RequestState,
    error: Option<Error>,
    canceled: bool,
    on_complete: Option<CompletionHandler>,
    waiters: Vec<CompletionHandler>,
}

/// A non-owning handle to whatever queue a request was enqueued on, used
/// so `Request::cancel` can ask that queue to drop it before it is
/// dispatched, and so `Request::wait` can record time spent waiting on
/// that queue's `Stats`.
pub trait CancelTarget: Send + Sync {
    fn try_cancel(&self, req_id: u64) -> bool;
    fn stats(&self) -> &Stats;
}

/// One in-flight `READ` or `WRITE`.
pub struct Request {
    id: u64,
    file: Arc<dyn FileBackend>,
    buffer: *mut u8,
    offset: u64,
    bytes: u64,
    op: OpType,
    inner: Mutex<Inner>,
    cv: Condvar,
    owner: Mutex<Option<Arc<dyn CancelTarget>>>,
}

// SAFETY: `buffer` is only ever dereferenced inside `serve`, which the
// caller (the constructing code) has already guaranteed is valid for the
// request's lifetime; `Request` itself performs no aliased access.
unsafe impl Send for Request {}
unsafe impl Sync for Request {}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("offset", &self.offset)
            .field("bytes", &self.bytes)
            .field("op", &self.op)
            .field("state", &self.inner.lock().state)
            .finish()
    }
}

impl Request {
    /// # Safety
    /// `buffer` must remain valid for `bytes` bytes, with the access mode
    /// implied by `op`, until the request reaches `DONE`.
    pub unsafe fn new(
        file: Arc<dyn FileBackend>,
        buffer: *mut u8,
        offset: u64,
        bytes: u64,
        op: OpType,
        on_complete: Option<CompletionHandler>,
    ) -> Arc<Request> {
        Arc::new(Request {
            id: NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed),
            file,
            buffer,
            offset,
            bytes,
            op,
            inner: Mutex::new(Inner {
                state: RequestState::Op,
                error: None,
                canceled: false,
                on_complete,
                waiters: Vec::new(),
            }),
            cv: Condvar::new(),
            owner: Mutex::new(None),
        })
    }

    pub fn with_alignment_check(self: Arc<Self>, alignment: u64) -> Result<Arc<Self>> {
        if self.offset % alignment != 0 || self.bytes % alignment != 0 || self.buffer as u64 % alignment != 0 {
            return Err(Error::invariant(format!(
                "request offset={} bytes={} buffer={:p} not aligned to {alignment}",
                self.offset, self.bytes, self.buffer
            )));
        }
        Ok(self)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn op(&self) -> OpType {
        self.op
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn file(&self) -> &Arc<dyn FileBackend> {
        &self.file
    }

    /// Record which queue dispatched this request, so `cancel` knows who
    /// to ask.
    pub(crate) fn set_owner(&self, owner: Arc<dyn CancelTarget>) {
        *self.owner.lock() = Some(owner);
    }

    /// Call `file.serve` and transition to `DONE`. Called by a queue
    /// worker; never call this from user code.
    pub(crate) fn run(self: &Arc<Self>) {
        let before = Arc::strong_count(self);
        let error = self.serve_only();
        let after = Arc::strong_count(self);
        if after < before {
            warn!(request = self.id, "reference dropped during serve(); logic error");
        }
        self.finish(error);
    }

    /// Perform the raw I/O without transitioning state. Used by queue
    /// variants (the kernel-AIO queue) that submit and reap on different
    /// threads.
    pub(crate) fn serve_only(&self) -> Option<Error> {
        let result = unsafe { self.file.serve(self.buffer, self.offset, self.bytes, self.op) };
        result.err()
    }

    /// Transition to `DONE` carrying `error` (or success if `None`).
    pub(crate) fn finish(self: &Arc<Self>, error: Option<Error>) {
        self.complete_with(error, false);
    }

    /// Terminal transition. Idempotent: only the first call has any
    /// effect, guaranteeing the completion handler fires at most once.
    fn complete_with(self: &Arc<Self>, error: Option<Error>, canceled: bool) {
        let handler = {
            let mut inner = self.inner.lock();
            if inner.state != RequestState::Op {
                return;
            }
            inner.state = RequestState::Done;
            inner.error = error;
            inner.canceled = canceled;
            inner.on_complete.take()
        };

        debug!(request = self.id, canceled, "request completed");

        if let Some(h) = handler {
            h(self);
        }

        let waiters = {
            let mut inner = self.inner.lock();
            std::mem::take(&mut inner.waiters)
        };
        for w in waiters {
            w(self);
        }

        {
            let mut inner = self.inner.lock();
            inner.state = RequestState::ReadyToDie;
        }
        self.cv.notify_all();
    }

    /// Called by the worker loop instead of `run` when `serve` raised an
    /// error before this request's turn (never used for a normal
    /// success/failure completion, which always goes through `run`).
    pub(crate) fn complete(self: &Arc<Self>, canceled: bool) {
        self.complete_with(None, canceled);
    }

    /// Block until the request reaches `DONE`/`READY_TO_DIE`, recording
    /// the elapsed time on the owning queue's `Stats` (wait-on-read or
    /// wait-on-write, per spec.md's statistics hooks).
    pub fn wait(&self) {
        let started = Instant::now();
        {
            let mut inner = self.inner.lock();
            while inner.state == RequestState::Op {
                self.cv.wait(&mut inner);
            }
        }
        if let Some(owner) = self.owner.lock().clone() {
            let elapsed = started.elapsed();
            match self.op {
                OpType::Read => owner.stats().wait_on_read(elapsed),
                OpType::Write => owner.stats().wait_on_write(elapsed),
            }
        }
    }

    /// Non-blocking completion check.
    pub fn poll(&self) -> bool {
        self.inner.lock().state != RequestState::Op
    }

    /// Register a callback to run at completion. If the request is
    /// already done, the callback runs immediately (without taking the
    /// request's own lock). Ordered with respect to completion: a
    /// waiter added after the request is already done never misses the
    /// notification, and one added before it is flushed alongside every
    /// other waiter at completion.
    pub fn add_waiter<F: FnOnce(&Request) + Send + 'static>(self: &Arc<Self>, f: F) {
        let mut inner = self.inner.lock();
        if inner.state == RequestState::Op {
            inner.waiters.push(Box::new(f));
        } else {
            drop(inner);
            f(self);
        }
    }

    pub fn error_occurred(&self) -> bool {
        self.inner.lock().error.is_some()
    }

    pub fn error_text(&self) -> Option<String> {
        self.inner.lock().error.as_ref().map(|e| e.to_string())
    }

    pub fn was_canceled(&self) -> bool {
        self.inner.lock().canceled
    }

    pub fn state(&self) -> RequestState {
        self.inner.lock().state
    }

    /// Ask the owning queue to drop this request before it is dispatched.
    /// Returns `true` iff that succeeded, in which case the completion
    /// handler will never fire. Otherwise the caller must still `wait`.
    pub fn cancel(self: &Arc<Self>) -> bool {
        let owner = self.owner.lock().clone();
        let Some(owner) = owner else { return false };
        if owner.try_cancel(self.id) {
            self.complete_with(None, true);
            true
        } else {
            false
        }
    }
}
