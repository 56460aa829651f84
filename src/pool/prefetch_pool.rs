use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::bid::Bid;
use crate::error::Result;
use crate::registry::DiskQueues;
use crate::request::Request;
use crate::stats::Stats;
use crate::typed_block::TypedBlock;

/// Identifies a `Bid` for the pending-prefetch map without requiring
/// `Bid` itself to implement `Hash`: two `Bid`s key the same entry iff
/// they name the same file object and byte range, matching `Bid::eq`.
fn bid_key(bid: &Bid) -> (usize, u64, u64) {
    (Arc::as_ptr(&bid.file) as *const () as usize, bid.offset, bid.size)
}

struct Pending<T: Copy> {
    request: Arc<Request>,
    slot: Arc<Mutex<Option<TypedBlock<T>>>>,
}

/// Bounded pool of typed blocks used to read ahead of consumption.
/// `hint` starts a read into a free block and remembers it by BID;
/// `read` either joins an already-running hint or issues a fresh read.
pub struct PrefetchPool<T: Copy + Send + 'static> {
    free: Mutex<VecDeque<TypedBlock<T>>>,
    not_empty: Condvar,
    pending: Mutex<HashMap<(usize, u64, u64), Pending<T>>>,
    capacity: Mutex<usize>,
    shrink_done: Condvar,
    stats: Stats,
}

impl<T: Copy + Send + 'static> PrefetchPool<T> {
    pub fn new(
        k: usize,
        raw_size: u64,
        alignment: u64,
        ref_count: usize,
        has_info: bool,
    ) -> Result<Arc<Self>> {
        let mut free = VecDeque::with_capacity(k);
        for _ in 0..k {
            free.push_back(TypedBlock::new(raw_size, alignment, ref_count, has_info)?);
        }
        Ok(Arc::new(PrefetchPool {
            free: Mutex::new(free),
            not_empty: Condvar::new(),
            pending: Mutex::new(HashMap::new()),
            capacity: Mutex::new(k),
            shrink_done: Condvar::new(),
            stats: Stats::new(),
        }))
    }

    /// Read counters recorded by reads this pool dispatched, plus this
    /// pool's own steal/hit counts.
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    fn steal(&self) -> TypedBlock<T> {
        let mut free = self.free.lock();
        loop {
            if let Some(block) = free.pop_front() {
                self.stats.pool_steal();
                return block;
            }
            self.not_empty.wait(&mut free);
        }
    }

    fn add(&self, block: TypedBlock<T>) {
        self.free.lock().push_back(block);
        self.not_empty.notify_one();
    }

    /// Start an async read of `bid` into a free block, recording the
    /// mapping so a matching `read` call can join it.
    pub fn hint(&self, bid: &Bid, queues: &DiskQueues) -> Result<()> {
        let block = self.steal();
        let slot = Arc::new(Mutex::new(Some(block)));
        let request = {
            let mut guard = slot.lock();
            let block_ref = guard.as_mut().expect("slot just populated");
            unsafe { block_ref.read(bid, queues, None)? }
        };
        self.pending.lock().insert(bid_key(bid), Pending { request, slot });
        Ok(())
    }

    /// If a hint for `bid` is in flight, join it: the caller's `block` is
    /// returned to the free list and the hinted block (with its request)
    /// is handed back instead. Otherwise issue a fresh read into `block`.
    pub fn read(
        &self,
        block: TypedBlock<T>,
        bid: &Bid,
        queues: &DiskQueues,
    ) -> Result<(TypedBlock<T>, Arc<Request>)> {
        let pending = self.pending.lock().remove(&bid_key(bid));
        if let Some(Pending { request, slot }) = pending {
            self.stats.pool_hit();
            self.add(block);
            self.shrink_done.notify_all();
            let filled = slot.lock().take().expect("pending slot populated until joined");
            Ok((filled, request))
        } else {
            let mut owned = block;
            let request = unsafe { owned.read(bid, queues, None)? };
            Ok((owned, request))
        }
    }

    /// Cancel a running prefetch for `bid` if it hasn't started serving
    /// yet. Returns `true` if it was cancelled (its block rejoins the
    /// free list); `false` if there was no such hint or it could not be
    /// cancelled, in which case the caller must eventually `read` it.
    pub fn invalidate(&self, bid: &Bid) -> bool {
        let key = bid_key(bid);
        let mut pending = self.pending.lock();
        let Some(entry) = pending.get(&key) else {
            return false;
        };
        if !entry.request.cancel() {
            return false;
        }
        let entry = pending.remove(&key).expect("just looked up");
        drop(pending);
        if let Some(block) = entry.slot.lock().take() {
            self.add(block);
        }
        self.shrink_done.notify_all();
        true
    }

    /// Grow or shrink the pool's capacity. Shrinking below the number of
    /// prefetches currently pending blocks until enough are joined or
    /// invalidated.
    pub fn resize(&self, k: usize) {
        let mut pending_len = self.pending.lock().len();
        while k < pending_len {
            let mut guard = self.pending.lock();
            self.shrink_done.wait(&mut guard);
            pending_len = guard.len();
        }
        *self.capacity.lock() = k;
        let mut free = self.free.lock();
        while free.len() > k {
            free.pop_back();
        }
    }

    pub fn capacity(&self) -> usize {
        *self.capacity.lock()
    }

    pub fn free_count(&self) -> usize {
        self.free.lock().len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DiskConfig, IoKind};
    use crate::disk::Disk;
    use crate::registry::QueueKind;

    fn setup(k: usize) -> (Arc<PrefetchPool<u64>>, Disk, DiskQueues) {
        let registry = DiskQueues::new();
        let cfg = DiskConfig::new("mem-pp", 64 * 4096, IoKind::Memory);
        let disk = Disk::open(0, cfg, &registry, QueueKind::Single).unwrap();
        let pool = PrefetchPool::new(k, 4096, 4096, 0, false).unwrap();
        (pool, disk, registry)
    }

    #[test]
    fn read_without_a_hint_issues_a_fresh_request() {
        let (pool, disk, registry) = setup(2);
        let bid = Bid::new(disk.file().clone(), 0, 4096);
        let block = pool.steal();
        let (block, req) = pool.read(block, &bid, &registry).unwrap();
        req.wait();
        assert!(!req.error_occurred());
        drop(block);
    }

    #[test]
    fn read_joins_a_running_hint() {
        let (pool, disk, registry) = setup(2);
        let bid = Bid::new(disk.file().clone(), 0, 4096);
        pool.hint(&bid, &registry).unwrap();
        assert_eq!(pool.pending_count(), 1);

        let spare = pool.steal();
        let (filled, req) = pool.read(spare, &bid, &registry).unwrap();
        req.wait();
        assert!(!req.error_occurred());
        assert_eq!(pool.pending_count(), 0);
        assert_eq!(pool.stats().snapshot().pool_hits, 1);
        drop(filled);
    }

    #[test]
    fn invalidate_removes_a_not_yet_started_hint() {
        let (pool, disk, registry) = setup(1);
        let bid = Bid::new(disk.file().clone(), 0, 4096);
        pool.hint(&bid, &registry).unwrap();
        // Best-effort: may already have been served by the single worker
        // thread, in which case invalidation legitimately fails and the
        // entry is still there to be joined by `read`.
        let invalidated = pool.invalidate(&bid);
        if invalidated {
            assert_eq!(pool.pending_count(), 0);
            assert_eq!(pool.free_count(), 1);
        }
    }
}
