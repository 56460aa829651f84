use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::bid::Bid;
use crate::error::Result;
use crate::registry::DiskQueues;
use crate::request::Request;
use crate::stats::Stats;
use crate::typed_block::TypedBlock;

/// Bounded pool of typed blocks used to drain dirty data asynchronously.
/// `steal` hands a free block to the caller; `write` hands one back to
/// the pool, dispatches an async write, and the block rejoins the free
/// list once that write's completion handler fires (handler-before-
/// waiter, per `src/request.rs`, is what makes this safe to rely on).
pub struct WritePool<T: Copy + Send + 'static> {
    free: Mutex<VecDeque<TypedBlock<T>>>,
    not_empty: Condvar,
    capacity: Mutex<usize>,
    in_flight: Mutex<usize>,
    shrink_done: Condvar,
    stats: Stats,
}

impl<T: Copy + Send + 'static> WritePool<T> {
    /// Build a pool of `k` free blocks, each shaped like
    /// `TypedBlock::new(raw_size, alignment, ref_count, has_info)`.
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
        Ok(Arc::new(WritePool {
            free: Mutex::new(free),
            not_empty: Condvar::new(),
            capacity: Mutex::new(k),
            in_flight: Mutex::new(0),
            shrink_done: Condvar::new(),
            stats: Stats::new(),
        }))
    }

    /// Read/write counters recorded by writes this pool dispatched, plus
    /// this pool's own steal count.
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Block until a free block exists, then remove and return it.
    pub fn steal(&self) -> TypedBlock<T> {
        let mut free = self.free.lock();
        loop {
            if let Some(block) = free.pop_front() {
                self.stats.pool_steal();
                return block;
            }
            self.not_empty.wait(&mut free);
        }
    }

    /// Put a caller-owned block back onto the free list.
    pub fn add(&self, block: TypedBlock<T>) {
        self.free.lock().push_back(block);
        self.not_empty.notify_one();
    }

    /// Take ownership of `block`, initiate an async write to `bid`, and
    /// make the block free again once the write completes.
    pub fn write(self: &Arc<Self>, block: TypedBlock<T>, bid: &Bid, queues: &DiskQueues) -> Result<Arc<Request>> {
        *self.in_flight.lock() += 1;
        let slot = Arc::new(Mutex::new(Some(block)));
        let req = {
            let mut guard = slot.lock();
            let block_ref = guard.as_mut().expect("slot just populated");
            unsafe { block_ref.write(bid, queues, None)? }
        };

        let pool = self.clone();
        let slot_for_handler = slot.clone();
        req.add_waiter(move |_| {
            let block = slot_for_handler
                .lock()
                .take()
                .expect("write slot populated exactly once per dispatch");
            pool.add(block);
            *pool.in_flight.lock() -= 1;
            pool.shrink_done.notify_all();
        });
        Ok(req)
    }

    /// Grow or shrink the pool's capacity. Shrinking below the number of
    /// writes currently in flight blocks until enough complete.
    pub fn resize(&self, k: usize) {
        let mut in_flight = self.in_flight.lock();
        while k < *in_flight {
            self.shrink_done.wait(&mut in_flight);
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

    pub fn in_flight_count(&self) -> usize {
        *self.in_flight.lock()
    }
}
