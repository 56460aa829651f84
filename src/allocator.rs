//! Per-disk block allocator: a set of free byte extents over `[0,
//! capacity)`, allocated and freed in fixed-size runs.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::file::FileBackend;

/// Free extents keyed by `start_offset -> length_bytes`, always kept
/// disjoint and non-adjacent (touching extents are merged eagerly on
/// free).
pub struct BlockAllocator {
    file: Arc<dyn FileBackend>,
    free: Mutex<BTreeMap<u64, u64>>,
    capacity: AtomicU64,
    autogrow: bool,
    used: AtomicU64,
    peak_used: AtomicU64,
    cumulative_allocated: AtomicU64,
}

impl BlockAllocator {
    pub fn new(file: Arc<dyn FileBackend>, capacity: u64, autogrow: bool) -> Self {
        let mut free = BTreeMap::new();
        if capacity > 0 {
            free.insert(0, capacity);
        }
        BlockAllocator {
            file,
            free: Mutex::new(free),
            capacity: AtomicU64::new(capacity),
            autogrow,
            used: AtomicU64::new(0),
            peak_used: AtomicU64::new(0),
            cumulative_allocated: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity.load(Ordering::Relaxed)
    }

    pub fn used_bytes(&self) -> u64 {
        self.used.load(Ordering::Relaxed)
    }

    pub fn free_bytes(&self) -> u64 {
        self.capacity() - self.used_bytes()
    }

    pub fn peak_used_bytes(&self) -> u64 {
        self.peak_used.load(Ordering::Relaxed)
    }

    pub fn cumulative_allocated_bytes(&self) -> u64 {
        self.cumulative_allocated.load(Ordering::Relaxed)
    }

    /// Allocate `count` extents of `block_size` bytes each. Returns their
    /// starting offsets. On exhaustion: grows the backing file and
    /// retries if `autogrow` is set, otherwise fails with
    /// `Error::BadExtAlloc`.
    pub fn allocate(&self, block_size: u64, count: u64) -> Result<Vec<u64>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        loop {
            match self.try_allocate(block_size, count) {
                Some(offsets) => {
                    let bytes = block_size * count;
                    self.used.fetch_add(bytes, Ordering::Relaxed);
                    self.cumulative_allocated.fetch_add(bytes, Ordering::Relaxed);
                    self.peak_used
                        .fetch_max(self.used.load(Ordering::Relaxed), Ordering::Relaxed);
                    return Ok(offsets);
                }
                None => {
                    if !self.autogrow {
                        return Err(Error::bad_ext_alloc(format!(
                            "allocator exhausted: need {count} blocks of {block_size} bytes, {} free",
                            self.free_bytes()
                        )));
                    }
                    self.grow_by(block_size * count)?;
                }
            }
        }
    }

    fn try_allocate(&self, block_size: u64, count: u64) -> Option<Vec<u64>> {
        let mut offsets = Vec::with_capacity(count as usize);
        let mut free = self.free.lock();
        // Work on a scratch copy so a failed attempt (not enough total
        // free space) never mutates the real free set.
        let mut scratch = free.clone();
        let starts: Vec<u64> = scratch.keys().copied().collect();

        for start in starts {
            if offsets.len() as u64 >= count {
                break;
            }
            let len = match scratch.get(&start).copied() {
                Some(l) => l,
                None => continue,
            };
            let remaining = count - offsets.len() as u64;
            let usable_blocks = len / block_size;
            let take_blocks = usable_blocks.min(remaining);
            if take_blocks == 0 {
                continue;
            }
            let taken_bytes = take_blocks * block_size;
            for i in 0..take_blocks {
                offsets.push(start + i * block_size);
            }
            scratch.remove(&start);
            let new_start = start + taken_bytes;
            let new_len = len - taken_bytes;
            if new_len > 0 {
                scratch.insert(new_start, new_len);
            }
        }

        if offsets.len() as u64 == count {
            *free = scratch;
            Some(offsets)
        } else {
            None
        }
    }

    fn grow_by(&self, at_least: u64) -> Result<()> {
        let old_capacity = self.capacity.load(Ordering::Relaxed);
        let new_capacity = old_capacity + at_least.max(1);
        self.file.set_size(new_capacity)?;
        self.capacity.store(new_capacity, Ordering::Relaxed);
        let mut free = self.free.lock();
        let grown = at_least;
        merge_insert(&mut free, old_capacity, grown);
        warn!(
            old_capacity,
            new_capacity, "block allocator auto-grew backing file"
        );
        Ok(())
    }

    /// Free `count` blocks of `block_size` bytes starting at `offset`,
    /// merging with any touching neighbor extents.
    pub fn free(&self, offset: u64, block_size: u64, count: u64) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        let bytes = block_size * count;
        if offset + bytes > self.capacity() {
            return Err(Error::invariant(format!(
                "freeing extent ({offset}, {bytes}) outside capacity {}",
                self.capacity()
            )));
        }
        {
            let mut free = self.free.lock();
            merge_insert(&mut free, offset, bytes);
        }
        self.used.fetch_sub(bytes, Ordering::Relaxed);
        Ok(())
    }

    /// Debug-only dump of the free extent list.
    pub fn dump(&self) {
        let free = self.free.lock();
        let mut total = 0u64;
        for (start, len) in free.iter() {
            debug!(start, len, "free extent");
            total += len;
        }
        debug!(total, "total free bytes");
    }

    /// Snapshot of the free extents, for property tests that check
    /// canonicalized set equality.
    pub fn free_extents(&self) -> Vec<(u64, u64)> {
        self.free.lock().iter().map(|(&s, &l)| (s, l)).collect()
    }
}

/// Insert `(start, len)` into `free`, merging with a touching predecessor
/// and/or successor so the set stays disjoint and non-adjacent.
fn merge_insert(free: &mut BTreeMap<u64, u64>, mut start: u64, mut len: u64) {
    // Merge with predecessor if it touches `start`.
    if let Some((&p_start, &p_len)) = free.range(..start).next_back() {
        if p_start + p_len == start {
            free.remove(&p_start);
            start = p_start;
            len += p_len;
        }
    }
    // Merge with successor if it touches `start + len`.
    if let Some((&s_start, &s_len)) = free.range(start + len..).next() {
        if s_start == start + len {
            free.remove(&s_start);
            len += s_len;
        }
    }
    free.insert(start, len);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::MemoryFile;

    fn allocator(capacity: u64) -> BlockAllocator {
        let file: Arc<dyn FileBackend> = Arc::new(MemoryFile::new(0, 0, capacity));
        BlockAllocator::new(file, capacity, false)
    }

    #[test]
    fn fresh_allocator_is_one_extent() {
        let a = allocator(64 * 4096);
        assert_eq!(a.free_extents(), vec![(0, 64 * 4096)]);
    }

    #[test]
    fn sequential_allocation_is_contiguous() {
        let a = allocator(64 * 4096);
        let offsets = a.allocate(4096, 4).unwrap();
        assert_eq!(offsets, vec![0, 4096, 8192, 12288]);
    }

    #[test]
    fn coalescing_after_middle_frees() {
        let a = allocator(64 * 4096);
        let offsets = a.allocate(4096, 4).unwrap(); // b0..b3
        a.free(offsets[1], 4096, 1).unwrap(); // free b1
        a.free(offsets[2], 4096, 1).unwrap(); // free b2
        let extents = a.free_extents();
        assert!(extents.contains(&(4096, 8192)));
        assert!(!extents.iter().any(|&(s, _)| s == 8192 && extents.contains(&(4096, 4096))));
    }

    #[test]
    fn freeing_everything_restores_initial_state() {
        let a = allocator(16 * 4096);
        let offsets = a.allocate(4096, 16).unwrap();
        for off in &offsets {
            a.free(*off, 4096, 1).unwrap();
        }
        assert_eq!(a.free_extents(), vec![(0, 16 * 4096)]);
        assert_eq!(a.used_bytes(), 0);
    }

    #[test]
    fn exhaustion_without_autogrow_fails() {
        let a = allocator(2 * 4096);
        assert!(a.allocate(4096, 3).is_err());
    }

    #[test]
    fn autogrow_satisfies_oversized_request() {
        let file: Arc<dyn FileBackend> = Arc::new(MemoryFile::new(0, 0, 4096));
        let a = BlockAllocator::new(file, 4096, true);
        let offsets = a.allocate(4096, 3).unwrap();
        assert_eq!(offsets.len(), 3);
        assert!(a.capacity() >= 3 * 4096);
    }

    #[test]
    fn idempotent_alloc_free_alloc_same_layout() {
        let a = allocator(16 * 4096);
        let first = a.allocate(4096, 8).unwrap();
        for off in &first {
            a.free(*off, 4096, 1).unwrap();
        }
        let second = a.allocate(4096, 8).unwrap();
        let mut f = first.clone();
        let mut s = second.clone();
        f.sort();
        s.sort();
        assert_eq!(f, s);
    }
}
