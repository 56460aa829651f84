//! The block manager: the single entry point for block lifetime, batching
//! allocation and free requests across disks under an allocation strategy.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use crate::bid::Bid;
use crate::config::{DiskConfig, IoKind};
use crate::disk::Disk;
use crate::error::{Error, Result};
use crate::registry::{DiskQueues, QueueKind};
use crate::strategy::AllocationStrategy;

/// Process-wide facade over a set of disks and their allocators.
///
/// Owns every [`Disk`] it was built from; a request only ever holds a
/// non-owning reference to its file (see `src/request.rs`). The manager's
/// own mutex is held only across the grouping pass in `allocate_blocks`/
/// `free_blocks`, never across the per-disk allocator call or any I/O.
pub struct BlockManager {
    disks: Vec<Disk>,
    total_allocated: AtomicU64,
    peak_allocated: AtomicU64,
    cumulative_allocated: AtomicU64,
    grouping_lock: Mutex<()>,
}

impl BlockManager {
    /// Build a manager from disk configurations, opening each one and
    /// registering its queue in `registry`.
    pub fn build(configs: Vec<DiskConfig>, registry: &DiskQueues) -> Result<Self> {
        let mut disks = Vec::with_capacity(configs.len());
        for (index, cfg) in configs.into_iter().enumerate() {
            let kind = queue_kind_for(cfg.io_kind);
            disks.push(Disk::open(index, cfg, registry, kind)?);
        }
        Ok(BlockManager {
            disks,
            total_allocated: AtomicU64::new(0),
            peak_allocated: AtomicU64::new(0),
            cumulative_allocated: AtomicU64::new(0),
            grouping_lock: Mutex::new(()),
        })
    }

    pub fn disk_count(&self) -> usize {
        self.disks.len()
    }

    pub fn disk(&self, index: usize) -> &Disk {
        &self.disks[index]
    }

    /// Allocate `n` blocks of `block_size` bytes, distributed across
    /// disks by `strategy(i)` for `i in 0..n`. Results preserve the
    /// original sequence order regardless of grouping.
    pub fn allocate_blocks(
        &self,
        strategy: &dyn AllocationStrategy,
        block_size: u64,
        n: u64,
    ) -> Result<Vec<Bid>> {
        if n == 0 {
            return Ok(Vec::new());
        }

        // Group sequence positions by target disk so each allocator is
        // called once per batch, then scatter the results back.
        let mut groups: HashMap<usize, Vec<u64>> = HashMap::new();
        for i in 0..n {
            let disk = strategy.disk_for(i);
            if disk >= self.disks.len() {
                return Err(Error::invariant(format!(
                    "allocation strategy named disk {disk} but only {} disks are configured",
                    self.disks.len()
                )));
            }
            groups.entry(disk).or_default().push(i);
        }

        let _guard = self.grouping_lock.lock();
        let mut result: Vec<Option<Bid>> = vec![None; n as usize];
        for (disk_index, positions) in groups {
            let disk = &self.disks[disk_index];
            let offsets = disk.allocator().allocate(block_size, positions.len() as u64)?;
            for (pos, offset) in positions.into_iter().zip(offsets) {
                result[pos as usize] = Some(Bid::new(disk.file().clone(), offset, block_size));
            }
        }

        let bytes = block_size * n;
        self.total_allocated.fetch_add(bytes, Ordering::Relaxed);
        self.cumulative_allocated.fetch_add(bytes, Ordering::Relaxed);
        self.peak_allocated.fetch_max(
            self.total_allocated.load(Ordering::Relaxed),
            Ordering::Relaxed,
        );

        debug!(n, block_size, "allocated blocks");
        Ok(result.into_iter().map(|b| b.expect("every position filled")).collect())
    }

    /// Free `bids`, grouped by (file, block size) so each allocator sees
    /// one call per group, then `discard` each freed range.
    pub fn free_blocks(&self, bids: &[Bid]) -> Result<()> {
        if bids.is_empty() {
            return Ok(());
        }

        let mut total = 0u64;
        let _guard = self.grouping_lock.lock();
        for bid in bids {
            let disk_index = bid.disk_index();
            let disk = self
                .disks
                .get(disk_index)
                .ok_or_else(|| Error::invariant(format!("bid names unknown disk {disk_index}")))?;
            disk.allocator().free(bid.offset, bid.size, 1)?;
            bid.file.discard(bid.offset, bid.size)?;
            total += bid.size;
        }
        self.total_allocated.fetch_sub(total, Ordering::Relaxed);

        debug!(count = bids.len(), "freed blocks");
        Ok(())
    }

    pub fn total_allocated_bytes(&self) -> u64 {
        self.total_allocated.load(Ordering::Relaxed)
    }

    pub fn peak_allocated_bytes(&self) -> u64 {
        self.peak_allocated.load(Ordering::Relaxed)
    }

    pub fn cumulative_allocated_bytes(&self) -> u64 {
        self.cumulative_allocated.load(Ordering::Relaxed)
    }
}

fn queue_kind_for(io_kind: IoKind) -> QueueKind {
    Disk::default_queue_kind(io_kind)
}
