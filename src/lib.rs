//! External-memory block substrate: disk-backed block allocation,
//! asynchronous I/O request queues, and overlapped prefetch/write pools
//! for out-of-core algorithms.
//!
//! This crate implements the core of an STXXL-style library: the layer
//! below user-facing containers (vectors, priority queues, sorters) that
//! partitions backing files into aligned blocks, allocates and frees
//! them with a configurable striping policy, and serves reads and writes
//! through per-disk request queues so streaming algorithms can overlap
//! I/O with computation. Containers and streaming algorithms themselves
//! are out of scope here (see `DESIGN.md`).
//!
//! Module map, leaves first:
//! - [`alignment`]: aligned buffer allocation for direct I/O.
//! - [`file`]: the `FileBackend` capability trait and its concrete
//!   backends (syscall, mmap, in-memory, one-file-per-block).
//! - [`request`]: the reified I/O request and its state machine.
//! - [`queue`]: per-disk request queues and their worker threads.
//! - [`registry`]: the process-wide queue-id routing table.
//! - [`allocator`]: the per-disk free-extent allocator.
//! - [`manager`]: the block manager, the single entry point for block
//!   lifetime.
//! - [`strategy`]: allocation strategies (striping, random, cyclic...).
//! - [`bid`]: block identifiers.
//! - [`typed_block`]: the fixed-size, aligned unit of I/O.
//! - [`pool`]: prefetch and write pools that overlap I/O with
//!   computation.
//! - [`schedule`]: the prudent-prefetching schedule algorithm.
//! - [`disk`]: one configured disk: file, allocator, and queue id.
//! - [`config`]: disk configuration parsing and open-mode flags.
//! - [`stats`]: statistics hooks.
//! - [`error`]: the crate-wide error taxonomy.

pub mod alignment;
pub mod allocator;
pub mod bid;
pub mod config;
pub mod disk;
pub mod error;
pub mod file;
pub mod manager;
pub mod pool;
pub mod queue;
pub mod registry;
pub mod request;
pub mod schedule;
pub mod stats;
pub mod strategy;
pub mod typed_block;

pub use bid::Bid;
pub use disk::Disk;
pub use error::{Error, Result};
pub use manager::BlockManager;
pub use registry::DiskQueues;
pub use request::Request;
pub use stats::Stats;

/// Block alignment (and direct-I/O alignment) assumed when a caller does
/// not specify one of its own; 4096 bytes matches common page and sector
/// sizes.
pub const DEFAULT_BLOCK_ALIGNMENT: u64 = 4096;

/// Top-level configuration for building a [`BlockManager`]: the set of
/// disks plus crate-wide defaults. A `Config`-with-`Default` struct
/// rather than threading bare constructor arguments through every call
/// site (see `DESIGN.md`).
#[derive(Debug, Clone)]
pub struct BlockManagerConfig {
    pub disks: Vec<config::DiskConfig>,
    pub block_alignment: u64,
}

impl Default for BlockManagerConfig {
    fn default() -> Self {
        BlockManagerConfig {
            disks: Vec::new(),
            block_alignment: DEFAULT_BLOCK_ALIGNMENT,
        }
    }
}

impl BlockManagerConfig {
    /// Parse a multi-line disk configuration file (one `disk=...`
    /// declaration per non-empty, non-comment line).
    pub fn parse(text: &str) -> Result<Self> {
        let mut disks = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            disks.push(config::DiskConfig::parse_line(line)?);
        }
        Ok(BlockManagerConfig {
            disks,
            block_alignment: DEFAULT_BLOCK_ALIGNMENT,
        })
    }

    /// Build the [`BlockManager`] this configuration describes, registering
    /// every disk's queue in `registry`.
    pub fn build(self, registry: &DiskQueues) -> Result<BlockManager> {
        BlockManager::build(self.disks, registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IoKind;

    #[test]
    fn default_config_has_no_disks_and_standard_alignment() {
        let cfg = BlockManagerConfig::default();
        assert!(cfg.disks.is_empty());
        assert_eq!(cfg.block_alignment, 4096);
    }

    #[test]
    fn parse_builds_a_manager_from_text() {
        let text = "\n# comment\ndisk=mem0,1048576,memory\ndisk=mem1,1048576,memory\n";
        let cfg = BlockManagerConfig::parse(text).unwrap();
        assert_eq!(cfg.disks.len(), 2);
        assert_eq!(cfg.disks[0].io_kind, IoKind::Memory);

        let registry = DiskQueues::new();
        let manager = cfg.build(&registry).unwrap();
        assert_eq!(manager.disk_count(), 2);
    }
}
