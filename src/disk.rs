//! One configured disk: its backing file, its free-extent allocator, and
//! the request queue its blocks are served through.

use std::sync::Arc;

use tracing::info;

use crate::allocator::BlockAllocator;
use crate::config::{DiskConfig, DiskFlags, IoKind};
use crate::error::Result;
use crate::file::{self, FileBackend};
use crate::registry::{DiskQueues, QueueKind};

/// A disk is a backing file plus the allocator that carves it into
/// blocks plus the queue id requests against it are dispatched on.
/// Constructing one opens (or creates) the backing store and registers
/// its queue, but starts no I/O.
pub struct Disk {
    index: usize,
    config: DiskConfig,
    file: Arc<dyn FileBackend>,
    allocator: BlockAllocator,
    queue_id: i64,
}

impl Disk {
    /// Open `config` as disk `index`, constructing (or reusing) its
    /// queue in `registry` per `queue_kind`.
    pub fn open(
        index: usize,
        config: DiskConfig,
        registry: &DiskQueues,
        queue_kind: QueueKind,
    ) -> Result<Self> {
        let file = file::open(&config, index)?;
        let queue_id = file.queue_id();
        registry.get_or_create(queue_id, queue_kind);

        let capacity = file.size().max(config.capacity);
        let autogrow = config.flags.contains(DiskFlags::AUTOGROW);
        let allocator = BlockAllocator::new(file.clone(), capacity, autogrow);

        info!(
            index,
            path = %config.path,
            io = config.io_kind.as_str(),
            capacity,
            queue_id,
            autogrow,
            "disk opened"
        );

        Ok(Disk {
            index,
            config,
            file,
            allocator,
            queue_id,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn config(&self) -> &DiskConfig {
        &self.config
    }

    pub fn file(&self) -> &Arc<dyn FileBackend> {
        &self.file
    }

    pub fn allocator(&self) -> &BlockAllocator {
        &self.allocator
    }

    pub fn queue_id(&self) -> i64 {
        self.queue_id
    }

    pub fn io_kind(&self) -> IoKind {
        self.config.io_kind
    }

    /// Natural queue kind for this disk's `IoKind`, used when a caller
    /// hasn't opted into a different queue policy. The AIO ring is sized
    /// proportional to CPU count (the source library sizes its per-CPU
    /// synchronization primitives the same way; see DESIGN.md) rather
    /// than a single global constant, so a multi-disk AIO setup on a
    /// larger machine doesn't serialize submissions behind one small ring.
    pub fn default_queue_kind(io_kind: IoKind) -> QueueKind {
        match io_kind {
            IoKind::LinuxAio | IoKind::PosixAio => QueueKind::Aio {
                max_events: (num_cpus::get() * 16).max(32),
            },
            _ => QueueKind::Split,
        }
    }
}

impl Drop for Disk {
    /// Honors `delete_on_exit`: removes the backing path when this disk's
    /// teardown runs. Best-effort: a missing file (already unlinked via
    /// `unlink_on_open`, or a directory-per-block backend) is not an error.
    fn drop(&mut self) {
        if self.config.flags.contains(DiskFlags::DELETE_ON_EXIT) {
            let path = &self.config.path;
            let _ = std::fs::remove_file(path).or_else(|_| std::fs::remove_dir_all(path));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IoKind;

    #[test]
    fn opening_registers_a_queue() {
        let registry = DiskQueues::new();
        let cfg = DiskConfig::new("mem0", 64 * 4096, IoKind::Memory);
        let before = registry.queue_count();
        let disk = Disk::open(7, cfg, &registry, QueueKind::Single).unwrap();
        assert_eq!(disk.index(), 7);
        assert!(registry.queue_count() > before);
        assert!(registry.get(disk.queue_id()).is_some());
    }

    #[test]
    fn allocator_capacity_matches_config() {
        let registry = DiskQueues::new();
        let cfg = DiskConfig::new("mem1", 32 * 4096, IoKind::Memory);
        let disk = Disk::open(0, cfg, &registry, QueueKind::Single).unwrap();
        assert_eq!(disk.allocator().capacity(), 32 * 4096);
    }
}
