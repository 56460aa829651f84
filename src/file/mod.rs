//! File backends: synchronous-serve, asynchronous-enqueue handles onto one
//! backing store.
//!
//! `FileBackend` is the capability interface every disk's file is built
//! against; concrete backends are selected by `IoKind` at disk
//! construction and never again inspected by name: a trait object over
//! a fixed set of concrete backends rather than a class hierarchy (see
//! DESIGN.md).

mod file_per_block;
mod memory;
mod mmap_file;
mod syscall;

pub use file_per_block::FilePerBlockFile;
pub use memory::MemoryFile;
pub use mmap_file::MmapFile;
pub use syscall::SyscallFile;

use std::fmt;

use crate::config::{DiskFlags, OpenFlags, DEFAULT_QUEUE, NO_ALLOCATOR};
use crate::error::Result;

/// Direction of one `serve` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpType {
    Read,
    Write,
}

/// A handle onto one backing store.
///
/// `serve` is the only primitive every backend must implement correctly;
/// everything above it (requests, queues, pools) is built in terms of
/// `serve` plus bookkeeping. Implementations must make `serve` safe to
/// call concurrently from multiple threads: the substrate relies on
/// that to let one disk's queue worker overlap with another's.
pub trait FileBackend: Send + Sync + fmt::Debug {
    fn size(&self) -> u64;

    fn set_size(&self, bytes: u64) -> Result<()>;

    /// Synchronous I/O primitive.
    ///
    /// # Safety
    /// `buffer` must be valid for `bytes` bytes: readable for the
    /// duration of the call when `op == Write`, writable when `op ==
    /// Read`. The caller (a `Request`, almost always) is responsible for
    /// keeping the buffer alive and non-aliased until `serve` returns.
    unsafe fn serve(&self, buffer: *mut u8, offset: u64, bytes: u64, op: OpType) -> Result<()>;

    /// Inform the backend that `[offset, offset + bytes)` may be reused.
    /// A no-op is always a correct implementation; see DESIGN.md for the
    /// scrubbing policy each backend follows.
    fn discard(&self, offset: u64, bytes: u64) -> Result<()> {
        let _ = (offset, bytes);
        Ok(())
    }

    /// Flush any buffering down to the backing store. A no-op is a
    /// correct implementation for backends with no write-back buffering
    /// of their own.
    fn sync(&self) -> Result<()> {
        Ok(())
    }

    fn io_type(&self) -> &'static str;

    fn queue_id(&self) -> i64;

    fn allocator_id(&self) -> i64;

    /// The path naming this backend's backing store. Owned rather than
    /// borrowed since a backend that supports `rename` needs to guard the
    /// path behind a lock.
    fn path(&self) -> String;

    /// Rename the underlying backing store to `new_path`. Not every
    /// backend can honor this; the default implementation reports
    /// `Error::Resource` for backends with no single path to rename
    /// (e.g. the in-memory backend).
    fn rename(&self, new_path: &str) -> Result<()> {
        let _ = new_path;
        Err(crate::error::Error::resource(format!(
            "{} backend does not support rename",
            self.io_type()
        )))
    }
}

/// Build the concrete backend named by `io_kind` in a [`DiskConfig`].
pub fn open(
    cfg: &crate::config::DiskConfig,
    disk_index: usize,
) -> Result<std::sync::Arc<dyn FileBackend>> {
    use crate::config::IoKind;

    let queue_id = cfg.queue_id.unwrap_or(DEFAULT_QUEUE);
    let queue_id = if queue_id == DEFAULT_QUEUE {
        disk_index as i64
    } else {
        queue_id
    };
    let allocator_id = disk_index as i64;

    let raw_device = cfg.flags.contains(DiskFlags::RAW_DEVICE);

    let mut open_flags = OpenFlags::RDWR;
    if !raw_device {
        open_flags |= OpenFlags::CREAT;
    }
    if cfg.flags.contains(DiskFlags::DIRECT) {
        open_flags |= OpenFlags::DIRECT;
    }
    if cfg.flags.contains(DiskFlags::DIRECT_REQUIRED) {
        open_flags |= OpenFlags::REQUIRE_DIRECT;
    }

    // `raw_device`: the path already names a block device with a fixed
    // size, so never create it and never ask a backend to truncate/grow
    // it to `cfg.capacity`; only syscall/mmap/kernel-AIO targets make
    // sense as raw devices at all.
    let sizing_hint = if raw_device { 0 } else { cfg.capacity };

    let backend: std::sync::Arc<dyn FileBackend> = match cfg.io_kind {
        IoKind::Memory => std::sync::Arc::new(MemoryFile::new(queue_id, allocator_id, cfg.capacity)),
        IoKind::Syscall | IoKind::LinuxAio | IoKind::PosixAio | IoKind::WinCall => {
            std::sync::Arc::new(SyscallFile::open(
                &cfg.path,
                open_flags,
                queue_id,
                allocator_id,
                sizing_hint,
                cfg.flags.contains(DiskFlags::UNLINK_ON_OPEN),
            )?)
        }
        IoKind::Mmap => std::sync::Arc::new(MmapFile::open(
            &cfg.path,
            queue_id,
            allocator_id,
            sizing_hint,
            cfg.flags.contains(DiskFlags::UNLINK_ON_OPEN),
        )?),
        IoKind::FilePerBlock => std::sync::Arc::new(FilePerBlockFile::open(
            &cfg.path,
            queue_id,
            NO_ALLOCATOR,
            cfg.capacity,
        )?),
    };

    if !raw_device && cfg.capacity > 0 {
        backend.set_size(cfg.capacity)?;
    }

    Ok(backend)
}
