use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use super::{FileBackend, OpType};
use crate::error::Result;

/// "One file per block" backend: the logical file is a directory, and
/// each block-sized region is backed by its own underlying file, opened
/// and sized fresh on every `serve`. Useful on filesystems where sparse
/// single large files behave poorly, or for debugging (each block is
/// independently inspectable).
pub struct FilePerBlockFile {
    dir: Mutex<PathBuf>,
    queue_id: i64,
    allocator_id: i64,
    logical_size: AtomicU64,
    // Serializes directory entry creation; the per-block files themselves
    // are opened fresh each call so no long-lived fd table is needed.
    lock: Mutex<()>,
}

impl fmt::Debug for FilePerBlockFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilePerBlockFile")
            .field("dir", &*self.dir.lock().unwrap())
            .finish()
    }
}

impl FilePerBlockFile {
    pub fn open(path: &str, queue_id: i64, allocator_id: i64, initial_size: u64) -> Result<Self> {
        let dir = PathBuf::from(path);
        std::fs::create_dir_all(&dir)?;
        Ok(FilePerBlockFile {
            dir: Mutex::new(dir),
            queue_id,
            allocator_id,
            logical_size: AtomicU64::new(initial_size),
            lock: Mutex::new(()),
        })
    }

    fn block_path(&self, offset: u64) -> PathBuf {
        self.dir.lock().unwrap().join(format!("block_{offset:020}.dat"))
    }
}

impl FileBackend for FilePerBlockFile {
    fn size(&self) -> u64 {
        self.logical_size.load(Ordering::Relaxed)
    }

    fn set_size(&self, bytes: u64) -> Result<()> {
        self.logical_size.store(bytes, Ordering::Relaxed);
        Ok(())
    }

    unsafe fn serve(&self, buffer: *mut u8, offset: u64, bytes: u64, op: OpType) -> Result<()> {
        let _guard = self.lock.lock().unwrap();
        let path = self.block_path(offset);
        match op {
            OpType::Write => {
                let slice = std::slice::from_raw_parts(buffer, bytes as usize);
                std::fs::write(&path, slice)?;
            }
            OpType::Read => {
                let data = std::fs::read(&path)?;
                let n = data.len().min(bytes as usize);
                std::ptr::copy_nonoverlapping(data.as_ptr(), buffer, n);
                if n < bytes as usize {
                    std::ptr::write_bytes(buffer.add(n), 0, bytes as usize - n);
                }
            }
        }
        Ok(())
    }

    fn discard(&self, offset: u64, _bytes: u64) -> Result<()> {
        let _guard = self.lock.lock().unwrap();
        let _ = std::fs::remove_file(self.block_path(offset));
        Ok(())
    }

    fn io_type(&self) -> &'static str {
        "fileperblock"
    }

    fn queue_id(&self) -> i64 {
        self.queue_id
    }

    fn allocator_id(&self) -> i64 {
        self.allocator_id
    }

    fn path(&self) -> String {
        self.dir.lock().unwrap().to_string_lossy().into_owned()
    }

    fn rename(&self, new_path: &str) -> Result<()> {
        let mut dir = self.dir.lock().unwrap();
        std::fs::rename(&*dir, new_path)?;
        *dir = PathBuf::from(new_path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let f = FilePerBlockFile::open(dir.path().to_str().unwrap(), 0, 0, 0).unwrap();

        let mut src = vec![0x5Au8; 256];
        unsafe {
            f.serve(src.as_mut_ptr(), 4096, 256, OpType::Write).unwrap();
        }
        let mut dst = vec![0u8; 256];
        unsafe {
            f.serve(dst.as_mut_ptr(), 4096, 256, OpType::Read).unwrap();
        }
        assert_eq!(src, dst);
    }

    #[test]
    fn discard_removes_underlying_file() {
        let dir = tempfile::tempdir().unwrap();
        let f = FilePerBlockFile::open(dir.path().to_str().unwrap(), 0, 0, 0).unwrap();
        let mut src = vec![1u8; 64];
        unsafe {
            f.serve(src.as_mut_ptr(), 0, 64, OpType::Write).unwrap();
        }
        assert!(f.block_path(0).exists());
        f.discard(0, 64).unwrap();
        assert!(!f.block_path(0).exists());
    }
}
