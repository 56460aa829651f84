use std::fmt;
use std::fs::{File, OpenOptions};
use std::sync::Mutex;

use memmap2::MmapOptions;

use super::{FileBackend, OpType};
use crate::error::Result;

/// Memory-mapped backend. Each `serve` call maps only the requested byte
/// range, memcpys through it, and unmaps. The mapping is not held across
/// calls, so there is no persistent address-space cost proportional to
/// file size.
pub struct MmapFile {
    file: Mutex<File>,
    path: Mutex<String>,
    queue_id: i64,
    allocator_id: i64,
}

impl fmt::Debug for MmapFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MmapFile")
            .field("path", &*self.path.lock().unwrap())
            .finish()
    }
}

impl MmapFile {
    pub fn open(
        path: &str,
        queue_id: i64,
        allocator_id: i64,
        initial_size: u64,
        unlink_on_open: bool,
    ) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        if initial_size > 0 {
            file.set_len(initial_size)?;
        }
        if unlink_on_open {
            let _ = std::fs::remove_file(path);
        }
        Ok(MmapFile {
            file: Mutex::new(file),
            path: Mutex::new(path.to_string()),
            queue_id,
            allocator_id,
        })
    }
}

impl FileBackend for MmapFile {
    fn size(&self) -> u64 {
        self.file.lock().unwrap().metadata().map(|m| m.len()).unwrap_or(0)
    }

    fn set_size(&self, bytes: u64) -> Result<()> {
        self.file.lock().unwrap().set_len(bytes)?;
        Ok(())
    }

    unsafe fn serve(&self, buffer: *mut u8, offset: u64, bytes: u64, op: OpType) -> Result<()> {
        let file = self.file.lock().unwrap();
        let mut mapping = MmapOptions::new()
            .offset(offset)
            .len(bytes as usize)
            .map_mut(&*file)?;
        match op {
            OpType::Read => {
                std::ptr::copy_nonoverlapping(mapping.as_ptr(), buffer, bytes as usize);
            }
            OpType::Write => {
                std::ptr::copy_nonoverlapping(buffer, mapping.as_mut_ptr(), bytes as usize);
                mapping.flush()?;
            }
        }
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.file.lock().unwrap().sync_data()?;
        Ok(())
    }

    fn io_type(&self) -> &'static str {
        "mmap"
    }

    fn queue_id(&self) -> i64 {
        self.queue_id
    }

    fn allocator_id(&self) -> i64 {
        self.allocator_id
    }

    fn path(&self) -> String {
        self.path.lock().unwrap().clone()
    }

    fn rename(&self, new_path: &str) -> Result<()> {
        let mut path = self.path.lock().unwrap();
        std::fs::rename(&*path, new_path)?;
        *path = new_path.to_string();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk0.dat");
        let f = MmapFile::open(path.to_str().unwrap(), 0, 0, 4096, false).unwrap();

        let mut src = vec![0x7Eu8; 4096];
        unsafe {
            f.serve(src.as_mut_ptr(), 0, 4096, OpType::Write).unwrap();
        }
        let mut dst = vec![0u8; 4096];
        unsafe {
            f.serve(dst.as_mut_ptr(), 0, 4096, OpType::Read).unwrap();
        }
        assert_eq!(src, dst);
    }
}
