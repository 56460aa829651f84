use parking_lot::Mutex;
use std::fmt;

use super::{FileBackend, OpType};
use crate::error::{Error, Result};

/// In-memory backing store. Never touches the filesystem; used for tests
/// and for callers who want the block substrate's concurrency machinery
/// without real disks.
pub struct MemoryFile {
    data: Mutex<Vec<u8>>,
    queue_id: i64,
    allocator_id: i64,
}

impl fmt::Debug for MemoryFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryFile")
            .field("queue_id", &self.queue_id)
            .field("size", &self.data.lock().len())
            .finish()
    }
}

impl MemoryFile {
    pub fn new(queue_id: i64, allocator_id: i64, initial_size: u64) -> Self {
        MemoryFile {
            data: Mutex::new(vec![0u8; initial_size as usize]),
            queue_id,
            allocator_id,
        }
    }
}

impl FileBackend for MemoryFile {
    fn size(&self) -> u64 {
        self.data.lock().len() as u64
    }

    fn set_size(&self, bytes: u64) -> Result<()> {
        self.data.lock().resize(bytes as usize, 0);
        Ok(())
    }

    unsafe fn serve(&self, buffer: *mut u8, offset: u64, bytes: u64, op: OpType) -> Result<()> {
        let mut data = self.data.lock();
        let offset = offset as usize;
        let bytes = bytes as usize;
        if offset + bytes > data.len() {
            return Err(Error::io(format!(
                "out of bounds access: offset {offset} + bytes {bytes} > size {}",
                data.len()
            )));
        }
        match op {
            OpType::Read => {
                std::ptr::copy_nonoverlapping(data[offset..offset + bytes].as_ptr(), buffer, bytes);
            }
            OpType::Write => {
                std::ptr::copy_nonoverlapping(buffer, data[offset..offset + bytes].as_mut_ptr(), bytes);
            }
        }
        Ok(())
    }

    fn discard(&self, offset: u64, bytes: u64) -> Result<()> {
        // Scrub on the in-memory backend to deter use-after-free reads of
        // logically-freed ranges (see DESIGN.md).
        let mut data = self.data.lock();
        let offset = offset as usize;
        let bytes = bytes as usize;
        if offset + bytes <= data.len() {
            for b in &mut data[offset..offset + bytes] {
                *b = 0xDD;
            }
        }
        Ok(())
    }

    fn io_type(&self) -> &'static str {
        "memory"
    }

    fn queue_id(&self) -> i64 {
        self.queue_id
    }

    fn allocator_id(&self) -> i64 {
        self.allocator_id
    }

    fn path(&self) -> String {
        "<memory>".to_string()
    }
}
