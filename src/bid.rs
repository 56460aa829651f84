//! Block identifiers: `(file, offset, size)` triples that name one region
//! of one backing file.

use std::fmt;
use std::sync::Arc;

use crate::file::FileBackend;

/// Identifies one block of bytes in one backing file.
///
/// A `Bid` does not own the bytes it names; it is a coordinate. Two `Bid`s
/// naming overlapping ranges of the same file are a caller bug unless one
/// has already been freed.
#[derive(Clone)]
pub struct Bid {
    pub file: Arc<dyn FileBackend>,
    pub offset: u64,
    pub size: u64,
}

impl Bid {
    pub fn new(file: Arc<dyn FileBackend>, offset: u64, size: u64) -> Self {
        Bid { file, offset, size }
    }

    /// `offset` and `size` are both multiples of `alignment`, and the
    /// block lies within `[0, file.size())`.
    pub fn valid(&self, alignment: u64) -> bool {
        alignment.is_power_of_two()
            && self.offset % alignment == 0
            && self.size % alignment == 0
            && self.offset.saturating_add(self.size) <= self.file.size()
    }

    pub fn disk_index(&self) -> usize {
        self.file.allocator_id() as usize
    }

    pub fn end(&self) -> u64 {
        self.offset + self.size
    }

    /// Two BIDs overlap if they name the same file and their byte ranges
    /// intersect.
    pub fn overlaps(&self, other: &Bid) -> bool {
        Arc::ptr_eq(&self.file, &other.file)
            && self.offset < other.end()
            && other.offset < self.end()
    }
}

impl fmt::Debug for Bid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bid")
            .field("queue_id", &self.file.queue_id())
            .field("offset", &self.offset)
            .field("size", &self.size)
            .finish()
    }
}

impl PartialEq for Bid {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.file, &other.file) && self.offset == other.offset && self.size == other.size
    }
}

impl Eq for Bid {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::MemoryFile;

    fn file(size: u64) -> Arc<dyn FileBackend> {
        Arc::new(MemoryFile::new(0, 0, size))
    }

    #[test]
    fn valid_requires_alignment_and_bounds() {
        let f = file(8192);
        let b = Bid::new(f.clone(), 0, 4096);
        assert!(b.valid(4096));
        let b2 = Bid::new(f.clone(), 4096, 4096);
        assert!(b2.valid(4096));
        let oob = Bid::new(f.clone(), 4096, 8192);
        assert!(!oob.valid(4096));
        let misaligned = Bid::new(f, 100, 4096);
        assert!(!misaligned.valid(4096));
    }

    #[test]
    fn overlap_detection() {
        let f1 = file(8192);
        let f2 = file(8192);
        let a = Bid::new(f1.clone(), 0, 4096);
        let b = Bid::new(f1.clone(), 2048, 4096);
        assert!(a.overlaps(&b));
        let c = Bid::new(f1, 4096, 4096);
        assert!(!a.overlaps(&c));
        let d = Bid::new(f2, 0, 4096);
        assert!(!a.overlaps(&d));
    }
}
