//! Allocation strategies: pure mappings from a sequence index to a disk
//! index, used by the block manager to spread an allocation request
//! across disks.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use parking_lot::Mutex;

/// Maps `i -> disk_index`. Cheap; callers may invoke `disk_for` many
/// times per allocation.
pub trait AllocationStrategy: Send + Sync {
    fn disk_for(&self, i: u64) -> usize;
    fn disk_count(&self) -> usize;
}

/// Every block goes to the same disk.
pub struct SingleDisk {
    disk: usize,
}

impl SingleDisk {
    pub fn new(disk: usize) -> Self {
        SingleDisk { disk }
    }
}

impl AllocationStrategy for SingleDisk {
    fn disk_for(&self, _i: u64) -> usize {
        self.disk
    }

    fn disk_count(&self) -> usize {
        1
    }
}

/// `first + (i mod count)`: successive blocks go to successive disks.
pub struct Striping {
    first: usize,
    count: usize,
}

impl Striping {
    pub fn new(first: usize, count: usize) -> Self {
        assert!(count > 0, "striping requires at least one disk");
        Striping { first, count }
    }
}

impl AllocationStrategy for Striping {
    fn disk_for(&self, i: u64) -> usize {
        self.first + (i as usize % self.count)
    }

    fn disk_count(&self) -> usize {
        self.count
    }
}

/// `first + uniform(count)`, drawn fresh on every call: the fully
/// randomized allocation strategy.
pub struct FullyRandom {
    first: usize,
    count: usize,
    rng: Mutex<StdRng>,
}

impl FullyRandom {
    pub fn new(first: usize, count: usize) -> Self {
        assert!(count > 0);
        FullyRandom {
            first,
            count,
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    pub fn with_seed(first: usize, count: usize, seed: u64) -> Self {
        assert!(count > 0);
        FullyRandom {
            first,
            count,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl AllocationStrategy for FullyRandom {
    fn disk_for(&self, _i: u64) -> usize {
        let draw = self.rng.lock().random_range(0..self.count);
        self.first + draw
    }

    fn disk_count(&self) -> usize {
        self.count
    }
}

/// An alias for `FullyRandom`: "simple random" and "fully random" are
/// kept as distinct names since higher layers may cache a simple-random
/// draw across calls upstream of this substrate, while both draw fresh
/// here.
pub type SimpleRandom = FullyRandom;

/// Striping over a fixed random permutation of disk indices, computed
/// once at construction.
pub struct RandomizedCyclic {
    first: usize,
    count: usize,
    permutation: Vec<usize>,
}

impl RandomizedCyclic {
    pub fn new(first: usize, count: usize) -> Self {
        Self::with_seed(first, count, rand::random())
    }

    pub fn with_seed(first: usize, count: usize, seed: u64) -> Self {
        assert!(count > 0);
        let mut permutation: Vec<usize> = (0..count).collect();
        let mut rng = StdRng::seed_from_u64(seed);
        // Fisher-Yates.
        for i in (1..permutation.len()).rev() {
            let j = rng.random_range(0..=i);
            permutation.swap(i, j);
        }
        RandomizedCyclic {
            first,
            count,
            permutation,
        }
    }
}

impl AllocationStrategy for RandomizedCyclic {
    fn disk_for(&self, i: u64) -> usize {
        self.first + self.permutation[i as usize % self.count]
    }

    fn disk_count(&self) -> usize {
        self.count
    }
}

/// Wraps a zero-based base strategy (one whose `disk_for` returns values
/// in `[0, disk_count())`, e.g. `Striping::new(0, n)`), shifting its
/// output by a fixed amount modulo the disk count.
pub struct Offset<S: AllocationStrategy> {
    base: S,
    shift: usize,
}

impl<S: AllocationStrategy> Offset<S> {
    pub fn new(base: S, shift: usize) -> Self {
        Offset { base, shift }
    }
}

impl<S: AllocationStrategy> AllocationStrategy for Offset<S> {
    fn disk_for(&self, i: u64) -> usize {
        let count = self.base.disk_count().max(1);
        (self.base.disk_for(i) + self.shift) % count
    }

    fn disk_count(&self) -> usize {
        self.base.disk_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn striping_cycles_across_disks() {
        let s = Striping::new(0, 4);
        let got: Vec<usize> = (0..10).map(|i| s.disk_for(i)).collect();
        assert_eq!(got, vec![0, 1, 2, 3, 0, 1, 2, 3, 0, 1]);
    }

    #[test]
    fn striping_distributes_unevenly_divisible_counts_fairly() {
        // 20 blocks striped across 4 disks starting at disk 0 puts 5
        // blocks on disks 0-1 and 4 on disks 2-3.
        let s = Striping::new(0, 4);
        let mut counts = [0usize; 4];
        for i in 0..20u64 {
            counts[s.disk_for(i)] += 1;
        }
        assert_eq!(counts, [5, 5, 5, 5]);
    }

    #[test]
    fn single_disk_is_constant() {
        let s = SingleDisk::new(2);
        for i in 0..10 {
            assert_eq!(s.disk_for(i), 2);
        }
    }

    #[test]
    fn randomized_cyclic_is_a_permutation_of_disks() {
        let s = RandomizedCyclic::with_seed(0, 5, 42);
        let mut seen: Vec<usize> = (0..5).map(|i| s.disk_for(i)).collect();
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        // Deterministic given the same seed.
        let s2 = RandomizedCyclic::with_seed(0, 5, 42);
        for i in 0..5 {
            assert_eq!(s.disk_for(i), s2.disk_for(i));
        }
    }

    #[test]
    fn fully_random_stays_in_range() {
        let s = FullyRandom::with_seed(3, 4, 7);
        for i in 0..100u64 {
            let d = s.disk_for(i);
            assert!((3..7).contains(&d));
        }
    }
}
