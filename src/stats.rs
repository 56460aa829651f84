//! Statistics hooks: counters the rest of the crate increments at fixed
//! points (read/write started and finished, waits, pool steals and
//! hits). All counters are monotonic and may be read from any thread at
//! any time; reads across threads are approximate by design, not
//! synchronized with the increments that produced them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Process-wide (or per-`BlockManager`, if the caller chooses to keep a
/// handle scoped that way) counters for the block substrate's I/O.
#[derive(Debug, Default)]
pub struct Stats {
    reads_started: AtomicU64,
    reads_finished: AtomicU64,
    bytes_read: AtomicU64,
    read_wall_time_us: AtomicU64,

    writes_started: AtomicU64,
    writes_finished: AtomicU64,
    bytes_written: AtomicU64,
    write_wall_time_us: AtomicU64,

    wait_on_read_us: AtomicU64,
    wait_on_write_us: AtomicU64,

    pool_steals: AtomicU64,
    pool_hits: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_started(&self) {
        self.reads_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn read_finished(&self, bytes: u64, elapsed: Duration) {
        self.reads_finished.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
        self.read_wall_time_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn write_started(&self) {
        self.writes_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn write_finished(&self, bytes: u64, elapsed: Duration) {
        self.writes_finished.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
        self.write_wall_time_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn wait_on_read(&self, elapsed: Duration) {
        self.wait_on_read_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn wait_on_write(&self, elapsed: Duration) {
        self.wait_on_write_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn pool_steal(&self) {
        self.pool_steals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn pool_hit(&self) {
        self.pool_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            reads_started: self.reads_started.load(Ordering::Relaxed),
            reads_finished: self.reads_finished.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            read_wall_time: Duration::from_micros(self.read_wall_time_us.load(Ordering::Relaxed)),
            writes_started: self.writes_started.load(Ordering::Relaxed),
            writes_finished: self.writes_finished.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            write_wall_time: Duration::from_micros(self.write_wall_time_us.load(Ordering::Relaxed)),
            wait_on_read: Duration::from_micros(self.wait_on_read_us.load(Ordering::Relaxed)),
            wait_on_write: Duration::from_micros(self.wait_on_write_us.load(Ordering::Relaxed)),
            pool_steals: self.pool_steals.load(Ordering::Relaxed),
            pool_hits: self.pool_hits.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.reads_started.store(0, Ordering::Relaxed);
        self.reads_finished.store(0, Ordering::Relaxed);
        self.bytes_read.store(0, Ordering::Relaxed);
        self.read_wall_time_us.store(0, Ordering::Relaxed);
        self.writes_started.store(0, Ordering::Relaxed);
        self.writes_finished.store(0, Ordering::Relaxed);
        self.bytes_written.store(0, Ordering::Relaxed);
        self.write_wall_time_us.store(0, Ordering::Relaxed);
        self.wait_on_read_us.store(0, Ordering::Relaxed);
        self.wait_on_write_us.store(0, Ordering::Relaxed);
        self.pool_steals.store(0, Ordering::Relaxed);
        self.pool_hits.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time copy of `Stats`, safe to hand to a caller without
/// exposing the underlying atomics.
#[derive(Debug, Clone, Copy)]
pub struct StatsSnapshot {
    pub reads_started: u64,
    pub reads_finished: u64,
    pub bytes_read: u64,
    pub read_wall_time: Duration,

    pub writes_started: u64,
    pub writes_finished: u64,
    pub bytes_written: u64,
    pub write_wall_time: Duration,

    pub wait_on_read: Duration,
    pub wait_on_write: Duration,

    pub pool_steals: u64,
    pub pool_hits: u64,
}

impl StatsSnapshot {
    pub fn total_bytes(&self) -> u64 {
        self.bytes_read + self.bytes_written
    }

    pub fn pool_hit_rate(&self) -> f64 {
        let attempts = self.pool_steals + self.pool_hits;
        if attempts == 0 {
            0.0
        } else {
            self.pool_hits as f64 / attempts as f64
        }
    }
}

/// RAII helper: times a read or write and records it on drop. Saves
/// callers from threading an `Instant` through every I/O call site.
pub struct Timer<'a> {
    stats: &'a Stats,
    started: Instant,
    kind: TimerKind,
    bytes: u64,
}

enum TimerKind {
    Read,
    Write,
}

impl<'a> Timer<'a> {
    pub fn read(stats: &'a Stats, bytes: u64) -> Self {
        stats.read_started();
        Timer { stats, started: Instant::now(), kind: TimerKind::Read, bytes }
    }

    pub fn write(stats: &'a Stats, bytes: u64) -> Self {
        stats.write_started();
        Timer { stats, started: Instant::now(), kind: TimerKind::Write, bytes }
    }
}

impl Drop for Timer<'_> {
    fn drop(&mut self) {
        let elapsed = self.started.elapsed();
        match self.kind {
            TimerKind::Read => self.stats.read_finished(self.bytes, elapsed),
            TimerKind::Write => self.stats.write_finished(self.bytes, elapsed),
        }
    }
}
