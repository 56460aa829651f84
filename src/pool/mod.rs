//! Bounded pools of typed blocks used to overlap I/O with computation:
//! a write pool that drains dirty blocks asynchronously, and a prefetch
//! pool that fills blocks ahead of when the consumer needs them.

mod prefetch_pool;
mod write_pool;

pub use prefetch_pool::PrefetchPool;
pub use write_pool::WritePool;
