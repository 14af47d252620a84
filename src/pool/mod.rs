//! Block reserve data structures
//!
//! Blocks, per-class buckets and per-size-class pools.

mod block;
mod bucket;
mod size_pool;

pub use block::Block;
pub use bucket::{AllocClass, BucketStats, Watermarks};
pub use size_pool::Pool;
