//! ReservePool - priority-aware reserve of pre-allocated blocks
//!
//! This library keeps small per-size-class caches of fixed-size memory
//! blocks in front of a general-purpose allocator. Latency-critical callers
//! get blocks from the cache without touching the allocator's slow path; a
//! background worker keeps the caches topped up.

pub mod allocator;
pub mod backing;
pub mod config;
pub mod error;
pub mod metrics;
pub mod pool;
pub mod priority;
pub mod refill;
pub mod util;

pub use allocator::{CancelToken, PoolRegistry, RetryPolicy};
pub use config::Config;
pub use error::{PoolError, RejectedReturn};
pub use pool::{AllocClass, Block};

/// Library version for display
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
