//! Fast-path allocator
//!
//! The registry of size-class pools with its allocate/return API, the
//! bounded retry policy, and the read-only pool report.

mod dump;
mod registry;
mod retry;

pub use dump::{BucketReport, PoolDump};
pub use registry::{PoolRegistry, RefillReport, RegistryBuilder};
pub use retry::{CancelToken, RetryOutcome, RetryPolicy};
