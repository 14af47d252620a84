//! Refill worker
//!
//! Keeps every pool topped up to its high watermark.

mod signal;
mod worker;

pub use signal::{RefillSignal, Wake};
pub use worker::{RefillWorker, WORKER_NAME};
