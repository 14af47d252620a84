//! Background refill thread
//!
//! Exactly one per registry. Sleeps on the refill signal and runs a refill
//! pass each time it is raised. Holds only a weak reference to the registry
//! so an un-shut-down registry can still be dropped.

use std::io;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};

use super::signal::{RefillSignal, Wake};
use crate::allocator::PoolRegistry;

/// Name of the refill thread
pub const WORKER_NAME: &str = "reservepool-refill";

/// Handle to the running refill thread
#[derive(Debug)]
pub struct RefillWorker {
    handle: JoinHandle<()>,
}

impl RefillWorker {
    /// Spawn the refill thread
    pub fn spawn(registry: Weak<PoolRegistry>, signal: Arc<RefillSignal>) -> io::Result<Self> {
        let handle = thread::Builder::new()
            .name(WORKER_NAME.to_string())
            .spawn(move || run(registry, signal))?;
        Ok(Self { handle })
    }

    /// Wait for the thread to exit
    ///
    /// The signal must already be stopped. Called from the worker itself
    /// (last registry reference dropped mid-pass) it returns immediately.
    pub fn join(self) {
        if self.handle.thread().id() == thread::current().id() {
            return;
        }
        if self.handle.join().is_err() {
            error!("Refill worker panicked");
        }
    }
}

fn run(registry: Weak<PoolRegistry>, signal: Arc<RefillSignal>) {
    info!("Refill worker started");

    loop {
        match signal.wait() {
            Wake::Shutdown => break,
            Wake::Refill => {
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                let report = registry.refill_pass();
                debug!(
                    added = report.blocks_added,
                    classes = report.classes_refilled,
                    failures = report.failures,
                    "Refill pass complete"
                );
            }
        }
    }

    info!("Refill worker stopped");
}
