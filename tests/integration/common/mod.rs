//! Shared helpers for integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use reservepool::backing::{AllocFlags, BackingAllocator, SystemBacking};
use reservepool::config::{PoolConfig, SizeClassConfig};
use reservepool::error::BackingError;
use reservepool::Block;

pub const BLOCK_SIZE: usize = 64;

/// Pool config with 64-byte blocks and the given (order, total) classes
pub fn config(size_classes: &[(u32, usize)]) -> PoolConfig {
    PoolConfig {
        block_size: BLOCK_SIZE,
        size_classes: size_classes
            .iter()
            .map(|&(order, total_blocks)| SizeClassConfig { order, total_blocks })
            .collect(),
        ..PoolConfig::default()
    }
}

/// Poll `check` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    check()
}

/// System backing that counts traffic and can be told to fail
pub struct CountingBacking {
    inner: SystemBacking,
    /// Successful obtains allowed before every further obtain fails
    obtain_budget: AtomicUsize,
    fail_prepare: bool,
    /// Time each obtain spends inside the backing allocator
    obtain_delay: Duration,
    pub obtained: AtomicUsize,
    pub obtain_failures: AtomicUsize,
    pub released: AtomicUsize,
}

impl CountingBacking {
    pub fn new() -> Self {
        Self::with_budget(usize::MAX)
    }

    pub fn with_budget(budget: usize) -> Self {
        Self {
            inner: SystemBacking::new(BLOCK_SIZE),
            obtain_budget: AtomicUsize::new(budget),
            fail_prepare: false,
            obtain_delay: Duration::ZERO,
            obtained: AtomicUsize::new(0),
            obtain_failures: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
        }
    }

    pub fn failing_prepare() -> Self {
        Self {
            fail_prepare: true,
            ..Self::new()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            obtain_delay: delay,
            ..Self::new()
        }
    }

    pub fn obtained(&self) -> usize {
        self.obtained.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl BackingAllocator for CountingBacking {
    fn obtain_block(&self, order: u32, flags: AllocFlags) -> Result<Block, BackingError> {
        let granted = self
            .obtain_budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if !granted {
            self.obtain_failures.fetch_add(1, Ordering::SeqCst);
            return Err(BackingError::OutOfMemory {
                size: BLOCK_SIZE << order,
            });
        }
        if !self.obtain_delay.is_zero() {
            std::thread::sleep(self.obtain_delay);
        }
        let block = self.inner.obtain_block(order, flags)?;
        self.obtained.fetch_add(1, Ordering::SeqCst);
        Ok(block)
    }

    fn prepare_for_reuse(&self, block: &mut Block, order: u32) -> Result<(), BackingError> {
        if self.fail_prepare {
            return Err(BackingError::PrepareFailed {
                reason: "refused by test".to_string(),
            });
        }
        self.inner.prepare_for_reuse(block, order)
    }

    fn release_block(&self, block: Block, order: u32) {
        self.released.fetch_add(1, Ordering::SeqCst);
        self.inner.release_block(block, order);
    }
}
