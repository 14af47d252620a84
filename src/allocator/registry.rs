//! Pool registry and fast-path allocator
//!
//! One registry owns every size-class pool, the refill worker, and the
//! collaborators the reserve depends on (backing allocator, priority probe,
//! metrics sink). It is built once, started explicitly, and shut down
//! explicitly.

use anyhow::Result;
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

use super::dump::{BucketReport, PoolDump};
use super::retry::{CancelToken, RetryOutcome, RetryPolicy};
use crate::backing::{AllocFlags, BackingAllocator, SystemBacking};
use crate::config::PoolConfig;
use crate::error::{BackingError, PoolError, RejectedReturn};
use crate::metrics::{NoopMetrics, PoolMetrics};
use crate::pool::{AllocClass, Block, BucketStats, Pool};
use crate::priority::{PriorityProbe, ThreadPriorityProbe};
use crate::refill::{RefillSignal, RefillWorker};

/// Outcome of one refill pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefillReport {
    /// Blocks pushed into buckets
    pub blocks_added: usize,
    /// Buckets that received at least one block
    pub classes_refilled: usize,
    /// Buckets abandoned because the backing allocator failed
    pub failures: usize,
}

/// Builder for [`PoolRegistry`]
pub struct RegistryBuilder {
    config: PoolConfig,
    backing: Option<Arc<dyn BackingAllocator>>,
    priority: Arc<dyn PriorityProbe>,
    metrics: Arc<dyn PoolMetrics>,
}

impl RegistryBuilder {
    /// Backing allocator; defaults to [`SystemBacking`] over `block_size`
    pub fn backing(mut self, backing: Arc<dyn BackingAllocator>) -> Self {
        self.backing = Some(backing);
        self
    }

    /// Priority probe; defaults to [`ThreadPriorityProbe`]
    pub fn priority(mut self, priority: Arc<dyn PriorityProbe>) -> Self {
        self.priority = priority;
        self
    }

    /// Metrics sink; defaults to [`NoopMetrics`]
    pub fn metrics(mut self, metrics: Arc<dyn PoolMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Validate the configuration and create every pool with empty buckets
    pub fn build(self) -> Result<Arc<PoolRegistry>> {
        let config = self.config;
        config.validate()?;

        let signal = Arc::new(RefillSignal::new());
        let flags = if config.zero_fill {
            AllocFlags::REFILL
        } else {
            AllocFlags::REFILL.without(AllocFlags::ZERO)
        };

        let pools: Box<[Pool]> = config
            .size_classes
            .iter()
            .map(|sc| {
                let pool = Pool::new(
                    sc.order,
                    config.block_size << sc.order,
                    sc.total_blocks,
                    config.alloc_classes,
                    flags,
                    signal.clone(),
                );
                if let Some(marks) = pool.watermarks(AllocClass::UNMOVABLE) {
                    info!(
                        order = sc.order,
                        classes = config.alloc_classes,
                        low = marks.low,
                        high = marks.high,
                        "Pool created"
                    );
                }
                pool
            })
            .collect();

        let backing = self
            .backing
            .unwrap_or_else(|| Arc::new(SystemBacking::new(config.block_size)));

        Ok(Arc::new(PoolRegistry {
            pools,
            classes: config.alloc_classes,
            enabled: AtomicBool::new(config.enabled),
            signal,
            backing,
            priority: self.priority,
            metrics: self.metrics,
            retry: config.retry_policy(),
            shutdown: CancelToken::new(),
            worker: Mutex::new(None),
        }))
    }
}

/// Every size-class pool plus the refill worker that keeps them topped up
pub struct PoolRegistry {
    pools: Box<[Pool]>,
    classes: usize,
    enabled: AtomicBool,
    signal: Arc<RefillSignal>,
    backing: Arc<dyn BackingAllocator>,
    priority: Arc<dyn PriorityProbe>,
    metrics: Arc<dyn PoolMetrics>,
    retry: RetryPolicy,
    /// Cancelled at shutdown; interrupts retrying callers and refill passes
    shutdown: CancelToken,
    worker: Mutex<Option<RefillWorker>>,
}

impl PoolRegistry {
    pub fn builder(config: PoolConfig) -> RegistryBuilder {
        RegistryBuilder {
            config,
            backing: None,
            priority: Arc::new(ThreadPriorityProbe),
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Spawn the refill worker and request the initial fill
    pub fn start(self: &Arc<Self>) -> io::Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(io::Error::other("reserve pool already shut down"));
        }

        let mut worker = self.worker.lock();
        if worker.is_none() {
            *worker = Some(RefillWorker::spawn(
                Arc::downgrade(self),
                self.signal.clone(),
            )?);
        }
        drop(worker);

        self.wake_refill();
        Ok(())
    }

    /// Stop the worker and release every cached block
    ///
    /// Disables the registry, interrupts callers sleeping in the retry loop,
    /// joins the refill worker, then drains every bucket through
    /// [`BackingAllocator::release_block`]. Returns the number of blocks
    /// released. Calling it again releases nothing.
    pub fn shutdown(&self) -> usize {
        self.enabled.store(false, Ordering::Release);
        self.shutdown.cancel();
        self.signal.stop();

        if let Some(worker) = self.worker.lock().take() {
            worker.join();
        }

        let mut released = 0;
        for pool in self.pools.iter() {
            for block in pool.drain() {
                self.backing.release_block(block, pool.order());
                released += 1;
            }
        }

        if released > 0 {
            info!(released, "Reserve pool shut down, cached blocks released");
        }
        released
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Turn the fast path on or off
    ///
    /// Re-enabling requests a refill pass. Has no effect after shutdown.
    pub fn set_enabled(&self, enabled: bool) {
        if self.shutdown.is_cancelled() {
            return;
        }
        let was = self.enabled.swap(enabled, Ordering::AcqRel);
        if enabled && !was {
            self.wake_refill();
        }
        info!(enabled, "Reserve pool switched");
    }

    pub fn is_worker_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Whether a refill has been requested but not yet picked up
    pub fn refill_pending(&self) -> bool {
        self.signal.is_pending()
    }

    /// Ask the refill worker for a pass
    pub fn wake_refill(&self) {
        if self.is_enabled() {
            self.signal.raise();
        }
    }

    /// Pool serving `order`
    pub fn pool(&self, order: u32) -> Option<&Pool> {
        self.pools.iter().find(|p| p.order() == order)
    }

    pub fn pools(&self) -> &[Pool] {
        &self.pools
    }

    pub fn alloc_classes(&self) -> usize {
        self.classes
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn stats(&self, order: u32, class: AllocClass) -> Option<BucketStats> {
        self.pool(order)?.stats(class)
    }

    fn pool_for(&self, order: u32, class: AllocClass) -> Result<&Pool, PoolError> {
        let pool = self
            .pool(order)
            .ok_or(PoolError::UnknownSizeClass { order })?;
        if !pool.has_class(class) {
            return Err(PoolError::UnknownAllocClass {
                class,
                classes: self.classes,
            });
        }
        if !self.is_enabled() {
            return Err(PoolError::Disabled);
        }
        Ok(pool)
    }

    /// Take a cached block, or `None` if the caller must use the backing
    /// allocator
    pub fn allocate(&self, order: u32, class: AllocClass, may_retry: bool) -> Option<Block> {
        self.try_allocate(order, class, may_retry).ok()
    }

    /// Take a cached block, reporting why none was served
    ///
    /// With `may_retry`, an empty bucket is retried under the registry's
    /// retry policy; shutdown interrupts the wait.
    pub fn try_allocate(
        &self,
        order: u32,
        class: AllocClass,
        may_retry: bool,
    ) -> Result<Block, PoolError> {
        let policy = if may_retry {
            self.retry
        } else {
            RetryPolicy::none()
        };
        self.allocate_with(order, class, &policy, &self.shutdown)
    }

    /// Like [`try_allocate`](Self::try_allocate) with retries, sleeping on
    /// a caller-supplied cancellation token
    ///
    /// The wait ends when either `cancel` or the registry's shutdown fires.
    pub fn try_allocate_cancellable(
        &self,
        order: u32,
        class: AllocClass,
        cancel: &CancelToken,
    ) -> Result<Block, PoolError> {
        let linked = cancel.child();
        self.shutdown.link(&linked);
        self.allocate_with(order, class, &self.retry, &linked)
    }

    fn allocate_with(
        &self,
        order: u32,
        class: AllocClass,
        policy: &RetryPolicy,
        cancel: &CancelToken,
    ) -> Result<Block, PoolError> {
        let pool = self.pool_for(order, class)?;

        // Below low the remaining blocks are reserved for privileged callers
        if pool.below_low(class) && !self.priority.is_privileged() {
            self.metrics.gate_denied(order, class);
            trace!(order, %class, "Reserve band denied to unprivileged caller");
            return Err(PoolError::ReserveDenied { order, class });
        }

        let outcome = policy.run(cancel, || pool.remove(class));
        let retries = outcome.retries();
        if retries > 0 {
            self.metrics.retries_consumed(order, class, retries);
        }

        match outcome {
            RetryOutcome::Ready { value, .. } => {
                self.metrics.fast_hit(order, class);
                Ok(value)
            }
            RetryOutcome::Exhausted { retries } => {
                self.metrics.slow_miss(order, class);
                Err(PoolError::Exhausted {
                    order,
                    class,
                    retries,
                })
            }
            RetryOutcome::Cancelled { retries } => {
                self.metrics.slow_miss(order, class);
                Err(PoolError::Interrupted {
                    order,
                    class,
                    retries,
                })
            }
        }
    }

    /// Offer a block back to the reserve
    ///
    /// On rejection the block is handed back inside the error and the caller
    /// must release it through the backing allocator.
    pub fn return_block(
        &self,
        block: Block,
        order: u32,
        class: AllocClass,
    ) -> Result<(), RejectedReturn> {
        let pool = match self.pool_for(order, class) {
            Ok(pool) => pool,
            Err(err) => return Err(RejectedReturn::new(block, err)),
        };

        if block.len() != pool.block_size() {
            let err = PoolError::BlockSizeMismatch {
                order,
                expected: pool.block_size(),
                actual: block.len(),
            };
            return Err(RejectedReturn::new(block, err));
        }

        match pool.try_add(block, class) {
            Ok(()) => {
                self.metrics.block_returned(order, class);
                Ok(())
            }
            Err(block) => {
                self.metrics.return_rejected(order, class);
                // Drained by a shutdown that ran after the checks above
                let err = if pool.is_closed() {
                    PoolError::Disabled
                } else {
                    PoolError::ReserveFull { order, class }
                };
                Err(RejectedReturn::new(block, err))
            }
        }
    }

    /// Fill every class of every pool up to its high watermark
    ///
    /// Runs on the refill worker; callable directly for a synchronous pass.
    /// Does nothing while disabled or after shutdown.
    pub fn refill_pass(&self) -> RefillReport {
        let mut report = RefillReport::default();
        if !self.is_enabled() || self.shutdown.is_cancelled() {
            debug!("Refill pass skipped, reserve pool inactive");
            return report;
        }

        for pool in self.pools.iter() {
            for class in (0..pool.classes()).map(|c| AllocClass(c as u8)) {
                self.refill_class(pool, class, &mut report);
            }
        }
        report
    }

    fn refill_class(&self, pool: &Pool, class: AllocClass, report: &mut RefillReport) {
        let order = pool.order();
        let start = Instant::now();
        let mut added = 0;

        while !pool.is_full(class) && !self.shutdown.is_cancelled() {
            let mut block = match self.backing.obtain_block(order, pool.flags()) {
                Ok(block) => block,
                Err(err) => {
                    self.refill_failed(order, class, err, report);
                    break;
                }
            };

            if let Err(err) = self.backing.prepare_for_reuse(&mut block, order) {
                self.backing.release_block(block, order);
                self.refill_failed(order, class, err, report);
                break;
            }

            // A concurrent return may have filled the bucket, or shutdown
            // may have drained the pool, while the backing call ran
            if let Err(block) = pool.try_add(block, class) {
                self.backing.release_block(block, order);
                break;
            }
            added += 1;
        }

        if added > 0 {
            report.blocks_added += added;
            report.classes_refilled += 1;
            self.metrics.refill_pass(order, class);
            debug!(
                order,
                %class,
                added,
                count = pool.count(class).unwrap_or_default(),
                elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Bucket refilled"
            );
        }
    }

    fn refill_failed(
        &self,
        order: u32,
        class: AllocClass,
        err: BackingError,
        report: &mut RefillReport,
    ) {
        report.failures += 1;
        self.metrics.refill_failure(order, class);
        let err = PoolError::from(err);
        warn!(order, %class, error = %err, "Refill abandoned for this pass");
    }

    /// Snapshot of every bucket and its counters
    pub fn dump(&self) -> PoolDump {
        let buckets = self
            .pools
            .iter()
            .flat_map(|pool| {
                (0..pool.classes()).filter_map(move |c| {
                    let class = AllocClass(c as u8);
                    pool.stats(class).map(|stats| BucketReport {
                        order: pool.order(),
                        block_size: pool.block_size(),
                        class,
                        stats,
                        counters: self.metrics.snapshot(pool.order(), class),
                    })
                })
            })
            .collect();

        PoolDump {
            enabled: self.is_enabled(),
            worker_running: self.is_worker_running(),
            buckets,
        }
    }
}

impl Drop for PoolRegistry {
    fn drop(&mut self) {
        if !self.shutdown.is_cancelled() {
            self.shutdown();
        }
    }
}

impl std::fmt::Debug for PoolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolRegistry")
            .field("pools", &self.pools)
            .field("enabled", &self.is_enabled())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
