//! Atomic counters for hot-path metrics
//!
//! Lock-free counters that can be safely updated from any thread. The
//! registry talks to a [`PoolMetrics`] implementation; [`PoolCounters`] keeps
//! one cache-padded row of counters per (order, class) bucket.

use crossbeam::utils::CachePadded;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::pool::AllocClass;

/// Slots in the retry-depth histogram; deeper retries share the last slot
pub const RETRY_DEPTHS: usize = 8;

/// Metrics sink injected into the registry
pub trait PoolMetrics: Send + Sync {
    /// Allocation served from the reserve
    fn fast_hit(&self, order: u32, class: AllocClass);
    /// Allocation not served; the caller falls back to the backing allocator
    fn slow_miss(&self, order: u32, class: AllocClass);
    /// Allocation refused by the priority gate
    fn gate_denied(&self, order: u32, class: AllocClass);
    /// Sleeps spent inside the retry loop of one allocation (at least one)
    fn retries_consumed(&self, order: u32, class: AllocClass, retries: u32);
    /// Block accepted by `return_block`
    fn block_returned(&self, order: u32, class: AllocClass);
    /// Block refused by `return_block`
    fn return_rejected(&self, order: u32, class: AllocClass);
    /// A refill pass topped this bucket up
    fn refill_pass(&self, order: u32, class: AllocClass);
    /// The backing allocator failed while refilling this bucket
    fn refill_failure(&self, order: u32, class: AllocClass);

    /// Counter values for one bucket, if this sink keeps any
    fn snapshot(&self, _order: u32, _class: AllocClass) -> Option<CounterSnapshot> {
        None
    }
}

/// Metrics sink that records nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl PoolMetrics for NoopMetrics {
    fn fast_hit(&self, _: u32, _: AllocClass) {}
    fn slow_miss(&self, _: u32, _: AllocClass) {}
    fn gate_denied(&self, _: u32, _: AllocClass) {}
    fn retries_consumed(&self, _: u32, _: AllocClass, _: u32) {}
    fn block_returned(&self, _: u32, _: AllocClass) {}
    fn return_rejected(&self, _: u32, _: AllocClass) {}
    fn refill_pass(&self, _: u32, _: AllocClass) {}
    fn refill_failure(&self, _: u32, _: AllocClass) {}
}

/// Counters for one bucket
#[derive(Debug, Default)]
struct BucketCounters {
    fast_hits: AtomicU64,
    slow_misses: AtomicU64,
    gate_denials: AtomicU64,
    retries: AtomicU64,
    /// Slot `k` counts allocations that slept `k + 1` times
    retry_depths: [AtomicU64; RETRY_DEPTHS],
    returns: AtomicU64,
    returns_rejected: AtomicU64,
    refill_passes: AtomicU64,
    refill_failures: AtomicU64,
}

/// Snapshot of one bucket's counters for reporting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub fast_hits: u64,
    pub slow_misses: u64,
    pub gate_denials: u64,
    pub retries: u64,
    pub retry_depths: [u64; RETRY_DEPTHS],
    pub returns: u64,
    pub returns_rejected: u64,
    pub refill_passes: u64,
    pub refill_failures: u64,
}

impl CounterSnapshot {
    /// Add another bucket's counters into this one
    pub fn merge(&mut self, other: &CounterSnapshot) {
        self.fast_hits += other.fast_hits;
        self.slow_misses += other.slow_misses;
        self.gate_denials += other.gate_denials;
        self.retries += other.retries;
        for (acc, n) in self.retry_depths.iter_mut().zip(other.retry_depths) {
            *acc += n;
        }
        self.returns += other.returns;
        self.returns_rejected += other.returns_rejected;
        self.refill_passes += other.refill_passes;
        self.refill_failures += other.refill_failures;
    }
}

/// Atomic counter grid indexed by (order, class)
#[derive(Debug)]
pub struct PoolCounters {
    orders: Box<[u32]>,
    classes: usize,
    rows: Box<[CachePadded<BucketCounters>]>,
}

impl PoolCounters {
    /// Create zeroed counters for the given orders and class count
    pub fn new(orders: &[u32], classes: usize) -> Self {
        let rows = (0..orders.len() * classes)
            .map(|_| CachePadded::new(BucketCounters::default()))
            .collect();
        Self {
            orders: orders.into(),
            classes,
            rows,
        }
    }

    fn row(&self, order: u32, class: AllocClass) -> Option<&BucketCounters> {
        if class.index() >= self.classes {
            return None;
        }
        let pool = self.orders.iter().position(|&o| o == order)?;
        self.rows.get(pool * self.classes + class.index()).map(|r| &**r)
    }

    #[inline]
    fn bump(&self, order: u32, class: AllocClass, by: u64, pick: impl Fn(&BucketCounters) -> &AtomicU64) {
        if let Some(row) = self.row(order, class) {
            pick(row).fetch_add(by, Ordering::Relaxed);
        }
    }

    /// Sum of every bucket's counters
    pub fn totals(&self) -> CounterSnapshot {
        self.rows.iter().fold(CounterSnapshot::default(), |mut acc, row| {
            acc.merge(&Self::load(row));
            acc
        })
    }

    fn load(row: &BucketCounters) -> CounterSnapshot {
        CounterSnapshot {
            fast_hits: row.fast_hits.load(Ordering::Relaxed),
            slow_misses: row.slow_misses.load(Ordering::Relaxed),
            gate_denials: row.gate_denials.load(Ordering::Relaxed),
            retries: row.retries.load(Ordering::Relaxed),
            retry_depths: std::array::from_fn(|k| row.retry_depths[k].load(Ordering::Relaxed)),
            returns: row.returns.load(Ordering::Relaxed),
            returns_rejected: row.returns_rejected.load(Ordering::Relaxed),
            refill_passes: row.refill_passes.load(Ordering::Relaxed),
            refill_failures: row.refill_failures.load(Ordering::Relaxed),
        }
    }
}

impl PoolMetrics for PoolCounters {
    #[inline]
    fn fast_hit(&self, order: u32, class: AllocClass) {
        self.bump(order, class, 1, |r| &r.fast_hits);
    }

    #[inline]
    fn slow_miss(&self, order: u32, class: AllocClass) {
        self.bump(order, class, 1, |r| &r.slow_misses);
    }

    #[inline]
    fn gate_denied(&self, order: u32, class: AllocClass) {
        self.bump(order, class, 1, |r| &r.gate_denials);
    }

    #[inline]
    fn retries_consumed(&self, order: u32, class: AllocClass, retries: u32) {
        if retries == 0 {
            return;
        }
        let slot = (retries as usize - 1).min(RETRY_DEPTHS - 1);
        if let Some(row) = self.row(order, class) {
            row.retries.fetch_add(u64::from(retries), Ordering::Relaxed);
            row.retry_depths[slot].fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    fn block_returned(&self, order: u32, class: AllocClass) {
        self.bump(order, class, 1, |r| &r.returns);
    }

    #[inline]
    fn return_rejected(&self, order: u32, class: AllocClass) {
        self.bump(order, class, 1, |r| &r.returns_rejected);
    }

    fn refill_pass(&self, order: u32, class: AllocClass) {
        self.bump(order, class, 1, |r| &r.refill_passes);
    }

    fn refill_failure(&self, order: u32, class: AllocClass) {
        self.bump(order, class, 1, |r| &r.refill_failures);
    }

    fn snapshot(&self, order: u32, class: AllocClass) -> Option<CounterSnapshot> {
        self.row(order, class).map(Self::load)
    }
}
