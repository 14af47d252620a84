//! Refill worker and backing allocator integration tests

mod common;

use std::sync::Arc;
use std::time::Duration;

use reservepool::metrics::{PoolCounters, PoolMetrics};
use reservepool::priority::CallerContext;
use reservepool::{AllocClass, PoolRegistry};

use common::{config, wait_until, CountingBacking};

const WAIT: Duration = Duration::from_secs(5);

fn full(registry: &PoolRegistry) -> bool {
    registry.pools().iter().all(|pool| {
        (0..pool.classes()).all(|c| {
            let class = AllocClass(c as u8);
            pool.count(class) == pool.watermarks(class).map(|m| m.high)
        })
    })
}

#[test]
fn test_start_prewarms_every_pool() {
    let registry = PoolRegistry::builder(config(&[(0, 8), (1, 4)]))
        .build()
        .unwrap();
    registry.start().unwrap();
    assert!(registry.is_worker_running());

    assert!(wait_until(WAIT, || full(&registry)));
    assert_eq!(registry.stats(1, AllocClass::MOVABLE).unwrap().count, 2);

    // Starting twice keeps the single worker
    registry.start().unwrap();
    assert!(registry.is_worker_running());

    registry.shutdown();
    assert!(!registry.is_worker_running());
}

#[test]
fn test_worker_refills_after_privileged_drain() {
    let counters = Arc::new(PoolCounters::new(&[0], 2));
    let registry = PoolRegistry::builder(config(&[(0, 8)]))
        .metrics(counters.clone())
        .build()
        .unwrap();
    registry.start().unwrap();
    assert!(wait_until(WAIT, || full(&registry)));

    let held: Vec<_> = {
        let _ctx = CallerContext::tagged().enter();
        (0..4)
            .map(|_| registry.allocate(0, AllocClass::UNMOVABLE, false).unwrap())
            .collect()
    };
    assert_eq!(held.len(), 4);

    // Worker tops the class back up to high
    assert!(wait_until(WAIT, || {
        registry.stats(0, AllocClass::UNMOVABLE).unwrap().count == 4
    }));
    let snap = counters.snapshot(0, AllocClass::UNMOVABLE).unwrap();
    assert_eq!(snap.fast_hits, 4);
    assert!(snap.refill_passes >= 2);
}

#[test]
fn test_failing_backing_abandons_each_class() {
    let backing = Arc::new(CountingBacking::with_budget(0));
    let registry = PoolRegistry::builder(config(&[(0, 8), (1, 8)]))
        .backing(backing.clone())
        .build()
        .unwrap();

    let report = registry.refill_pass();
    assert_eq!(report.blocks_added, 0);
    assert_eq!(report.classes_refilled, 0);
    assert_eq!(report.failures, 4);

    // One failed attempt per class, no retry loop
    assert_eq!(backing.obtain_failures.load(std::sync::atomic::Ordering::SeqCst), 4);
    assert_eq!(registry.stats(0, AllocClass::UNMOVABLE).unwrap().count, 0);
}

#[test]
fn test_partial_budget_fills_what_it_can() {
    let backing = Arc::new(CountingBacking::with_budget(6));
    let registry = PoolRegistry::builder(config(&[(0, 8)]))
        .backing(backing.clone())
        .build()
        .unwrap();

    let report = registry.refill_pass();
    assert_eq!(report.blocks_added, 6);
    assert_eq!(report.classes_refilled, 2);
    assert_eq!(report.failures, 1);
    assert_eq!(registry.stats(0, AllocClass::UNMOVABLE).unwrap().count, 4);
    assert_eq!(registry.stats(0, AllocClass::MOVABLE).unwrap().count, 2);
    assert_eq!(backing.obtained(), 6);
}

#[test]
fn test_prepare_failure_releases_block() {
    let backing = Arc::new(CountingBacking::failing_prepare());
    let registry = PoolRegistry::builder(config(&[(0, 8)]))
        .backing(backing.clone())
        .build()
        .unwrap();

    let report = registry.refill_pass();
    assert_eq!(report.failures, 2);
    assert_eq!(report.blocks_added, 0);
    assert_eq!(backing.obtained(), 2);
    assert_eq!(backing.released(), 2);
    assert_eq!(registry.stats(0, AllocClass::MOVABLE).unwrap().count, 0);
}

#[test]
fn test_shutdown_releases_through_backing() {
    let backing = Arc::new(CountingBacking::new());
    let registry = PoolRegistry::builder(config(&[(0, 8), (1, 4)]))
        .backing(backing.clone())
        .build()
        .unwrap();
    registry.start().unwrap();
    assert!(wait_until(WAIT, || full(&registry)));

    let released = registry.shutdown();
    assert_eq!(released, 12);
    assert_eq!(backing.released(), 12);
    assert_eq!(backing.obtained(), 12);
    assert!(registry.dump().buckets.iter().all(|b| b.stats.count == 0));

    // No refill after shutdown
    assert_eq!(registry.refill_pass().blocks_added, 0);
}

#[test]
fn test_drop_without_shutdown_releases_blocks() {
    let backing = Arc::new(CountingBacking::new());
    let registry = PoolRegistry::builder(config(&[(0, 8)]))
        .backing(backing.clone())
        .build()
        .unwrap();
    registry.start().unwrap();
    assert!(wait_until(WAIT, || full(&registry)));

    drop(registry);
    assert!(wait_until(WAIT, || backing.released() == 8));
}

#[test]
fn test_disable_and_reenable_triggers_refill() {
    let registry = PoolRegistry::builder(config(&[(0, 8)]))
        .priority(Arc::new(|| true))
        .build()
        .unwrap();
    registry.set_enabled(false);
    registry.start().unwrap();
    assert!(!registry.refill_pending());
    assert_eq!(registry.stats(0, AllocClass::UNMOVABLE).unwrap().count, 0);

    registry.set_enabled(true);
    assert!(wait_until(WAIT, || full(&registry)));
}

#[test]
fn test_refill_in_flight_during_shutdown_is_released() {
    let backing = Arc::new(CountingBacking::slow(Duration::from_millis(200)));
    let registry = PoolRegistry::builder(config(&[(0, 8)]))
        .backing(backing.clone())
        .build()
        .unwrap();

    let refill = {
        let registry = registry.clone();
        std::thread::spawn(move || registry.refill_pass())
    };

    // Shutdown drains while the first obtain is still inside the backing
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(registry.shutdown(), 0);
    let report = refill.join().unwrap();

    assert_eq!(report.blocks_added, 0);
    assert!(registry.dump().buckets.iter().all(|b| b.stats.count == 0));
    assert_eq!(backing.obtained(), 1);
    assert_eq!(backing.released(), backing.obtained());
}
