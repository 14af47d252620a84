//! Fast-path allocator integration tests

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use reservepool::error::ErrorKind;
use reservepool::priority::{CallerContext, CriticalRole, ThreadPriorityProbe};
use reservepool::{AllocClass, Block, CancelToken, PoolError, PoolRegistry};

use common::{config, BLOCK_SIZE};

const CLASS0: AllocClass = AllocClass::UNMOVABLE;
const CLASS1: AllocClass = AllocClass::MOVABLE;

fn thread_probe_registry(total: usize) -> Arc<PoolRegistry> {
    PoolRegistry::builder(config(&[(0, total)]))
        .priority(Arc::new(ThreadPriorityProbe))
        .build()
        .unwrap()
}

fn count(registry: &PoolRegistry, class: AllocClass) -> usize {
    registry.stats(0, class).unwrap().count
}

/// Budget 8 across two classes: high 4, low 2
#[test]
fn test_budget_split_and_privileged_drain() {
    let registry = thread_probe_registry(8);
    let marks = registry.pool(0).unwrap().watermarks(CLASS0).unwrap();
    assert_eq!((marks.low, marks.high), (2, 4));

    registry.refill_pass();
    assert_eq!([count(&registry, CLASS0), count(&registry, CLASS1)], [4, 4]);
    assert!(!registry.refill_pending());

    {
        let _ctx = CallerContext::tagged().enter();
        for _ in 0..4 {
            assert!(registry.allocate(0, CLASS0, false).is_some());
        }
    }
    assert_eq!(count(&registry, CLASS0), 0);
    assert!(registry.refill_pending());

    // Worker has not run: unprivileged caller is refused
    let err = registry.try_allocate(0, CLASS0, false).unwrap_err();
    assert_eq!(err, PoolError::ReserveDenied { order: 0, class: CLASS0 });
    assert_eq!(err.kind(), ErrorKind::ResourceExhausted);

    // The other class is untouched
    assert_eq!(count(&registry, CLASS1), 4);
}

#[test]
fn test_unprivileged_denied_with_blocks_queued() {
    let registry = thread_probe_registry(8);
    registry.refill_pass();

    // Unprivileged callers may take the class down to low
    assert!(registry.allocate(0, CLASS1, false).is_some());
    assert!(registry.allocate(0, CLASS1, false).is_some());
    assert!(registry.allocate(0, CLASS1, false).is_some());
    assert_eq!(count(&registry, CLASS1), 1);

    // 1 < low: refused although a block is queued, and nothing is removed
    assert!(registry.allocate(0, CLASS1, true).is_none());
    assert_eq!(count(&registry, CLASS1), 1);

    // Each privileged context kind may take the last one
    let _ctx = CallerContext::with_role(CriticalRole::Compositor).enter();
    assert!(registry.allocate(0, CLASS1, false).is_some());
    assert_eq!(count(&registry, CLASS1), 0);
}

#[test]
fn test_fifo_reuse_order() {
    let registry = PoolRegistry::builder(config(&[(0, 8)]))
        .priority(Arc::new(|| true))
        .build()
        .unwrap();

    let blocks: Vec<Block> = (0..3)
        .map(|_| Block::allocate(BLOCK_SIZE, BLOCK_SIZE).unwrap())
        .collect();
    let addrs: Vec<*const u8> = blocks.iter().map(Block::as_ptr).collect();
    for block in blocks {
        registry.return_block(block, 0, CLASS0).unwrap();
    }

    for addr in addrs {
        let block = registry.allocate(0, CLASS0, false).unwrap();
        assert_eq!(block.as_ptr(), addr);
    }
}

#[test]
fn test_return_rejected_at_high() {
    let registry = thread_probe_registry(8);
    registry.refill_pass();
    assert_eq!(count(&registry, CLASS0), 4);

    let block = Block::allocate(BLOCK_SIZE, BLOCK_SIZE).unwrap();
    let addr = block.as_ptr();
    let rejected = registry.return_block(block, 0, CLASS0).unwrap_err();
    assert_eq!(rejected.reason(), &PoolError::ReserveFull { order: 0, class: CLASS0 });
    assert_eq!(rejected.reason().kind(), ErrorKind::RejectedReturn);
    assert_eq!(rejected.into_block().as_ptr(), addr);
    assert_eq!(count(&registry, CLASS0), 4);

    // One below high: accepted, count goes up by exactly one
    let taken = registry.allocate(0, CLASS0, false).unwrap();
    assert_eq!(count(&registry, CLASS0), 3);
    registry.return_block(taken, 0, CLASS0).unwrap();
    assert_eq!(count(&registry, CLASS0), 4);
}

#[test]
fn test_invalid_return_keeps_block_with_caller() {
    let registry = thread_probe_registry(8);

    let block = Block::allocate(BLOCK_SIZE, BLOCK_SIZE).unwrap();
    let rejected = registry.return_block(block, 5, CLASS0).unwrap_err();
    assert_eq!(rejected.reason(), &PoolError::UnknownSizeClass { order: 5 });

    let block = rejected.into_block();
    let rejected = registry.return_block(block, 0, AllocClass(9)).unwrap_err();
    assert_eq!(rejected.reason().kind(), ErrorKind::InvalidArgument);
    assert_eq!(count(&registry, CLASS0), 0);
}

#[test]
fn test_retry_blocks_for_attempts_times_interval() {
    let registry = PoolRegistry::builder(config(&[(0, 8)]))
        .priority(Arc::new(|| true))
        .build()
        .unwrap();
    let policy = registry.retry_policy();
    assert_eq!(policy.max_retries, 5);
    assert_eq!(policy.interval, Duration::from_millis(2));

    let start = Instant::now();
    let err = registry.try_allocate(0, CLASS0, true).unwrap_err();
    let elapsed = start.elapsed();

    assert_eq!(err, PoolError::Exhausted { order: 0, class: CLASS0, retries: 5 });
    assert!(elapsed >= policy.max_wait());
    assert!(elapsed < Duration::from_secs(1));

    // Without retry the miss is immediate
    let err = registry.try_allocate(0, CLASS0, false).unwrap_err();
    assert_eq!(err, PoolError::Exhausted { order: 0, class: CLASS0, retries: 0 });
}

#[test]
fn test_retry_succeeds_when_block_returned_meanwhile() {
    let mut cfg = config(&[(0, 8)]);
    cfg.retry_interval_ms = 20;
    let registry = PoolRegistry::builder(cfg)
        .priority(Arc::new(|| true))
        .build()
        .unwrap();

    let returner = {
        let registry = registry.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            let block = Block::allocate(BLOCK_SIZE, BLOCK_SIZE).unwrap();
            registry.return_block(block, 0, CLASS0).unwrap();
        })
    };

    let block = registry.try_allocate(0, CLASS0, true);
    returner.join().unwrap();
    assert!(block.is_ok());
}

#[test]
fn test_cancel_interrupts_retry() {
    let mut cfg = config(&[(0, 8)]);
    cfg.retry_interval_ms = 10_000;
    let registry = PoolRegistry::builder(cfg)
        .priority(Arc::new(|| true))
        .build()
        .unwrap();
    let token = CancelToken::new();

    let waiter = {
        let registry = registry.clone();
        let token = token.clone();
        thread::spawn(move || {
            let start = Instant::now();
            let result = registry.try_allocate_cancellable(0, CLASS0, &token);
            (result, start.elapsed())
        })
    };

    thread::sleep(Duration::from_millis(50));
    token.cancel();
    let (result, elapsed) = waiter.join().unwrap();

    assert!(matches!(result, Err(PoolError::Interrupted { retries: 0, .. })));
    assert!(elapsed < Duration::from_secs(5));
}

#[test]
fn test_shutdown_interrupts_waiting_caller() {
    let mut cfg = config(&[(0, 8)]);
    cfg.retry_interval_ms = 10_000;
    let registry = PoolRegistry::builder(cfg)
        .priority(Arc::new(|| true))
        .build()
        .unwrap();

    let waiter = {
        let registry = registry.clone();
        thread::spawn(move || {
            let start = Instant::now();
            let result = registry.try_allocate(0, CLASS0, true);
            (result, start.elapsed())
        })
    };

    thread::sleep(Duration::from_millis(50));
    registry.shutdown();
    let (result, elapsed) = waiter.join().unwrap();

    // Normally interrupted mid-wait; Disabled if the thread started late
    assert!(matches!(
        result,
        Err(PoolError::Interrupted { .. }) | Err(PoolError::Disabled)
    ));
    assert!(elapsed < Duration::from_secs(5));
}

#[test]
fn test_concurrent_allocate_return_keeps_counts_consistent() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 2_000;

    let registry = PoolRegistry::builder(config(&[(0, 8), (1, 8)]))
        .priority(Arc::new(|| true))
        .build()
        .unwrap();
    registry.refill_pass();

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let registry = registry.clone();
            thread::spawn(move || {
                let order = (t % 2) as u32;
                let class = AllocClass((t / 2 % 2) as u8);
                for _ in 0..ROUNDS {
                    if let Some(block) = registry.allocate(order, class, false) {
                        registry.return_block(block, order, class).unwrap();
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for order in [0, 1] {
        for class in [CLASS0, CLASS1] {
            let stats = registry.stats(order, class).unwrap();
            assert_eq!(stats.count, stats.queued);
            assert_eq!(stats.count, 4);

            // Every cached block is distinct
            let addrs: HashSet<usize> = (0..4)
                .map(|_| registry.allocate(order, class, false).unwrap().as_ptr() as usize)
                .collect();
            assert_eq!(addrs.len(), 4);
        }
    }
}

#[test]
fn test_shutdown_interrupts_cancellable_caller() {
    let mut cfg = config(&[(0, 8)]);
    cfg.retry_interval_ms = 10_000;
    let registry = PoolRegistry::builder(cfg)
        .priority(Arc::new(|| true))
        .build()
        .unwrap();
    let token = CancelToken::new();

    let waiter = {
        let registry = registry.clone();
        let token = token.clone();
        thread::spawn(move || {
            let start = Instant::now();
            let result = registry.try_allocate_cancellable(0, CLASS0, &token);
            (result, start.elapsed())
        })
    };

    thread::sleep(Duration::from_millis(50));
    registry.shutdown();
    let (result, elapsed) = waiter.join().unwrap();

    assert!(matches!(
        result,
        Err(PoolError::Interrupted { .. }) | Err(PoolError::Disabled)
    ));
    assert!(elapsed < Duration::from_secs(5));
    // The caller's own token is left alone
    assert!(!token.is_cancelled());
}
