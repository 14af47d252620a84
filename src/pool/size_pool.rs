//! One pool per size class
//!
//! A pool holds one bucket per allocation class behind a single lock. Lock
//! hold times are one queue push or pop; nothing blocking runs under it.

use parking_lot::Mutex;
use std::sync::Arc;

use super::block::Block;
use super::bucket::{AllocClass, Bucket, BucketStats, Watermarks};
use crate::backing::AllocFlags;
use crate::refill::RefillSignal;

#[derive(Debug)]
struct PoolState {
    buckets: Box<[Bucket]>,
    /// Set by `drain`; a closed pool accepts no more blocks
    closed: bool,
}

/// Reserve of cached blocks for one size class
#[derive(Debug)]
pub struct Pool {
    order: u32,
    block_size: usize,
    flags: AllocFlags,
    state: Mutex<PoolState>,
    /// Copy of each bucket's watermarks, fixed at construction
    marks: Box<[Watermarks]>,
    signal: Arc<RefillSignal>,
}

impl Pool {
    /// Create a pool with empty buckets
    ///
    /// `total_blocks` is split evenly across `classes`; each class gets
    /// `high = total_blocks / classes` and `low = high / 2`.
    pub fn new(
        order: u32,
        block_size: usize,
        total_blocks: usize,
        classes: usize,
        flags: AllocFlags,
        signal: Arc<RefillSignal>,
    ) -> Self {
        let marks: Box<[Watermarks]> = (0..classes)
            .map(|_| Watermarks::for_budget(total_blocks, classes))
            .collect();
        let buckets: Box<[Bucket]> = marks.iter().map(|m| Bucket::new(*m)).collect();

        Self {
            order,
            block_size,
            flags,
            state: Mutex::new(PoolState {
                buckets,
                closed: false,
            }),
            marks,
            signal,
        }
    }

    /// Size class exponent
    pub fn order(&self) -> u32 {
        self.order
    }

    /// Bytes per block
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Flags passed to the backing allocator on refill
    pub fn flags(&self) -> AllocFlags {
        self.flags
    }

    /// Number of allocation classes
    pub fn classes(&self) -> usize {
        self.marks.len()
    }

    pub fn has_class(&self, class: AllocClass) -> bool {
        class.index() < self.marks.len()
    }

    pub fn watermarks(&self, class: AllocClass) -> Option<Watermarks> {
        self.marks.get(class.index()).copied()
    }

    /// Current cached count for a class
    pub fn count(&self, class: AllocClass) -> Option<usize> {
        let state = self.state.lock();
        state.buckets.get(class.index()).map(Bucket::count)
    }

    pub fn stats(&self, class: AllocClass) -> Option<BucketStats> {
        let state = self.state.lock();
        state.buckets.get(class.index()).map(Bucket::stats)
    }

    /// Whether [`drain`](Self::drain) has run
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Append a block to the tail of a class queue
    ///
    /// No watermark check. The block is handed back if `class` is out of
    /// range or the pool is closed.
    pub fn add(&self, block: Block, class: AllocClass) -> Result<(), Block> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(block);
        }
        match state.buckets.get_mut(class.index()) {
            Some(bucket) => {
                bucket.push(block);
                Ok(())
            }
            None => Err(block),
        }
    }

    /// Append unless the class is already at its high watermark
    ///
    /// The check and the push happen under one lock acquisition, so
    /// concurrent returns and refills can never overfill a bucket, and
    /// nothing lands in a pool that has been drained.
    pub fn try_add(&self, block: Block, class: AllocClass) -> Result<(), Block> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(block);
        }
        match state.buckets.get_mut(class.index()) {
            Some(bucket) if !bucket.is_full() => {
                bucket.push(block);
                Ok(())
            }
            _ => Err(block),
        }
    }

    /// Pop the oldest cached block of a class
    ///
    /// Raises the refill signal once the class is below its low watermark,
    /// whether or not a block was available. `None` for an unknown class.
    pub fn remove(&self, class: AllocClass) -> Option<Block> {
        let (block, below_low) = {
            let mut state = self.state.lock();
            let bucket = state.buckets.get_mut(class.index())?;
            let block = bucket.pop();
            (block, bucket.below_low())
        };

        if below_low {
            self.signal.raise();
        }
        block
    }

    /// Whether a class is below its low watermark
    pub(crate) fn below_low(&self, class: AllocClass) -> bool {
        self.state
            .lock()
            .buckets
            .get(class.index())
            .is_some_and(Bucket::below_low)
    }

    /// Whether a class takes no more refill blocks
    pub(crate) fn is_full(&self, class: AllocClass) -> bool {
        let state = self.state.lock();
        state.closed
            || state
                .buckets
                .get(class.index())
                .map_or(true, Bucket::is_full)
    }

    /// Close the pool and take every cached block out of every class
    pub(crate) fn drain(&self) -> Vec<Block> {
        let mut state = self.state.lock();
        state.closed = true;
        let blocks = state.buckets.iter_mut().flat_map(Bucket::drain).collect();
        blocks
    }
}
