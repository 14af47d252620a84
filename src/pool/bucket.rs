//! Per-class FIFO bucket of cached blocks

use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;

use super::block::Block;

/// Allocation class within a pool
///
/// Each class has its own queue and watermarks. The first two classes mirror
/// block mobility: long-lived unmovable data and movable data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct AllocClass(pub u8);

impl AllocClass {
    pub const UNMOVABLE: AllocClass = AllocClass(0);
    pub const MOVABLE: AllocClass = AllocClass(1);

    /// Get the raw index
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for AllocClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Low/high watermark pair for one bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Watermarks {
    /// Below this the refill worker is woken and the reserve band begins
    pub low: usize,
    /// Cache growth cap
    pub high: usize,
}

impl Watermarks {
    /// Split a size class budget evenly across `classes` allocation classes
    pub fn for_budget(total_blocks: usize, classes: usize) -> Self {
        let high = total_blocks / classes.max(1);
        Self { low: high / 2, high }
    }
}

/// Point-in-time view of a bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BucketStats {
    pub count: usize,
    /// Actual queue length, equal to `count` whenever observed under the lock
    pub queued: usize,
    pub low: usize,
    pub high: usize,
}

/// FIFO queue of free blocks for one (size class, allocation class) pair
///
/// Not synchronized on its own; the owning pool's lock guards every bucket.
#[derive(Debug)]
pub(crate) struct Bucket {
    queue: VecDeque<Block>,
    count: usize,
    marks: Watermarks,
}

impl Bucket {
    pub(crate) fn new(marks: Watermarks) -> Self {
        Self {
            queue: VecDeque::with_capacity(marks.high),
            count: 0,
            marks,
        }
    }

    pub(crate) fn push(&mut self, block: Block) {
        self.queue.push_back(block);
        self.count += 1;
        debug_assert_eq!(self.count, self.queue.len());
    }

    pub(crate) fn pop(&mut self) -> Option<Block> {
        let block = self.queue.pop_front()?;
        self.count -= 1;
        debug_assert_eq!(self.count, self.queue.len());
        Some(block)
    }

    pub(crate) fn count(&self) -> usize {
        self.count
    }

    pub(crate) fn is_full(&self) -> bool {
        self.count >= self.marks.high
    }

    pub(crate) fn below_low(&self) -> bool {
        self.count < self.marks.low
    }

    pub(crate) fn marks(&self) -> Watermarks {
        self.marks
    }

    pub(crate) fn stats(&self) -> BucketStats {
        BucketStats {
            count: self.count,
            queued: self.queue.len(),
            low: self.marks.low,
            high: self.marks.high,
        }
    }

    /// Take every queued block, oldest first
    pub(crate) fn drain(&mut self) -> Vec<Block> {
        self.count = 0;
        self.queue.drain(..).collect()
    }
}
