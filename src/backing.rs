//! Backing allocator seam
//!
//! The reserve never creates memory itself. Fresh blocks come from a
//! [`BackingAllocator`], must pass its `prepare_for_reuse` step before they
//! are cached, and go back through `release_block` when the reserve does not
//! keep them.

use std::fmt;
use std::ops::BitOr;

use tracing::trace;

use crate::error::BackingError;
use crate::pool::Block;

/// Allocation hints for the backing allocator
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AllocFlags(u32);

impl AllocFlags {
    pub const NONE: AllocFlags = AllocFlags(0);
    /// Do not reclaim or wait for memory
    pub const NO_RECLAIM: AllocFlags = AllocFlags(1 << 0);
    /// Zero-fill the block
    pub const ZERO: AllocFlags = AllocFlags(1 << 1);
    /// Do not log allocation failures
    pub const NO_WARN: AllocFlags = AllocFlags(1 << 2);
    /// Fail instead of retrying internally
    pub const NO_RETRY: AllocFlags = AllocFlags(1 << 3);

    /// Flags used by the refill worker
    pub const REFILL: AllocFlags =
        AllocFlags(Self::NO_RECLAIM.0 | Self::ZERO.0 | Self::NO_WARN.0 | Self::NO_RETRY.0);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: AllocFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn without(self, other: AllocFlags) -> AllocFlags {
        AllocFlags(self.0 & !other.0)
    }
}

impl BitOr for AllocFlags {
    type Output = AllocFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        AllocFlags(self.0 | rhs.0)
    }
}

impl fmt::Debug for AllocFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::NO_RECLAIM, "NO_RECLAIM"),
            (Self::ZERO, "ZERO"),
            (Self::NO_WARN, "NO_WARN"),
            (Self::NO_RETRY, "NO_RETRY"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "AllocFlags({})", set.join(" | "))
    }
}

/// General-purpose allocator the reserve sits in front of
pub trait BackingAllocator: Send + Sync {
    /// Obtain a fresh block of `order`
    fn obtain_block(&self, order: u32, flags: AllocFlags) -> Result<Block, BackingError>;

    /// Make a freshly obtained block ready to be cached
    ///
    /// On error the reserve releases the block instead of caching it.
    fn prepare_for_reuse(&self, block: &mut Block, order: u32) -> Result<(), BackingError>;

    /// Take back a block the reserve will not keep
    fn release_block(&self, block: Block, order: u32);
}

/// Backing allocator over the Rust global allocator
///
/// Blocks are `block_size << order` bytes aligned to `block_size`. The
/// global allocator has no reclaim or retry behaviour to suppress, so only
/// the size class matters; fresh blocks are always zero-filled.
#[derive(Debug, Clone)]
pub struct SystemBacking {
    block_size: usize,
}

impl SystemBacking {
    /// `block_size` must be a power of two
    pub fn new(block_size: usize) -> Self {
        Self { block_size }
    }

    /// Bytes in a block of `order`, or `None` on overflow
    pub fn size_of(&self, order: u32) -> Option<usize> {
        self.block_size.checked_shl(order).filter(|s| s >> order == self.block_size)
    }
}

impl Default for SystemBacking {
    fn default() -> Self {
        Self::new(4096)
    }
}

impl BackingAllocator for SystemBacking {
    fn obtain_block(&self, order: u32, _flags: AllocFlags) -> Result<Block, BackingError> {
        let size = self.size_of(order).ok_or(BackingError::Layout {
            size: usize::MAX,
            align: self.block_size,
        })?;
        Block::allocate(size, self.block_size)
    }

    fn prepare_for_reuse(&self, block: &mut Block, order: u32) -> Result<(), BackingError> {
        let expected = self.size_of(order);
        if expected != Some(block.len()) || block.align() < self.block_size {
            return Err(BackingError::PrepareFailed {
                reason: format!(
                    "block of {} bytes aligned to {} does not fit order {}",
                    block.len(),
                    block.align(),
                    order
                ),
            });
        }
        Ok(())
    }

    fn release_block(&self, block: Block, order: u32) {
        trace!(order, len = block.len(), "Releasing block to global allocator");
        drop(block);
    }
}
