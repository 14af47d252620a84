//! Error types
//!
//! Every failure of the fast path is reported through a return value. The
//! caller decides whether to fall back to the backing allocator.

use thiserror::Error;

use crate::pool::{AllocClass, Block};

/// Failure reported by a [`BackingAllocator`](crate::backing::BackingAllocator)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackingError {
    /// The allocator could not supply a block of this size
    #[error("backing allocator out of memory ({size} bytes requested)")]
    OutOfMemory { size: usize },

    /// The requested size/alignment is not representable
    #[error("invalid block layout: {size} bytes aligned to {align}")]
    Layout { size: usize, align: usize },

    /// The block could not be made ready for caching
    #[error("prepare for reuse failed: {reason}")]
    PrepareFailed { reason: String },
}

/// Coarse classification of a [`PoolError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unknown size or allocation class, wrong block size, or disabled registry
    InvalidArgument,
    /// Nothing could be served from the reserve
    ResourceExhausted,
    /// The reserve is full and did not take the block back
    RejectedReturn,
    /// The backing allocator failed during a refill pass
    UnderlyingAllocationFailure,
}

/// Errors from the reserve pool
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("no pool configured for order {order}")]
    UnknownSizeClass { order: u32 },

    #[error("allocation class {class} out of range ({classes} configured)")]
    UnknownAllocClass { class: AllocClass, classes: usize },

    #[error("reserve pool is disabled")]
    Disabled,

    #[error("block of {actual} bytes does not belong to order {order} ({expected} bytes)")]
    BlockSizeMismatch {
        order: u32,
        expected: usize,
        actual: usize,
    },

    #[error("order {order} class {class} below low watermark, caller not privileged")]
    ReserveDenied { order: u32, class: AllocClass },

    #[error("order {order} class {class} empty after {retries} retries")]
    Exhausted {
        order: u32,
        class: AllocClass,
        retries: u32,
    },

    #[error("order {order} class {class} wait interrupted after {retries} retries")]
    Interrupted {
        order: u32,
        class: AllocClass,
        retries: u32,
    },

    #[error("order {order} class {class} already at high watermark")]
    ReserveFull { order: u32, class: AllocClass },

    #[error(transparent)]
    Backing(#[from] BackingError),
}

impl PoolError {
    /// Map onto the coarse error kind
    pub fn kind(&self) -> ErrorKind {
        match self {
            PoolError::UnknownSizeClass { .. }
            | PoolError::UnknownAllocClass { .. }
            | PoolError::Disabled
            | PoolError::BlockSizeMismatch { .. } => ErrorKind::InvalidArgument,
            PoolError::ReserveDenied { .. }
            | PoolError::Exhausted { .. }
            | PoolError::Interrupted { .. } => ErrorKind::ResourceExhausted,
            PoolError::ReserveFull { .. } => ErrorKind::RejectedReturn,
            PoolError::Backing(_) => ErrorKind::UnderlyingAllocationFailure,
        }
    }
}

/// A block the reserve refused to take back
///
/// Ownership stays with the caller, who must release the block through the
/// backing allocator.
#[derive(Debug, Error)]
#[error("block not returned to reserve: {reason}")]
pub struct RejectedReturn {
    block: Block,
    reason: PoolError,
}

impl RejectedReturn {
    pub(crate) fn new(block: Block, reason: PoolError) -> Self {
        Self { block, reason }
    }

    /// Why the return was refused
    pub fn reason(&self) -> &PoolError {
        &self.reason
    }

    /// Take the block back
    pub fn into_block(self) -> Block {
        self.block
    }
}
