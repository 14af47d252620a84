//! Fixed-size memory block
//!
//! A block is a move-only owning handle to an aligned heap region. Whoever
//! holds the value owns the memory: a bucket while it is cached, a caller
//! once it has been handed out.

use std::alloc::{self, Layout};
use std::fmt;
use std::ptr::NonNull;

use crate::error::BackingError;

/// Owning handle to one fixed-size memory region
pub struct Block {
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: a Block is the unique owner of its region; no aliasing handle
// exists, so moving it across threads is sound.
unsafe impl Send for Block {}
// SAFETY: shared access only ever yields `&[u8]`.
unsafe impl Sync for Block {}

impl Block {
    /// Allocate a new zero-filled block from the global allocator
    pub fn allocate(size: usize, align: usize) -> Result<Self, BackingError> {
        if size == 0 {
            return Err(BackingError::Layout { size, align });
        }
        let layout =
            Layout::from_size_align(size, align).map_err(|_| BackingError::Layout { size, align })?;

        // SAFETY: layout has a non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };

        NonNull::new(raw)
            .map(|ptr| Self { ptr, layout })
            .ok_or(BackingError::OutOfMemory { size })
    }

    /// Size in bytes
    pub fn len(&self) -> usize {
        self.layout.size()
    }

    /// Blocks are never zero-sized
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Alignment of the region
    pub fn align(&self) -> usize {
        self.layout.align()
    }

    /// Start address, stable for the lifetime of the block
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr is valid and initialized for layout.size() bytes.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.layout.size()) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: ptr is valid for layout.size() bytes and &mut self is unique.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.layout.size()) }
    }

    /// Overwrite the whole block with zeros
    pub fn zero(&mut self) {
        // SAFETY: see as_mut_slice.
        unsafe { std::ptr::write_bytes(self.ptr.as_ptr(), 0, self.layout.size()) }
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        // SAFETY: ptr was returned by alloc_zeroed with this layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("addr", &self.ptr)
            .field("len", &self.layout.size())
            .finish()
    }
}
