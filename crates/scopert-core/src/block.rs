//! Raw heap blocks backing tracked allocations.
//!
//! A [`Block`] owns one allocation from the global allocator, aligned to
//! [`BLOCK_ALIGN`] so payload pointers are usable by C callers for any
//! fundamental type. Contents are always initialized: new blocks are zeroed
//! and growth zeroes the added tail.

#![allow(unsafe_code)]

use std::alloc::{self, Layout};
use std::ptr::NonNull;

/// Alignment of every payload handed out by the tracked allocator.
pub const BLOCK_ALIGN: usize = 16;

/// The global allocator refused a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AllocFailure {
    pub(crate) requested: usize,
}

fn layout_for(size: usize) -> Result<Layout, AllocFailure> {
    // Zero-sized layouts are not allowed by the global allocator.
    Layout::from_size_align(size.max(1), BLOCK_ALIGN).map_err(|_| AllocFailure { requested: size })
}

pub(crate) struct Block {
    ptr: NonNull<u8>,
    size: usize,
}

impl Block {
    pub(crate) fn zeroed(size: usize) -> Result<Self, AllocFailure> {
        let layout = layout_for(size)?;
        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(AllocFailure { requested: size })?;
        Ok(Self { ptr, size })
    }

    /// Resize in place or by moving. The first `min(old, new)` bytes are kept.
    pub(crate) fn resize(&mut self, new_size: usize) -> Result<(), AllocFailure> {
        let old_layout = layout_for(self.size)?;
        let new_layout = layout_for(new_size)?;
        // SAFETY: `ptr` was allocated with `old_layout`; the new size is non-zero
        // and `layout_for` proved it does not overflow isize when rounded.
        let raw = unsafe { alloc::realloc(self.ptr.as_ptr(), old_layout, new_layout.size()) };
        let ptr = NonNull::new(raw).ok_or(AllocFailure {
            requested: new_size,
        })?;

        if new_size > self.size {
            // SAFETY: [old size, new size) lies inside the reallocated block.
            unsafe { ptr.as_ptr().add(self.size).write_bytes(0, new_size - self.size) };
        }

        self.ptr = ptr;
        self.size = new_size;
        Ok(())
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.size
    }

    #[inline]
    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        // SAFETY: the block owns `size` initialized bytes.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.size) }
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: the block owns `size` initialized bytes and `&mut self` is unique.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.size) }
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        if let Ok(layout) = layout_for(self.size) {
            // SAFETY: `ptr` was allocated with exactly this layout.
            unsafe { alloc::dealloc(self.ptr.as_ptr(), layout) };
        }
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("ptr", &self.ptr)
            .field("size", &self.size)
            .finish()
    }
}
