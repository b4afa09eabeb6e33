//! # Global allocator
//!
//! This module provides a global allocator that uses the linked list allocator,
//! and [`DefaultAlloc`], the [`Alloc`] handle that forwards to whichever
//! `#[global_allocator]` the final image links (`uk_alloc_get_default()` in
//! the unikernel's C API).
use alloc::alloc::{alloc, dealloc};
use core::{
    alloc::{GlobalAlloc, Layout},
    ptr::{self, NonNull},
};

use crate::{Alloc, llffalloc::LockedHeap};

/// The process-wide heap instance.
pub static HEAP: LockedHeap = LockedHeap::new_uninit();

/// A global allocator that uses the linked list allocator.
pub struct GlobalLinkedListAllocator;

unsafe impl GlobalAlloc for GlobalLinkedListAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        HEAP.lock()
            .malloc(layout.size(), layout.align())
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let Some(ptr) = NonNull::new(ptr) else {
            return;
        };

        // SAFETY: `GlobalAlloc` guarantees `ptr` was allocated with `layout`.
        unsafe { HEAP.lock().free(ptr, layout) }
    }
}

#[cfg(feature = "global-allocator")]
#[global_allocator]
static GLOBAL_ALLOCATOR: GlobalLinkedListAllocator = GlobalLinkedListAllocator;

/// Handle to the default (global) allocator.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultAlloc;

impl Alloc for DefaultAlloc {
    fn memalign(&self, align: usize, size: usize) -> Option<NonNull<u8>> {
        let layout = Layout::from_size_align(size, align).ok()?;
        if layout.size() == 0 {
            return None;
        }

        // SAFETY: The layout has a non-zero size.
        NonNull::new(unsafe { alloc(layout) })
    }

    unsafe fn free(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: The caller guarantees `ptr` was returned by `memalign` with `layout`.
        unsafe { dealloc(ptr.as_ptr(), layout) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_alloc_round_trips_through_the_global_allocator() {
        let layout = Layout::from_size_align(1024, 0x1000).unwrap();

        let ptr = DefaultAlloc.memalign(layout.align(), layout.size()).unwrap();
        assert_eq!(ptr.as_ptr() as usize % 0x1000, 0);

        unsafe { DefaultAlloc.free(ptr, layout) };
    }

    #[test]
    fn default_alloc_rejects_zero_sized_requests() {
        assert!(DefaultAlloc.memalign(8, 0).is_none());
    }
}
