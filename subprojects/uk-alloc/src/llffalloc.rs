//! # Linked list First Fit Allocator
//!
//! This module provides a linked list first fit allocator.
//! It is used to allocate memory for the entire program.
//!
//! It is based on the [linked_list_allocator](https://github.com/rust-osdev/linked_list_allocator) crate.
use core::{alloc::Layout, ptr::NonNull};

use spin::Mutex;

use crate::{Alloc, config};

/// A wrapper around the linked list allocator that provides
/// a lazy initialization mechanism for the heap.
pub struct Heap(Option<linked_list_allocator::Heap>);

impl Heap {
    /// Create a new allocator with an uninitialized heap.
    pub const fn new_uninit() -> Self {
        Self(None)
    }

    /// Create an allocator over the given memory region.
    ///
    /// # Safety
    ///
    /// The region `[bottom, bottom + size)` must be valid, writable, and
    /// exclusively owned by this heap for as long as it is used.
    pub unsafe fn from_region(bottom: NonNull<u8>, size: usize) -> Self {
        // SAFETY: The caller guarantees the region is valid and exclusively owned.
        Self(Some(unsafe {
            linked_list_allocator::Heap::new(bottom.as_ptr(), size)
        }))
    }

    /// Allocate memory from the heap.
    ///
    /// Returns `None` if the layout is invalid, the heap has no backing region
    /// yet, or the heap is exhausted.
    pub fn malloc(&mut self, size: usize, align: usize) -> Option<NonNull<u8>> {
        // Check if the layout is valid
        let layout = Layout::from_size_align(size, align).ok()?;

        let heap = self.inner()?;
        heap.allocate_first_fit(layout).ok()
    }

    /// Free memory to the heap.
    ///
    /// # Safety
    ///
    /// `ptr` must come from [`Heap::malloc`] on this heap with the same `layout`.
    pub unsafe fn free(&mut self, ptr: NonNull<u8>, layout: Layout) {
        let Some(heap) = self.inner() else {
            log::error!("uk_free({ptr:p}) on a heap without backing memory");
            return;
        };

        // SAFETY: The caller guarantees `ptr`/`layout` come from this heap.
        unsafe { heap.deallocate(ptr, layout) };
    }

    /// Number of bytes currently handed out.
    pub fn used(&self) -> usize {
        self.0.as_ref().map_or(0, |heap| heap.used())
    }

    fn inner(&mut self) -> Option<&mut linked_list_allocator::Heap> {
        if self.0.is_none() {
            self.0 = init_inner_heap();
        }
        self.0.as_mut()
    }
}

/// Initialize the linked-list allocator heap
///
/// The platform hands the heap region over through
/// [`uk_alloc_set_heap_region`](config::uk_alloc_set_heap_region). Until it
/// does, the heap stays uninitialized and every allocation fails.
fn init_inner_heap() -> Option<linked_list_allocator::Heap> {
    let (heap_addr, heap_size) = config::heap_region()?;

    log::debug!("uk-alloc: heap at {heap_addr:p}, {heap_size:#x} bytes");

    // SAFETY: The platform guarantees this region is valid and owned by us.
    Some(unsafe { linked_list_allocator::Heap::new(heap_addr.as_ptr(), heap_size) })
}

/// A [`Heap`] behind a spinlock, usable as an [`Alloc`] instance.
pub struct LockedHeap(Mutex<Heap>);

impl LockedHeap {
    /// Create a heap that lazily picks up the configured heap region.
    pub const fn new_uninit() -> Self {
        Self(Mutex::new(Heap::new_uninit()))
    }

    /// Create a heap over the given memory region.
    ///
    /// # Safety
    ///
    /// See [`Heap::from_region`].
    pub unsafe fn from_region(bottom: NonNull<u8>, size: usize) -> Self {
        // SAFETY: Forwarded to the caller.
        Self(Mutex::new(unsafe { Heap::from_region(bottom, size) }))
    }

    /// Acquires the heap lock.
    pub fn lock(&self) -> spin::MutexGuard<'_, Heap> {
        self.0.lock()
    }
}

impl Alloc for LockedHeap {
    fn memalign(&self, align: usize, size: usize) -> Option<NonNull<u8>> {
        self.lock().malloc(size, align)
    }

    unsafe fn free(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: The caller upholds the contract of `Alloc::free`.
        unsafe { self.lock().free(ptr, layout) }
    }
}
