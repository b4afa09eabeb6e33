//! Heap configuration set by the platform before allocator initialization.

use core::{
    ptr::NonNull,
    sync::atomic::{AtomicPtr, AtomicUsize, Ordering},
};

static HEAP_ADDR: AtomicPtr<u8> = AtomicPtr::new(core::ptr::null_mut());
static HEAP_SIZE: AtomicUsize = AtomicUsize::new(0);

/// Hands the heap region over to the process-wide allocator.
///
/// Called by the platform boot code once the memory region backing the heap
/// is known. Uses `#[no_mangle]` to ensure a single symbol when multiple
/// staticlibs link uk-alloc.
///
/// # Safety
///
/// * Must be called before any heap allocation occurs.
/// * The region `[addr, addr + size)` must be valid, writable, and not used by
///   anything else for the rest of the process.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn uk_alloc_set_heap_region(addr: NonNull<u8>, size: usize) {
    HEAP_ADDR.store(addr.as_ptr(), Ordering::Release);
    HEAP_SIZE.store(size, Ordering::Release);
}

/// Get the heap region if one was handed over.
///
/// Returns `Some((addr, size))` if [`uk_alloc_set_heap_region`] was called.
pub fn heap_region() -> Option<(NonNull<u8>, usize)> {
    let addr = HEAP_ADDR.load(Ordering::Acquire);
    let size = HEAP_SIZE.load(Ordering::Acquire);

    NonNull::new(addr).map(|a| (a, size))
}
