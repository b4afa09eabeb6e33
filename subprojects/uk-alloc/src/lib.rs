//! # uk-alloc
//!
//! Allocator collaborator for the musl TLS glue.
//!
//! The glue only needs two operations from an allocator: an aligned allocation
//! (`uk_memalign()` in the unikernel's C API) and the matching release
//! (`uk_free()`). They are expressed by the [`Alloc`] trait so the caller decides
//! which allocator instance backs a given control block.
//!
//! Two implementations are provided:
//!
//! - [`llffalloc::LockedHeap`]: a linked-list first-fit heap over a region
//!   handed over by the platform (see [`config`]).
//! - [`global::DefaultAlloc`]: forwards to whatever `#[global_allocator]` the
//!   final image links. With the `global-allocator` feature enabled that is the
//!   process-wide [`LockedHeap`](llffalloc::LockedHeap) instance.
#![no_std]

// The `alloc` crate enables memory allocation.
extern crate alloc;

use core::{alloc::Layout, ptr::NonNull};

pub mod config;
pub mod global;
pub mod llffalloc;

pub use global::DefaultAlloc;
pub use llffalloc::LockedHeap;

/// Aligned allocation interface used by the TLS glue.
///
/// An allocation obtained from one instance must be released through the
/// *same* instance. Implementations are not required to detect mismatched
/// pairs.
pub trait Alloc {
    /// Allocates `size` bytes aligned to `align`.
    ///
    /// Returns `None` if the request cannot be satisfied or if `align` is not a
    /// power of two.
    fn memalign(&self, align: usize, size: usize) -> Option<NonNull<u8>>;

    /// Releases a block previously returned by [`Alloc::memalign`].
    ///
    /// # Safety
    ///
    /// * `ptr` must have been returned by `memalign` on this same allocator.
    /// * `layout` must match the `size`/`align` of that request.
    /// * The block must not be released twice.
    unsafe fn free(&self, ptr: NonNull<u8>, layout: Layout);
}

impl<A: Alloc + ?Sized> Alloc for &A {
    #[inline]
    fn memalign(&self, align: usize, size: usize) -> Option<NonNull<u8>> {
        (**self).memalign(align, size)
    }

    #[inline]
    unsafe fn free(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: The caller upholds the contract of `Alloc::free`.
        unsafe { (**self).free(ptr, layout) }
    }
}
