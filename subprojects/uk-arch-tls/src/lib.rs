//! # Architecture TLS helpers for the unikernel
//!
//! This crate provides the architecture-dependent half of thread-local storage
//! (TLS) setup: how large a thread's TLS area must be, how it must be aligned,
//! where the thread pointer and the C runtime's Thread Control Block (TCB) sit
//! inside it, and how the thread pointer is loaded into the CPU.
//!
//! The architecture-independent half (what goes *into* the TCB) belongs to the C
//! library glue built on top of this crate. The two halves talk through the
//! [`ArchTls`] trait.
//!
//! ## TLS area
//!
//! Every thread gets one contiguous *TLS area* holding:
//!
//! - a copy of the program's **TLS segment** (`.tdata` followed by a zeroed
//!   `.tbss`), see [`TlsImage`];
//! - the C runtime's **TCB** (musl's `struct pthread`), whose size and alignment
//!   the C runtime dictates.
//!
//! The ELF TLS ABI defines two ways of arranging both parts relative to the
//! thread pointer (TP). [`TlsAreaLayout`] computes the offsets for either one.
//!
//! ### Variant I (aarch64)
//!
//! ```text
//! area ─────────┬────────────────────────────┐
//!               │ <padding>                  │ so that TP is aligned
//! tcb ─────────►├────────────────────────────┤
//!               │ TCB (struct pthread)       │
//! TP ──────────►├────────────────────────────┤
//!               │ <reserved>                 │ 16 bytes, rounded up to the
//!               │                            │ segment alignment
//!               ├────────────────────────────┤
//!               │ .tdata                     │
//!               │ .tbss                      │
//!               └────────────────────────────┘
//! ```
//!
//! ### Variant II (x86_64)
//!
//! ```text
//! area ─────────┬────────────────────────────┐
//!               │ <padding>                  │
//!               ├────────────────────────────┤
//!               │ .tdata                     │
//!               │ .tbss                      │
//! TP = tcb ────►├────────────────────────────┤
//!               │ TCB (struct pthread)       │ first word: TP self pointer
//!               └────────────────────────────┘
//! ```
//!
//! On x86_64 the ABI requires the first word at TP to hold TP itself, so that
//! `mov %fs:0, %rax` yields the thread pointer. [`StaticTls`] writes it while
//! materializing the area.
//!
//! ## Thread pointer
//!
//! The TP is loaded into `FS.base` (x86_64) or `TPIDR_EL0` (aarch64) through
//! the [`ThreadPointer`] abstraction. Loading it is only meaningful on the
//! thread that will use the area.
//!
//! ## References
//!
//! - [ELF Handling For Thread-Local Storage](https://www.akkadia.org/drepper/tls.pdf)
//! - [ARM: Thread-Local Storage](https://developer.arm.com/documentation/100748/0624/Thread-Local-Storage)
//! - [MaskRay: All about Thread Local Storage](https://maskray.me/blog/2021-02-14-all-about-thread-local-storage)

#![no_std]

use core::ptr::NonNull;

#[cfg(feature = "ffi")]
pub mod ffi;
mod image;
mod layout;
mod register;
mod static_tls;

pub use image::TlsImage;
pub use layout::{LayoutError, TlsAreaLayout, TlsVariant};
pub use register::{CpuThreadPointer, ThreadPointer};
pub use static_tls::StaticTls;
pub use uk_cpu::control_regs::ThreadPointerError;

/// Architecture TLS helper.
///
/// Implemented by whatever knows the TLS area layout of the running image. All
/// pointers are byte pointers into a caller-owned TLS area; the helper never
/// owns the memory it describes.
pub trait ArchTls {
    /// Size in bytes of one TLS area, TCB included.
    fn required_size(&self) -> usize;

    /// Alignment the start of a TLS area must satisfy. Always a power of two.
    fn required_alignment(&self) -> usize;

    /// Initializes a TLS area: copies `.tdata`, zeroes `.tbss` and the TCB,
    /// and writes whatever the ABI requires at the thread pointer.
    ///
    /// # Safety
    ///
    /// * `area` must be aligned to [`required_alignment`](Self::required_alignment).
    /// * `area` must be valid for writes of [`required_size`](Self::required_size)
    ///   bytes and not be in use by any thread.
    unsafe fn materialize_area(&self, area: NonNull<u8>);

    /// Returns the thread-pointer value for the TLS area starting at `area`.
    fn tls_pointer(&self, area: NonNull<u8>) -> NonNull<u8>;

    /// Returns the TCB of the TLS area starting at `area`.
    fn locate_control_block(&self, area: NonNull<u8>) -> NonNull<u8>;

    /// Returns the thread-pointer value for the TLS area whose TCB is `tcb`.
    ///
    /// This is the inverse of [`locate_control_block`](Self::locate_control_block)
    /// followed by [`tls_pointer`](Self::tls_pointer) (musl's `TP_ADJ`).
    fn thread_pointer_of(&self, tcb: NonNull<u8>) -> NonNull<u8>;

    /// Loads `tp` into the thread-pointer register of the current CPU.
    ///
    /// # Safety
    ///
    /// * Must be called on the thread that owns the TLS area `tp` points into.
    /// * The area must have been materialized.
    unsafe fn install_thread_pointer(&self, tp: NonNull<u8>) -> Result<(), InstallError>;
}

/// Errors returned by [`ArchTls::install_thread_pointer`].
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum InstallError {
    /// The thread pointer does not satisfy the TLS alignment.
    #[error("thread pointer {addr:#x} is not aligned to {align:#x}")]
    Misaligned { addr: usize, align: usize },

    /// The CPU refused the value.
    #[error(transparent)]
    Register(#[from] ThreadPointerError),
}
