//! # musl TLS and thread-control-block glue for the unikernel
//!
//! musl expects every thread to own a TLS area with its `struct pthread` at a
//! fixed place relative to the thread pointer, and keeps process-wide state
//! (TLS geometry, page size, "can do threads") in its `libc` global. This
//! crate provides both on top of the unikernel's own thread primitives:
//!
//! - [`TcbGlue::copy_tls`] carves a TLS area out of caller memory and returns
//!   its control block.
//! - [`TcbGlue::uktcb_init`] / [`TcbGlue::tcb_fini`] attach and detach
//!   lightweight unikernel threads. The first attach initializes the library.
//! - [`TcbGlue::tls_tcb_init`] is run for every TLS area and resets the
//!   auxiliary-vector bookkeeping while the library is uninitialized.
//!
//! The library state lives in a [`LibcContext`]; the architecture, allocator
//! and system calls are supplied as [`ArchTls`](uk_arch_tls::ArchTls),
//! [`Alloc`](uk_alloc::Alloc) and [`Syscalls`].

#![no_std]

// The `alloc` crate enables memory allocation.
extern crate alloc;

mod attach;
mod config;
mod context;
mod glue;
mod init;
mod pthread;
mod region;
mod sys;

#[cfg(test)]
mod testing;

#[cfg(feature = "ffi")]
mod ffi;

pub use attach::*;
pub use config::*;
pub use context::*;
pub use glue::*;
pub use pthread::*;
pub use region::*;
pub use sys::*;
