//! # uk-cpu
//!
//! Access to the CPU thread-pointer register of the architectures the
//! unikernel runs on: `FS.base` on x86_64 and `TPIDR_EL0` on aarch64.

#![no_std]

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("uk-cpu only supports x86_64 and aarch64 CPUs");

pub mod control_regs;
