//! Functions to read and write the thread-pointer control register
//!
//! The thread pointer is the per-CPU register the ELF TLS ABI reserves for the
//! current thread's TLS block. Compilers emit `%fs:`-relative accesses on
//! x86_64 and `mrs xN, tpidr_el0` sequences on aarch64 for every
//! `__thread` / `thread_local!` variable.
//!
//! # References
//!
//! - [ELF Handling For Thread-Local Storage](https://www.akkadia.org/drepper/tls.pdf)
//! - [ARM TPIDR_EL0 Register](https://developer.arm.com/documentation/ddi0601/2024-12/AArch64-Registers/TPIDR-EL0--EL0-Read-Write-Software-Thread-ID-Register)
//! - [rust-osdev/x86_64: FsBase](https://docs.rs/x86_64/latest/x86_64/registers/model_specific/struct.FsBase.html)

/// Errors that can occur when writing the thread-pointer register.
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum ThreadPointerError {
    /// The address cannot be loaded into the register.
    ///
    /// On x86_64 the `FS.base` MSR only accepts canonical addresses; loading a
    /// non-canonical one raises `#GP`.
    #[error("address {0:#x} cannot be used as a thread pointer")]
    InvalidAddress(usize),
}

/// Read the thread-pointer register of the current CPU.
///
/// Returns the base address currently loaded into `FS.base`.
#[cfg(target_arch = "x86_64")]
#[inline]
pub fn thread_pointer() -> usize {
    use x86_64::registers::model_specific::FsBase;

    FsBase::read().as_u64() as usize
}

/// Write the thread-pointer register of the current CPU.
///
/// Loads `addr` into the `FS.base` model specific register.
///
/// # Safety
///
/// * Must be called on the thread whose thread pointer is being set.
/// * `addr` must point to a TLS block laid out as the compiler expects for
///   the current target; every subsequent TLS access goes through it.
#[cfg(target_arch = "x86_64")]
pub unsafe fn set_thread_pointer(addr: usize) -> Result<(), ThreadPointerError> {
    use x86_64::{VirtAddr, registers::model_specific::FsBase};

    let addr = VirtAddr::try_new(addr as u64)
        .map_err(|_| ThreadPointerError::InvalidAddress(addr))?;
    FsBase::write(addr);

    Ok(())
}

/// Read the thread-pointer register of the current CPU.
///
/// Returns the value of the `tpidr_el0` system register.
#[cfg(target_arch = "aarch64")]
#[inline]
pub fn thread_pointer() -> usize {
    // SAFETY: Reading TPIDR_EL0 is a side-effect-free operation.
    unsafe { tpidr_el0() }
}

/// Write the thread-pointer register of the current CPU.
///
/// Loads `addr` into the `tpidr_el0` system register.
///
/// # Safety
///
/// * Must be called on the thread whose thread pointer is being set.
/// * `addr` must point to a TLS block laid out as the compiler expects for
///   the current target; every subsequent TLS access goes through it.
#[cfg(target_arch = "aarch64")]
pub unsafe fn set_thread_pointer(addr: usize) -> Result<(), ThreadPointerError> {
    // TPIDR_EL0 accepts any 64-bit value; a null thread pointer is still rejected
    // since no TLS block can live there.
    if addr == 0 {
        return Err(ThreadPointerError::InvalidAddress(addr));
    }

    // SAFETY: The caller guarantees this runs on the target thread.
    unsafe { set_tpidr_el0(addr) };

    Ok(())
}

/// Read the `tpidr_el0` system register.
///
/// # SAFETY
///
/// This function is `naked`, and its body is written in assembly.
/// The assembly code reads the `tpidr_el0` system register and returns
/// its value in `x0`, according to the AArch64 procedure call standard.
#[cfg(target_arch = "aarch64")]
#[unsafe(naked)]
pub unsafe extern "C" fn tpidr_el0() -> usize {
    core::arch::naked_asm!(
        "mrs x0, tpidr_el0", // Move the value of `tpidr_el0` into the return register `x0`
        "ret",
    );
}

/// Write the `tpidr_el0` system register.
///
/// # SAFETY
///
/// This function is `naked`, and its body is written in assembly.
/// The value to store is passed in `x0`, according to the AArch64 procedure
/// call standard.
#[cfg(target_arch = "aarch64")]
#[unsafe(naked)]
pub unsafe extern "C" fn set_tpidr_el0(value: usize) {
    core::arch::naked_asm!(
        "msr tpidr_el0, x0", // Move the first argument into `tpidr_el0`
        "ret",
    );
}
