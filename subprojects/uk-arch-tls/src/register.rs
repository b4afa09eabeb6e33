use uk_cpu::control_regs::{self, ThreadPointerError};

/// Access to a thread-pointer register.
pub trait ThreadPointer {
    /// Returns the value currently loaded into the register.
    fn get(&self) -> usize;

    /// Loads `addr` into the register.
    ///
    /// # Safety
    ///
    /// Must be called on the thread whose thread pointer is being set; every
    /// TLS access made by that thread afterwards goes through `addr`.
    unsafe fn set(&self, addr: usize) -> Result<(), ThreadPointerError>;
}

/// The current CPU's thread-pointer register.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpuThreadPointer;

impl ThreadPointer for CpuThreadPointer {
    #[inline]
    fn get(&self) -> usize {
        control_regs::thread_pointer()
    }

    #[inline]
    unsafe fn set(&self, addr: usize) -> Result<(), ThreadPointerError> {
        // SAFETY: The caller guarantees this runs on the target thread.
        unsafe { control_regs::set_thread_pointer(addr) }
    }
}

impl<T: ThreadPointer + ?Sized> ThreadPointer for &T {
    #[inline]
    fn get(&self) -> usize {
        (**self).get()
    }

    #[inline]
    unsafe fn set(&self, addr: usize) -> Result<(), ThreadPointerError> {
        // SAFETY: Forwarded to the caller.
        unsafe { (**self).set(addr) }
    }
}
