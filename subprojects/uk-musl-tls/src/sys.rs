//! System-call collaborator.

use core::{
    ffi::{c_int, c_long},
    ptr::NonNull,
};

use crate::pthread::Tid;

/// A Linux-style error number.
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
#[error("errno {0}")]
pub struct Errno(pub c_int);

impl Errno {
    pub const ENOMEM: Self = Self(12);
    pub const ENOSYS: Self = Self(38);
    pub const EOPNOTSUPP: Self = Self(95);

    /// Decodes a raw system-call return value: negative values in
    /// `-4095..=-1` are errors, anything else is a result.
    pub fn from_ret(ret: c_long) -> Result<c_long, Self> {
        if (-4095..0).contains(&ret) {
            return Err(Self(-ret as c_int));
        }
        Ok(ret)
    }
}

/// The system calls the glue issues.
pub trait Syscalls {
    /// `set_tid_address(2)`: registers `tidptr` as the clear-child-tid address
    /// of the calling thread and returns its thread id, as the raw
    /// system-call value.
    fn set_tid_address(&self, tidptr: NonNull<c_int>) -> Result<c_long, Errno>;
}

impl<S: Syscalls + ?Sized> Syscalls for &S {
    fn set_tid_address(&self, tidptr: NonNull<c_int>) -> Result<c_long, Errno> {
        (**self).set_tid_address(tidptr)
    }
}

/// Outcome of the thread-id request made while initializing the first thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TidState {
    /// The kernel assigned an id; it was stored in the control block.
    Assigned(Tid),
    /// No id could be obtained. The control block's id stays unset.
    Unavailable(Errno),
    /// The call succeeded with a value that is not a thread id (non-positive
    /// or out of `c_int` range). It was discarded.
    Invalid(c_long),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_ret_splits_errors_from_values() {
        assert_eq!(Errno::from_ret(-95), Err(Errno::EOPNOTSUPP));
        assert_eq!(Errno::from_ret(1), Ok(1));
        assert_eq!(Errno::from_ret(0), Ok(0));
        // Out of the errno range: a value, not an error.
        assert_eq!(Errno::from_ret(-5000), Ok(-5000));
    }
}
