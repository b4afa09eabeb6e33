//! musl's thread control block.
//!
//! [`Pthread`] mirrors `struct pthread` from musl's `pthread_impl.h` as built
//! for the unikernel. The C library reaches it through the thread pointer, so
//! its layout is ABI: part 1 (up to `canary2`) is accessed from assembly and
//! the position of part 3 (`canary_at_end`, `dtv_copy`) relative to the end of
//! the structure is fixed.
//!
//! ```text
//! 0x00  ┌────────────────────────────┐
//!       │ self, dtv, prev, next      │ Part 1: external ABI
//!       │ sysinfo, canary, canary2   │
//! 0x38  ├────────────────────────────┤
//!       │ tid, errno_val, ...        │ Part 2: musl internals
//!       │ stack, stack_size, tsd     │
//!       │ robust_list, locale, ...   │
//! 0xD0  ├────────────────────────────┤
//!       │ canary_at_end, dtv_copy    │ Part 3: fixed from the end
//! 0xE0  └────────────────────────────┘
//! ```
//!
//! Offsets are for 64-bit targets.

use core::{
    ffi::{c_int, c_long, c_uchar, c_void},
    mem::offset_of,
    num::NonZeroI32,
    ptr,
};

use static_assertions::const_assert_eq;

use crate::context::Locale;

/// musl's `struct pthread`.
#[derive(Debug)]
#[repr(C)]
pub struct Pthread {
    /// Pointer to this structure.
    pub self_: *mut Pthread,
    /// Dynamic thread vector. The unikernel has a single TLS module, so this
    /// points at the TLS area itself.
    pub dtv: *mut usize,
    pub prev: *mut Pthread,
    pub next: *mut Pthread,
    pub sysinfo: usize,
    pub canary: usize,
    pub canary2: usize,

    /// Kernel thread id, written once. Zero until one is assigned.
    pub tid: c_int,
    pub errno_val: c_int,
    pub detach_state: c_int,
    pub cancel: c_int,
    pub canceldisable: c_uchar,
    pub cancelasync: c_uchar,
    /// `tsd_used:1` and `dlerror_flag:1` bit-fields.
    pub flags: c_uchar,
    pub map_base: *mut c_uchar,
    pub map_size: usize,
    /// Stack of the thread. Descriptive only for unikernel threads.
    pub stack: *mut c_void,
    pub stack_size: usize,
    pub guard_size: usize,
    pub result: *mut c_void,
    pub cancelbuf: *mut c_void,
    /// Thread-specific-data slots (`pthread_getspecific`).
    pub tsd: *mut *mut c_void,
    pub robust_list: RobustList,
    pub timer_id: c_int,
    /// Current locale. Shared, never owned by the thread.
    pub locale: *const Locale,
    pub killlock: [c_int; 1],
    pub dlerror_buf: *mut u8,
    pub stdio_locks: *mut c_void,

    pub canary_at_end: usize,
    /// Copy of [`dtv`](Self::dtv) at a fixed distance from the end.
    pub dtv_copy: *mut c_void,
}

/// Head of the list of robust mutexes held by a thread.
///
/// An empty list is represented by `head` pointing at itself.
#[derive(Debug)]
#[repr(C)]
pub struct RobustList {
    pub head: *mut c_void,
    pub off: c_long,
    pub pending: *mut c_void,
}

/// A kernel-assigned thread id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tid(NonZeroI32);

impl Tid {
    /// Wraps a raw id. Returns `None` for values that are not valid ids.
    pub fn new(raw: c_int) -> Option<Self> {
        if raw <= 0 {
            return None;
        }
        NonZeroI32::new(raw).map(Self)
    }

    /// The raw id.
    pub fn get(self) -> c_int {
        self.0.get()
    }
}

impl Pthread {
    /// The thread id, if one was assigned.
    pub fn tid(&self) -> Option<Tid> {
        // SAFETY: `tid` is a plain integer field of a live structure. The
        // volatile read keeps the load from being cached across a
        // `set_tid_address` registration.
        Tid::new(unsafe { ptr::read_volatile(&raw const self.tid) })
    }

    /// Whether the robust-mutex list is empty (head points at itself).
    pub fn robust_list_is_empty(&self) -> bool {
        ptr::eq(self.robust_list.head, (&raw const self.robust_list.head).cast())
    }

    /// Makes the robust-mutex list empty.
    pub fn reset_robust_list(&mut self) {
        self.robust_list.head = (&raw mut self.robust_list.head).cast();
    }
}

#[cfg(target_pointer_width = "64")]
mod layout_checks {
    use super::*;

    const_assert_eq!(offset_of!(Pthread, self_), 0x00);
    const_assert_eq!(offset_of!(Pthread, dtv), 0x08);
    const_assert_eq!(offset_of!(Pthread, sysinfo), 0x20);
    const_assert_eq!(offset_of!(Pthread, canary), 0x28);
    const_assert_eq!(offset_of!(Pthread, tid), 0x38);
    const_assert_eq!(offset_of!(Pthread, map_base), 0x50);
    const_assert_eq!(offset_of!(Pthread, tsd), 0x88);
    const_assert_eq!(offset_of!(Pthread, robust_list), 0x90);
    const_assert_eq!(offset_of!(Pthread, locale), 0xB0);
    const_assert_eq!(offset_of!(Pthread, canary_at_end), 0xD0);
    const_assert_eq!(offset_of!(Pthread, dtv_copy), 0xD8);
    const_assert_eq!(size_of::<Pthread>(), 0xE0);
}

#[cfg(test)]
mod tests {
    use core::mem::MaybeUninit;

    use super::*;

    fn zeroed() -> Pthread {
        // SAFETY: All-zero is a valid `Pthread`: null pointers and zero integers.
        unsafe { MaybeUninit::<Pthread>::zeroed().assume_init() }
    }

    #[test]
    fn tid_is_unset_when_zero_or_negative() {
        let mut td = zeroed();
        assert_eq!(td.tid(), None);

        td.tid = -95;
        assert_eq!(td.tid(), None);

        td.tid = 7;
        assert_eq!(td.tid().map(Tid::get), Some(7));
    }

    #[test]
    fn reset_robust_list_makes_head_self_referential() {
        let mut td = zeroed();
        assert!(!td.robust_list_is_empty());

        td.reset_robust_list();

        assert!(td.robust_list_is_empty());
        assert_eq!(
            td.robust_list.head as usize,
            &raw const td.robust_list.head as usize
        );
    }
}
