//! Process-wide library record.
//!
//! [`LibcContext`] holds what musl keeps in its `libc` global: the TLS area
//! geometry, the page size, the auxiliary-vector bookkeeping and the default
//! locale, together with the gate telling whether threads can be used.
//!
//! The gate has two states and a single transition:
//!
//! ```text
//!   Uninit ──(first thread initialized)──► Ready
//! ```
//!
//! Once `Ready`, the TLS size/alignment and the page size never change again.

use core::{
    ffi::c_void,
    marker::PhantomPinned,
    pin::Pin,
    ptr::{self, NonNull},
};

/// State of the "can do threads" gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibState {
    /// No thread has been initialized yet.
    Uninit,
    /// The first thread owns a valid thread pointer; threads can be created.
    Ready,
}

/// musl's `struct __locale_struct`: one map per locale category.
///
/// All-null maps select the "C" locale.
#[derive(Debug)]
#[repr(C)]
pub struct Locale {
    pub cat: [*const c_void; 6],
}

impl Locale {
    /// The "C" locale.
    pub const C: Self = Self {
        cat: [ptr::null(); 6],
    };
}

#[derive(Debug)]
struct Record {
    state: LibState,
    tls_size: usize,
    tls_align: usize,
    page_size: usize,
    auxv: *mut usize,
    hwcap: usize,
    sysinfo: usize,
}

/// The process-wide library record.
///
/// Control blocks point at [`global_locale`](Self::global_locale), so the
/// record is only mutated through `Pin<&mut LibcContext>`: it must stay at the
/// same address for as long as any control block refers to it.
#[derive(Debug)]
pub struct LibcContext {
    record: Record,
    global_locale: Locale,
    _pin: PhantomPinned,
}

impl LibcContext {
    /// Creates a record in the [`LibState::Uninit`] state.
    pub const fn new() -> Self {
        Self {
            record: Record {
                state: LibState::Uninit,
                tls_size: 0,
                tls_align: 1,
                page_size: 0,
                auxv: ptr::null_mut(),
                hwcap: 0,
                sysinfo: 0,
            },
            global_locale: Locale::C,
            _pin: PhantomPinned,
        }
    }

    /// State of the gate.
    pub fn state(&self) -> LibState {
        self.record.state
    }

    /// Whether threads can be used (`libc.can_do_threads`).
    pub fn can_do_threads(&self) -> bool {
        self.record.state == LibState::Ready
    }

    /// Size of one TLS area, TCB included.
    pub fn tls_size(&self) -> usize {
        self.record.tls_size
    }

    /// Alignment of a TLS area. `1` until the first thread is initialized.
    pub fn tls_align(&self) -> usize {
        self.record.tls_align
    }

    /// Page size. `0` until recorded.
    pub fn page_size(&self) -> usize {
        self.record.page_size
    }

    /// Auxiliary vector. The unikernel has none.
    pub fn auxv(&self) -> *mut usize {
        self.record.auxv
    }

    /// Hardware capabilities (`__hwcap`).
    pub fn hwcap(&self) -> usize {
        self.record.hwcap
    }

    /// vsyscall entry point (`__sysinfo`).
    pub fn sysinfo(&self) -> usize {
        self.record.sysinfo
    }

    /// The default locale shared by every thread.
    pub fn global_locale(&self) -> &Locale {
        &self.global_locale
    }

    /// Address of the default locale, stable for as long as the record is
    /// pinned.
    pub fn global_locale_ptr(self: Pin<&Self>) -> NonNull<Locale> {
        NonNull::from(&self.get_ref().global_locale)
    }

    /// Records the TLS area geometry.
    pub(crate) fn set_tls(self: Pin<&mut Self>, size: usize, align: usize) -> Result<(), GateError> {
        let record = self.record_mut()?;
        record.tls_size = size;
        record.tls_align = align;
        Ok(())
    }

    /// Records the page size.
    pub(crate) fn set_page_size(self: Pin<&mut Self>, page_size: usize) -> Result<(), GateError> {
        self.record_mut()?.page_size = page_size;
        Ok(())
    }

    /// Clears the auxiliary-vector bookkeeping: no auxv, no hwcap, no vsyscall.
    pub(crate) fn clear_auxv(self: Pin<&mut Self>) -> Result<(), GateError> {
        let record = self.record_mut()?;
        record.auxv = ptr::null_mut();
        record.hwcap = 0;
        record.sysinfo = 0;
        Ok(())
    }

    /// Moves the gate from `Uninit` to `Ready`.
    ///
    /// Returns [`GateError::AlreadyReady`] if the transition already happened.
    pub(crate) fn mark_ready(self: Pin<&mut Self>) -> Result<(), GateError> {
        self.record_mut()?.state = LibState::Ready;
        Ok(())
    }

    /// Mutable access to the record, refused once the gate is `Ready`.
    fn record_mut(self: Pin<&mut Self>) -> Result<&mut Record, GateError> {
        // SAFETY: `record` is not structurally pinned; only `global_locale`
        // must keep its address, and it is never moved out of here.
        let record = unsafe { &mut self.get_unchecked_mut().record };
        if record.state == LibState::Ready {
            return Err(GateError::AlreadyReady);
        }
        Ok(record)
    }
}

impl Default for LibcContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors returned when the library record is written after the gate opened.
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum GateError {
    /// The record is frozen.
    #[error("library state is already initialized")]
    AlreadyReady,
}

#[cfg(test)]
mod tests {
    use core::pin::pin;

    use super::*;

    #[test]
    fn new_context_is_uninit() {
        let ctx = LibcContext::new();

        assert_eq!(ctx.state(), LibState::Uninit);
        assert!(!ctx.can_do_threads());
        assert_eq!(ctx.tls_align(), 1);
    }

    #[test]
    fn gate_opens_exactly_once() {
        let mut ctx = pin!(LibcContext::new());

        assert_eq!(ctx.as_mut().mark_ready(), Ok(()));
        assert_eq!(ctx.as_mut().mark_ready(), Err(GateError::AlreadyReady));
        assert_eq!(ctx.state(), LibState::Ready);
    }

    #[test]
    fn record_is_frozen_once_ready() {
        let mut ctx = pin!(LibcContext::new());
        ctx.as_mut().set_tls(256, 16).unwrap();
        ctx.as_mut().set_page_size(0x1000).unwrap();
        ctx.as_mut().mark_ready().unwrap();

        assert_eq!(ctx.as_mut().set_tls(512, 64), Err(GateError::AlreadyReady));
        assert_eq!(ctx.as_mut().set_page_size(0x2000), Err(GateError::AlreadyReady));
        assert_eq!(ctx.as_mut().clear_auxv(), Err(GateError::AlreadyReady));

        assert_eq!(ctx.tls_size(), 256);
        assert_eq!(ctx.tls_align(), 16);
        assert_eq!(ctx.page_size(), 0x1000);
    }

    #[test]
    fn global_locale_ptr_is_stable() {
        let ctx = pin!(LibcContext::new());

        let first = ctx.as_ref().global_locale_ptr();
        let second = ctx.as_ref().global_locale_ptr();

        assert_eq!(first, second);
        assert!(ptr::eq(first.as_ptr(), ctx.global_locale()));
    }
}
