//! Thread attach and detach hooks.
//!
//! The unikernel calls [`TcbGlue::uktcb_init`] for every thread it creates
//! without going through `pthread_create`, and [`TcbGlue::tcb_fini`] when
//! such a thread is torn down. The first call of the process initializes the
//! library; every later call only prepares the new control block.

use core::{
    ffi::c_void,
    pin::Pin,
    ptr::{self, NonNull},
};

use uk_alloc::Alloc;
use uk_arch_tls::ArchTls;

use crate::{
    context::LibcContext,
    glue::TcbGlue,
    pthread::Pthread,
    sys::{Syscalls, TidState},
};

/// What the glue needs to know about a unikernel thread.
#[derive(Debug, Clone, Copy)]
pub struct ThreadDesc {
    /// Lowest address of the thread's stack. Null when the stack is not
    /// managed by the unikernel.
    pub stack: *mut c_void,
}

/// Which attach path was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attach {
    /// The control block became the process' first thread.
    FirstThread(TidState),
    /// The control block was prepared for an additional thread.
    Thread,
}

/// Errors returned by [`TcbGlue::uktcb_init`].
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum AttachError {
    /// The allocator could not provide the thread-specific-data buffer.
    #[error("failed to allocate {size} bytes of thread-specific data (align {align:#x})")]
    TsdAlloc { size: usize, align: usize },
}

/// Errors returned by [`TcbGlue::tcb_fini`].
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum DetachError {
    /// The control block owns no thread-specific-data buffer: it was never
    /// attached as an additional thread, or it was already detached.
    #[error("control block owns no thread-specific data")]
    NoTsd,
}

impl<A: ArchTls, M: Alloc, S: Syscalls> TcbGlue<A, M, S> {
    /// Attaches `tcb` to `thread`.
    ///
    /// While the library is uninitialized, `tcb` becomes the first thread
    /// (see [`init_tls`](Self::init_tls)). Afterwards, the control block gets
    /// the thread's stack, its self-pointer, the shared locale and a freshly
    /// allocated, zeroed, thread-specific-data buffer it owns until
    /// [`tcb_fini`](Self::tcb_fini).
    ///
    /// # Safety
    ///
    /// * `tcb` must be the control block of a TLS area carved by
    ///   [`copy_tls`](Self::copy_tls), not in use by any other thread.
    /// * On the first call, the caller must run on the thread that `tcb`
    ///   belongs to, and no other thread may exist yet.
    pub unsafe fn uktcb_init(
        &self,
        ctx: Pin<&mut LibcContext>,
        thread: &ThreadDesc,
        tcb: NonNull<Pthread>,
    ) -> Result<Attach, AttachError> {
        if ctx.can_do_threads() {
            // SAFETY: Forwarded to the caller.
            return unsafe { self.attach_thread(ctx.into_ref(), thread, tcb) };
        }

        log::debug!("uk_thread_uktcb_init stack {:p}, tcb {tcb:p}", thread.stack);

        // SAFETY: The caller guarantees `tcb` is a valid, unshared control block.
        let td = unsafe { &mut *tcb.as_ptr() };
        // SAFETY: Forwarded to the caller.
        let tid = unsafe { self.init_tls(ctx, td) };
        Ok(Attach::FirstThread(tid))
    }

    /// Prepares `tcb` for an additional thread once the library is ready.
    ///
    /// Only reads the library record, so it can be shared with concurrent
    /// attaches.
    ///
    /// # Safety
    ///
    /// `tcb` must be the control block of a TLS area carved by
    /// [`copy_tls`](Self::copy_tls), not in use by any other thread.
    pub unsafe fn attach_thread(
        &self,
        ctx: Pin<&LibcContext>,
        thread: &ThreadDesc,
        tcb: NonNull<Pthread>,
    ) -> Result<Attach, AttachError> {
        debug_assert!(ctx.can_do_threads());
        log::debug!("uk_thread_uktcb_init stack {:p}, tcb {tcb:p}", thread.stack);

        // SAFETY: The caller guarantees `tcb` is a valid, unshared control block.
        let td = unsafe { &mut *tcb.as_ptr() };

        td.stack = thread.stack;
        td.stack_size = self.config.stack_size;
        td.self_ = tcb.as_ptr();

        let layout = self.tsd_layout;
        let Some(tsd) = self.alloc.memalign(layout.align(), layout.size()) else {
            log::warn!("no thread-specific data for tcb {tcb:p}");
            td.tsd = ptr::null_mut();
            return Err(AttachError::TsdAlloc {
                size: layout.size(),
                align: layout.align(),
            });
        };

        // SAFETY: The allocator returned `layout.size()` writable bytes.
        unsafe { ptr::write_bytes(tsd.as_ptr(), 0, layout.size()) };
        td.tsd = tsd.as_ptr().cast();
        td.locale = ctx.global_locale_ptr().as_ptr();

        Ok(Attach::Thread)
    }

    /// Releases the thread-specific-data buffer owned by `tcb`.
    ///
    /// # Safety
    ///
    /// `tcb` must be a valid control block no thread is running on.
    pub unsafe fn tcb_fini(&self, thread: &ThreadDesc, tcb: NonNull<Pthread>) -> Result<(), DetachError> {
        log::debug!("uk_thread_tcb_fini stack {:p}, tcb {tcb:p}", thread.stack);

        // SAFETY: The caller guarantees `tcb` is valid and unused.
        let td = unsafe { &mut *tcb.as_ptr() };

        let tsd = NonNull::new(td.tsd).ok_or(DetachError::NoTsd)?;
        td.tsd = ptr::null_mut();

        // SAFETY: A non-null `tsd` was allocated by `uktcb_init` with the
        // glue's TSD layout, from the glue's allocator.
        unsafe { self.alloc.free(tsd.cast(), self.tsd_layout) };
        Ok(())
    }

    /// Per-area hook, run for every TLS area the unikernel sets up.
    ///
    /// Only has an effect while the library is uninitialized.
    pub fn tls_tcb_init(&self, ctx: Pin<&mut LibcContext>, area: NonNull<u8>) {
        log::debug!("ukarch_tls_tcb_init tls_area {area:p}");

        if !ctx.can_do_threads() {
            self.init_libc(ctx);
        }
    }
}
