//! First-thread initialization.
//!
//! The first thread of the process fills in the library record and becomes
//! able to address its own control block through the thread pointer. After
//! that, the record is frozen and threads can be created.

use core::{ffi::c_int, pin::Pin, ptr::NonNull};

use uk_arch_tls::{ArchTls, InstallError};

use crate::{
    context::LibcContext,
    glue::TcbGlue,
    pthread::{Pthread, Tid},
    sys::{Syscalls, TidState},
};

impl<A: ArchTls, M, S: Syscalls> TcbGlue<A, M, S> {
    /// Records the TLS geometry and page size, then initializes `td` as the
    /// process' first thread.
    ///
    /// Failure to install the thread pointer is fatal: without it no
    /// per-thread state is addressable, so the process crashes.
    ///
    /// # Safety
    ///
    /// * Must run on the thread `td` belongs to, before any other thread exists.
    /// * `td` must be the control block of a materialized TLS area.
    pub(crate) unsafe fn init_tls(&self, mut ctx: Pin<&mut LibcContext>, td: &mut Pthread) -> TidState {
        let size = self.arch.required_size();
        let align = self.arch.required_alignment();

        if let Err(err) = ctx
            .as_mut()
            .set_tls(size, align)
            .and_then(|()| ctx.as_mut().set_page_size(self.config.page_size))
        {
            log::warn!("library state not updated: {err}");
        }

        // SAFETY: Forwarded to the caller.
        match unsafe { self.init_tp(ctx, td) } {
            Ok(tid) => tid,
            Err(err) => crash(err),
        }
    }

    /// Makes `td` the current thread's control block and opens the gate.
    ///
    /// # Safety
    ///
    /// See [`init_tls`](Self::init_tls).
    unsafe fn init_tp(&self, mut ctx: Pin<&mut LibcContext>, td: &mut Pthread) -> Result<TidState, InstallError> {
        let this: *mut Pthread = td;
        td.self_ = this;

        // SAFETY: `td` is valid, and the caller guarantees we run on its thread.
        let tcb = unsafe { NonNull::new_unchecked(this) }.cast::<u8>();
        unsafe { self.arch.install_thread_pointer(self.arch.thread_pointer_of(tcb)) }?;

        if let Err(err) = ctx.as_mut().mark_ready() {
            log::warn!("first thread initialized twice: {err}");
        }

        // A failure here is expected while the unikernel has not assigned an
        // id to the thread yet. Startup goes on with the id unset.
        let tid = match self.sys.set_tid_address(NonNull::from(&mut td.tid)) {
            Ok(raw) => match c_int::try_from(raw).ok().and_then(Tid::new) {
                Some(tid) => {
                    td.tid = tid.get();
                    TidState::Assigned(tid)
                }
                None => {
                    log::warn!("set_tid_address returned invalid id {raw}");
                    td.tid = 0;
                    TidState::Invalid(raw)
                }
            },
            Err(errno) => {
                log::warn!("set_tid_address failed: {errno}");
                td.tid = 0;
                TidState::Unavailable(errno)
            }
        };

        td.locale = ctx.as_ref().global_locale_ptr().as_ptr();
        td.reset_robust_list();

        Ok(tid)
    }

    /// Resets the auxiliary-vector bookkeeping and records the page size
    /// (musl's `__init_libc`, minus everything the unikernel does itself).
    pub(crate) fn init_libc(&self, mut ctx: Pin<&mut LibcContext>) {
        if let Err(err) = ctx
            .as_mut()
            .clear_auxv()
            .and_then(|()| ctx.as_mut().set_page_size(self.config.page_size))
        {
            log::warn!("library state not updated: {err}");
        }
    }
}

/// Aborts startup after an unrecoverable first-thread failure.
#[cold]
fn crash(err: InstallError) -> ! {
    log::error!("Failed to initialize the main thread: {err}");
    panic!("Failed to initialize the main thread: {err}");
}

#[cfg(test)]
mod tests {
    use core::pin::pin;

    use uk_arch_tls::ThreadPointer;

    use super::*;
    use crate::{
        sys::Errno,
        testing::{AreaBuf, ScriptedSys, carve, glue, glue_with},
    };

    #[test]
    fn init_tls_records_geometry_and_opens_gate() {
        let glue = glue();
        let mut ctx = pin!(LibcContext::new());
        let mut buf = AreaBuf::new();
        let tcb = carve(&glue, &mut buf);

        let tid = unsafe { glue.init_tls(ctx.as_mut(), &mut *tcb.as_ptr()) };

        assert_eq!(tid, TidState::Assigned(Tid::new(1).unwrap()));
        assert!(ctx.can_do_threads());
        assert_eq!(ctx.tls_size(), glue.arch().required_size());
        assert_eq!(ctx.tls_align(), glue.arch().required_alignment());
        assert_eq!(ctx.page_size(), glue.config().page_size);
    }

    #[test]
    fn init_tls_links_self_locale_and_robust_list() {
        let glue = glue();
        let mut ctx = pin!(LibcContext::new());
        let mut buf = AreaBuf::new();
        let tcb = carve(&glue, &mut buf);

        unsafe { glue.init_tls(ctx.as_mut(), &mut *tcb.as_ptr()) };

        let td = unsafe { tcb.as_ref() };
        assert_eq!(td.self_, tcb.as_ptr());
        assert!(td.robust_list_is_empty());
        assert_eq!(td.locale, ctx.as_ref().global_locale_ptr().as_ptr().cast_const());
        assert_eq!(td.tid().map(Tid::get), Some(1));
    }

    #[test]
    fn init_tls_installs_adjusted_thread_pointer() {
        let glue = glue();
        let mut ctx = pin!(LibcContext::new());
        let mut buf = AreaBuf::new();
        let tcb = carve(&glue, &mut buf);

        unsafe { glue.init_tls(ctx.as_mut(), &mut *tcb.as_ptr()) };

        let register = glue.arch().register();
        assert_eq!(register.writes.get(), 1);
        assert_eq!(
            register.get(),
            glue.arch().thread_pointer_of(tcb.cast()).as_ptr() as usize
        );
    }

    #[test]
    fn init_tls_tolerates_tid_failure_and_leaves_id_unset() {
        let glue = glue_with(ScriptedSys::answering(Err(Errno::EOPNOTSUPP)));
        let mut ctx = pin!(LibcContext::new());
        let mut buf = AreaBuf::new();
        let tcb = carve(&glue, &mut buf);

        let tid = unsafe { glue.init_tls(ctx.as_mut(), &mut *tcb.as_ptr()) };

        assert_eq!(tid, TidState::Unavailable(Errno::EOPNOTSUPP));
        assert!(ctx.can_do_threads());
        let td = unsafe { tcb.as_ref() };
        assert_eq!(td.tid(), None);
        assert_eq!(glue.sys().last_tidptr.get(), &raw const td.tid as usize);
    }

    #[test]
    fn init_tls_flags_non_positive_id_as_invalid() {
        let glue = glue_with(ScriptedSys::answering(Ok(0)));
        let mut ctx = pin!(LibcContext::new());
        let mut buf = AreaBuf::new();
        let tcb = carve(&glue, &mut buf);

        let tid = unsafe { glue.init_tls(ctx.as_mut(), &mut *tcb.as_ptr()) };

        assert_eq!(tid, TidState::Invalid(0));
        assert_eq!(unsafe { tcb.as_ref() }.tid(), None);
    }

    #[test]
    fn init_tls_discards_id_out_of_c_int_range() {
        let raw: core::ffi::c_long = (1 << 32) + 7;
        let glue = glue_with(ScriptedSys::answering(Ok(raw)));
        let mut ctx = pin!(LibcContext::new());
        let mut buf = AreaBuf::new();
        let tcb = carve(&glue, &mut buf);

        let tid = unsafe { glue.init_tls(ctx.as_mut(), &mut *tcb.as_ptr()) };

        assert_eq!(tid, TidState::Invalid(raw));
        assert_eq!(unsafe { tcb.as_ref() }.tid(), None);
    }

    #[test]
    #[should_panic(expected = "Failed to initialize the main thread")]
    fn init_tls_crashes_when_thread_pointer_is_rejected() {
        let glue = glue();
        glue.arch().register().reject.set(true);
        let mut ctx = pin!(LibcContext::new());
        let mut buf = AreaBuf::new();
        let tcb = carve(&glue, &mut buf);

        unsafe { glue.init_tls(ctx.as_mut(), &mut *tcb.as_ptr()) };
    }

    #[test]
    fn init_libc_clears_auxv_and_records_page_size() {
        let glue = glue();
        let mut ctx = pin!(LibcContext::new());

        glue.init_libc(ctx.as_mut());

        assert!(ctx.auxv().is_null());
        assert_eq!(ctx.hwcap(), 0);
        assert_eq!(ctx.sysinfo(), 0);
        assert_eq!(ctx.page_size(), glue.config().page_size);
        assert!(!ctx.can_do_threads());
    }
}
