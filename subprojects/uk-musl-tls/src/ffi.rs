//! C symbols called by musl and by the unikernel's thread subsystem.
//!
//! All entry points share one process-wide [`LibcContext`] and one glue
//! instance built from the linker-provided TLS image, the CPU thread-pointer
//! register, the default allocator and the unikernel's system-call table.
//!
//! # References
//! - [unikraft/lib-musl: `__uk_init_tls.c`](https://github.com/unikraft/lib-musl)
//! - [unikraft: `include/uk/thread.h`](https://github.com/unikraft/unikraft/blob/staging/lib/uksched/include/uk/thread.h)

use core::{
    alloc::Layout,
    cell::UnsafeCell,
    ffi::{c_int, c_long, c_void},
    pin::Pin,
    ptr::{self, NonNull},
};

use uk_alloc::DefaultAlloc;
use uk_arch_tls::{CpuThreadPointer, LayoutError, StaticTls, ffi::linker_image};

use crate::{
    attach::ThreadDesc,
    config::{ConfigError, LibcConfig},
    context::LibcContext,
    glue::TcbGlue,
    pthread::Pthread,
    sys::{Errno, Syscalls},
};

type Glue = TcbGlue<StaticTls<'static, CpuThreadPointer>, DefaultAlloc, UkSyscalls>;

/// The process-wide library record (musl's `libc` global).
static LIBC: GlobalContext = GlobalContext(UnsafeCell::new(LibcContext::new()));

static GLUE: spin::Once<Glue> = spin::Once::new();

/// Wrapper making the library record usable from a `static`.
struct GlobalContext(UnsafeCell<LibcContext>);

// SAFETY: The record is written by the first thread before any other thread
// exists, and is read-only afterwards (every write is refused by the gate).
unsafe impl Sync for GlobalContext {}

/// Returns the process-wide library record for reading.
///
/// # Safety
///
/// No exclusive reference to the record may be alive.
unsafe fn libc_ref() -> Pin<&'static LibcContext> {
    // SAFETY: Exclusivity is guaranteed by the caller.
    Pin::static_ref(unsafe { &*LIBC.0.get() })
}

/// Returns the process-wide library record for the first thread's writes.
///
/// # Safety
///
/// No other reference to the record may be alive.
unsafe fn libc() -> Pin<&'static mut LibcContext> {
    // SAFETY: The record lives in a `static`, so it never moves. Exclusivity
    // is guaranteed by the caller.
    unsafe { Pin::new_unchecked(&mut *LIBC.0.get()) }
}

/// Returns the process-wide glue, building it on first use.
fn glue() -> &'static Glue {
    match GLUE.try_call_once(build_glue) {
        Ok(glue) => glue,
        Err(err) => {
            log::error!("Failed to set up the TLS glue: {err}");
            panic!("Failed to set up the TLS glue: {err}");
        }
    }
}

fn build_glue() -> Result<Glue, GlueError> {
    let arch = StaticTls::native(linker_image(), Layout::new::<Pthread>())?;
    Ok(TcbGlue::new(arch, DefaultAlloc, UkSyscalls, LibcConfig::DEFAULT)?)
}

#[derive(Debug, thiserror::Error)]
enum GlueError {
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// The unikernel's in-kernel system-call table.
#[derive(Debug, Clone, Copy)]
struct UkSyscalls;

unsafe extern "C" {
    fn uk_syscall_r_set_tid_address(tidptr: *mut c_int) -> c_long;
}

impl Syscalls for UkSyscalls {
    fn set_tid_address(&self, tidptr: NonNull<c_int>) -> Result<c_long, Errno> {
        // SAFETY: `tidptr` points at the `tid` field of a live control block.
        Errno::from_ret(unsafe { uk_syscall_r_set_tid_address(tidptr.as_ptr()) })
    }
}

/// Prefix of the unikernel's `struct uk_thread`.
///
/// Only the fields up to `mem` are declared; the glue never reads past them.
#[repr(C)]
struct UkThread {
    _ctx: [usize; 2],
    _ectx: *mut c_void,
    _tlsp: usize,
    _uktlsp: usize,
    mem: UkThreadMem,
}

#[repr(C)]
struct UkThreadMem {
    stack: *mut c_void,
    _auxstack: *mut c_void,
    _uktls: *mut c_void,
}

impl UkThread {
    fn desc(thread: *const Self) -> ThreadDesc {
        // SAFETY: The unikernel passes a valid thread or null.
        let stack = unsafe { thread.as_ref() }.map_or(ptr::null_mut(), |thread| thread.mem.stack);
        ThreadDesc { stack }
    }
}

/// Carves a TLS area at `mem` (rounded down to the TLS alignment) and returns
/// its control block.
#[unsafe(no_mangle)]
unsafe extern "C" fn __uk_copy_tls(mem: *mut u8) -> *mut c_void {
    let Some(mem) = NonNull::new(mem) else {
        log::error!("__uk_copy_tls called with a null area");
        return ptr::null_mut();
    };

    let glue = glue();
    // SAFETY: Only the first thread writes the record, and not concurrently
    // with this call.
    let ctx = unsafe { libc_ref() };
    // SAFETY: musl hands over memory sized and reserved for a TLS area.
    match unsafe { glue.copy_tls(ctx.get_ref(), mem) } {
        Ok(tcb) => tcb.as_ptr().cast(),
        Err(err) => {
            log::error!("__uk_copy_tls: {err}");
            ptr::null_mut()
        }
    }
}

/// Attaches the control block `tcb` to a unikernel thread.
///
/// Returns `0` on success or `-ENOMEM` if the thread-specific-data buffer
/// cannot be allocated.
#[unsafe(no_mangle)]
unsafe extern "C" fn uk_thread_uktcb_init(thread: *mut UkThread, tcb: *mut c_void) -> c_int {
    let Some(tcb) = NonNull::new(tcb.cast::<Pthread>()) else {
        log::error!("uk_thread_uktcb_init called without a tcb");
        return -Errno::ENOMEM.0;
    };

    let desc = UkThread::desc(thread);
    // SAFETY: The unikernel serializes thread creation with the first
    // thread's initialization, and `tcb` comes from `__uk_copy_tls`. The
    // record is only borrowed mutably while it is uninitialized.
    let outcome = unsafe {
        let ctx = libc_ref();
        if ctx.can_do_threads() {
            glue().attach_thread(ctx, &desc, tcb)
        } else {
            glue().uktcb_init(libc(), &desc, tcb)
        }
    };

    match outcome {
        Ok(_) => 0,
        Err(err) => {
            log::error!("uk_thread_uktcb_init: {err}");
            -Errno::ENOMEM.0
        }
    }
}

/// Releases what [`uk_thread_uktcb_init`] allocated for `tcb`.
#[unsafe(no_mangle)]
unsafe extern "C" fn uk_thread_tcb_fini(thread: *mut UkThread, tcb: *mut c_void) {
    let Some(tcb) = NonNull::new(tcb.cast::<Pthread>()) else {
        return;
    };

    let desc = UkThread::desc(thread);
    // SAFETY: The unikernel only tears down threads that are not running.
    if let Err(err) = unsafe { glue().tcb_fini(&desc, tcb) } {
        log::error!("uk_thread_tcb_fini: {err}");
    }
}

/// Per-area hook, run by the unikernel for every TLS area it sets up.
#[unsafe(no_mangle)]
unsafe extern "C" fn ukarch_tls_tcb_init(tls_area: *mut c_void) {
    let Some(area) = NonNull::new(tls_area.cast::<u8>()) else {
        return;
    };

    // SAFETY: No reference to the record outlives a hook call, and the record
    // is only borrowed mutably while it is uninitialized.
    if unsafe { libc_ref() }.can_do_threads() {
        log::debug!("ukarch_tls_tcb_init tls_area {area:p}");
        return;
    }
    glue().tls_tcb_init(unsafe { libc() }, area);
}
