//! Recording fakes for the glue's collaborators.

use alloc::vec::Vec;
use core::{
    alloc::Layout,
    cell::{Cell, RefCell},
    ffi::{c_int, c_long},
    ptr::NonNull,
};

use uk_alloc::{Alloc, DefaultAlloc};
use uk_arch_tls::{StaticTls, ThreadPointer, ThreadPointerError, TlsImage, TlsVariant};

use crate::{
    config::LibcConfig,
    glue::TcbGlue,
    pthread::Pthread,
    sys::{Errno, Syscalls},
};

pub(crate) static TDATA: [u8; 8] = *b"tdata!!\0";

/// Thread-pointer register that only records what it is given.
#[derive(Default)]
pub(crate) struct FakeRegister {
    pub value: Cell<usize>,
    pub writes: Cell<usize>,
    pub reject: Cell<bool>,
}

impl ThreadPointer for FakeRegister {
    fn get(&self) -> usize {
        self.value.get()
    }

    unsafe fn set(&self, addr: usize) -> Result<(), ThreadPointerError> {
        if self.reject.get() {
            return Err(ThreadPointerError::InvalidAddress(addr));
        }
        self.value.set(addr);
        self.writes.set(self.writes.get() + 1);
        Ok(())
    }
}

/// Allocator forwarding to the global allocator while keeping a ledger.
#[derive(Default)]
pub(crate) struct CountingAlloc {
    pub live: RefCell<Vec<(usize, Layout)>>,
    pub allocs: Cell<usize>,
    pub frees: Cell<usize>,
    pub fail: Cell<bool>,
}

impl Alloc for CountingAlloc {
    fn memalign(&self, align: usize, size: usize) -> Option<NonNull<u8>> {
        if self.fail.get() {
            return None;
        }

        let ptr = DefaultAlloc.memalign(align, size)?;
        let layout = Layout::from_size_align(size, align).ok()?;
        self.live.borrow_mut().push((ptr.as_ptr() as usize, layout));
        self.allocs.set(self.allocs.get() + 1);
        Some(ptr)
    }

    unsafe fn free(&self, ptr: NonNull<u8>, layout: Layout) {
        let mut live = self.live.borrow_mut();
        let idx = live
            .iter()
            .position(|&(addr, _)| addr == ptr.as_ptr() as usize)
            .expect("free of a block this allocator does not own");
        let (_, recorded) = live.swap_remove(idx);
        assert_eq!(recorded, layout, "free with a mismatched layout");

        self.frees.set(self.frees.get() + 1);
        unsafe { DefaultAlloc.free(ptr, layout) };
    }
}

/// `set_tid_address` answering from a script.
pub(crate) struct ScriptedSys {
    pub answer: Result<c_long, Errno>,
    pub calls: Cell<usize>,
    pub last_tidptr: Cell<usize>,
}

impl ScriptedSys {
    pub fn answering(answer: Result<c_long, Errno>) -> Self {
        Self {
            answer,
            calls: Cell::new(0),
            last_tidptr: Cell::new(0),
        }
    }
}

impl Syscalls for ScriptedSys {
    fn set_tid_address(&self, tidptr: NonNull<c_int>) -> Result<c_long, Errno> {
        self.calls.set(self.calls.get() + 1);
        self.last_tidptr.set(tidptr.as_ptr() as usize);
        self.answer
    }
}

pub(crate) type TestGlue = TcbGlue<StaticTls<'static, FakeRegister>, CountingAlloc, ScriptedSys>;

pub(crate) fn glue_with(sys: ScriptedSys) -> TestGlue {
    let image = TlsImage::new(&TDATA, 40, 64).unwrap();
    let arch = StaticTls::new(
        image,
        TlsVariant::NATIVE,
        Layout::new::<Pthread>(),
        FakeRegister::default(),
    )
    .unwrap();

    TcbGlue::new(arch, CountingAlloc::default(), sys, LibcConfig::DEFAULT).unwrap()
}

pub(crate) fn glue() -> TestGlue {
    glue_with(ScriptedSys::answering(Ok(1)))
}

/// Page-aligned scratch memory for TLS areas.
#[repr(C, align(4096))]
pub(crate) struct AreaBuf([u8; 0x2000]);

impl AreaBuf {
    pub fn new() -> Self {
        Self([0xA5; 0x2000])
    }

    pub fn ptr(&mut self) -> NonNull<u8> {
        NonNull::new(self.0.as_mut_ptr()).unwrap()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

/// Carves a control block at the start of `buf`.
pub(crate) fn carve(glue: &TestGlue, buf: &mut AreaBuf) -> NonNull<Pthread> {
    let ctx = crate::LibcContext::new();
    unsafe { glue.copy_tls(&ctx, buf.ptr()) }.unwrap()
}
