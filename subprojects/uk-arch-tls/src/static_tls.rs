use core::{alloc::Layout, ptr::NonNull};

use crate::{
    ArchTls, CpuThreadPointer, InstallError, LayoutError, ThreadPointer, TlsAreaLayout, TlsImage,
    TlsVariant,
};

/// [`ArchTls`] for a statically linked image with a single TLS segment.
#[derive(Debug, Clone, Copy)]
pub struct StaticTls<'a, R> {
    image: TlsImage<'a>,
    layout: TlsAreaLayout,
    register: R,
}

impl<'a> StaticTls<'a, CpuThreadPointer> {
    /// TLS helper for the target architecture, loading the CPU register.
    pub fn native(image: TlsImage<'a>, tcb: Layout) -> Result<Self, LayoutError> {
        Self::new(image, TlsVariant::NATIVE, tcb, CpuThreadPointer)
    }
}

impl<'a, R: ThreadPointer> StaticTls<'a, R> {
    /// Creates a TLS helper for `image`, a TCB described by `tcb`, arranged
    /// per `variant`, installing thread pointers through `register`.
    pub fn new(
        image: TlsImage<'a>,
        variant: TlsVariant,
        tcb: Layout,
        register: R,
    ) -> Result<Self, LayoutError> {
        let layout = TlsAreaLayout::new(&image, variant, tcb)?;

        Ok(Self {
            image,
            layout,
            register,
        })
    }

    /// Area layout in use.
    pub fn layout(&self) -> &TlsAreaLayout {
        &self.layout
    }

    /// Thread-pointer register in use.
    pub fn register(&self) -> &R {
        &self.register
    }
}

impl<R: ThreadPointer> ArchTls for StaticTls<'_, R> {
    fn required_size(&self) -> usize {
        self.layout.size()
    }

    fn required_alignment(&self) -> usize {
        self.layout.align()
    }

    unsafe fn materialize_area(&self, area: NonNull<u8>) {
        debug_assert_eq!(area.as_ptr() as usize & (self.layout.align() - 1), 0);

        // SAFETY: The caller guarantees the area is valid for `size` bytes.
        unsafe {
            area.as_ptr().write_bytes(0, self.layout.size());
            self.image.copy_to(area.add(self.layout.block_offset()));
        }

        if self.layout.variant() == TlsVariant::II {
            let tp = self.tls_pointer(area);

            // SAFETY: The layout reserves at least one word for the TCB at TP.
            unsafe { tp.cast::<usize>().write_unaligned(tp.as_ptr() as usize) };
        }
    }

    fn tls_pointer(&self, area: NonNull<u8>) -> NonNull<u8> {
        // SAFETY: The offset stays within the area described by the layout.
        unsafe { area.add(self.layout.tp_offset()) }
    }

    fn locate_control_block(&self, area: NonNull<u8>) -> NonNull<u8> {
        // SAFETY: The offset stays within the area described by the layout.
        unsafe { area.add(self.layout.tcb_offset()) }
    }

    fn thread_pointer_of(&self, tcb: NonNull<u8>) -> NonNull<u8> {
        // SAFETY: TP lies at or right after the TCB in the same area.
        unsafe { tcb.add(self.layout.tp_offset() - self.layout.tcb_offset()) }
    }

    unsafe fn install_thread_pointer(&self, tp: NonNull<u8>) -> Result<(), InstallError> {
        let addr = tp.as_ptr() as usize;
        let align = self.layout.align();
        if addr & (align - 1) != 0 {
            return Err(InstallError::Misaligned { addr, align });
        }

        // SAFETY: The caller guarantees this runs on the thread owning the area.
        unsafe { self.register.set(addr) }?;

        log::debug!("thread pointer set to {tp:p}");
        Ok(())
    }
}
