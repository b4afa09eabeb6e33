//! The glue between musl and the unikernel's thread primitives, and the TLS
//! area carver.

use core::{alloc::Layout, ptr::NonNull};

use uk_arch_tls::ArchTls;

use crate::{
    config::{ConfigError, LibcConfig},
    context::LibcContext,
    pthread::Pthread,
    region::{RegionError, TlsRegion, align_down},
};

/// The collaborators the glue runs against.
///
/// * `A` – architecture TLS helper ([`ArchTls`]).
/// * `M` – allocator backing thread-specific-data buffers
///   ([`Alloc`](uk_alloc::Alloc)).
/// * `S` – system calls ([`Syscalls`](crate::Syscalls)).
///
/// One glue instance owns exactly one allocator handle, so a TSD buffer is
/// always released to the allocator it came from.
#[derive(Debug)]
pub struct TcbGlue<A, M, S> {
    pub(crate) arch: A,
    pub(crate) alloc: M,
    pub(crate) sys: S,
    pub(crate) config: LibcConfig,
    pub(crate) tsd_layout: Layout,
}

impl<A, M, S> TcbGlue<A, M, S> {
    /// Bundles the collaborators with the platform constants.
    pub fn new(arch: A, alloc: M, sys: S, config: LibcConfig) -> Result<Self, ConfigError> {
        let tsd_layout = config.tsd_layout()?;

        Ok(Self {
            arch,
            alloc,
            sys,
            config,
            tsd_layout,
        })
    }

    /// Architecture TLS helper.
    pub fn arch(&self) -> &A {
        &self.arch
    }

    /// Allocator backing TSD buffers.
    pub fn alloc(&self) -> &M {
        &self.alloc
    }

    /// System calls.
    pub fn sys(&self) -> &S {
        &self.sys
    }

    /// Platform constants.
    pub fn config(&self) -> &LibcConfig {
        &self.config
    }

    /// Layout of every TSD buffer this glue allocates.
    pub fn tsd_layout(&self) -> Layout {
        self.tsd_layout
    }
}

impl<A: ArchTls, M, S> TcbGlue<A, M, S> {
    /// Size of a TLS area: the recorded one once threads are usable, the
    /// architecture's before.
    pub fn tls_size(&self, ctx: &LibcContext) -> usize {
        if ctx.can_do_threads() {
            ctx.tls_size()
        } else {
            self.arch.required_size()
        }
    }

    /// Alignment of a TLS area: the recorded one once threads are usable, the
    /// architecture's before.
    pub fn tls_align(&self, ctx: &LibcContext) -> usize {
        if ctx.can_do_threads() {
            ctx.tls_align()
        } else {
            self.arch.required_alignment()
        }
    }

    /// Carves a TLS area at `mem` rounded down to the TLS alignment and
    /// returns its control block (musl's `__copy_tls`).
    ///
    /// The area is materialized and the control block's `dtv`/`dtv_copy` both
    /// point at the area.
    ///
    /// # Safety
    ///
    /// `[align_down(mem), align_down(mem) + tls_size)` must be valid for
    /// writes and unused by any thread.
    pub unsafe fn copy_tls(&self, ctx: &LibcContext, mem: NonNull<u8>) -> Result<NonNull<Pthread>, RegionError> {
        let align = self.tls_align(ctx);
        if !align.is_power_of_two() {
            return Err(RegionError::Alignment(align));
        }

        let addr = mem.as_ptr() as usize;
        let aligned = align_down(addr, align);

        // SAFETY: `aligned` is at most `align - 1` bytes below `mem`, and the
        // caller vouched for `tls_size` bytes from there.
        let mut region = unsafe { TlsRegion::from_raw_parts(mem.sub(addr - aligned), self.tls_size(ctx)) };
        let tcb = self.copy_tls_in(ctx, &mut region, 0)?;

        log::debug!("__uk_copy_tls mem {mem:p}, tcb {tcb:p}");
        Ok(tcb)
    }

    /// Carves the TLS area at `offset` rounded down to the TLS alignment
    /// inside `region`, failing if the aligned area does not fit.
    pub fn copy_tls_in(
        &self,
        ctx: &LibcContext,
        region: &mut TlsRegion<'_>,
        offset: usize,
    ) -> Result<NonNull<Pthread>, RegionError> {
        let area = region.place(offset, self.tls_size(ctx), self.tls_align(ctx))?;

        // SAFETY: `place` checked the area is aligned and lies inside the
        // region, which is borrowed mutably for the duration of the call.
        unsafe { self.arch.materialize_area(area) };

        let tcb = self.arch.locate_control_block(area).cast::<Pthread>();

        // SAFETY: The TCB lies inside the freshly materialized area.
        let td = unsafe { &mut *tcb.as_ptr() };
        td.dtv = area.as_ptr().cast();
        td.dtv_copy = area.as_ptr().cast();

        Ok(tcb)
    }
}

#[cfg(test)]
mod tests {
    use core::pin::pin;

    use super::*;
    use crate::testing::{AreaBuf, glue};

    #[test]
    fn copy_tls_aligns_down_and_links_dtv() {
        let glue = glue();
        let ctx = LibcContext::new();
        let mut buf = AreaBuf::new();
        let align = glue.tls_align(&ctx);
        let mem = unsafe { buf.ptr().add(align + 3) };

        let tcb = unsafe { glue.copy_tls(&ctx, mem) }.unwrap();

        let area = buf.ptr().as_ptr() as usize + align;
        let td = unsafe { tcb.as_ref() };
        assert_eq!(td.dtv as usize, area);
        assert_eq!(td.dtv_copy as usize, area);
        assert_eq!(
            tcb.as_ptr() as usize,
            glue.arch()
                .locate_control_block(NonNull::new(area as *mut u8).unwrap())
                .as_ptr() as usize
        );
    }

    #[test]
    fn copy_tls_uses_recorded_alignment_once_ready() {
        let glue = glue();
        let mut ctx = pin!(LibcContext::new());
        ctx.as_mut().set_tls(glue.arch().required_size(), 256).unwrap();
        ctx.as_mut().mark_ready().unwrap();
        let mut buf = AreaBuf::new();
        let mem = unsafe { buf.ptr().add(300) };

        let tcb = unsafe { glue.copy_tls(&ctx, mem) }.unwrap();

        let td = unsafe { tcb.as_ref() };
        assert_eq!(td.dtv as usize, buf.ptr().as_ptr() as usize + 256);
    }

    #[test]
    fn copy_tls_rejects_recorded_alignment_that_is_not_a_power_of_two() {
        let glue = glue();
        let mut ctx = pin!(LibcContext::new());
        ctx.as_mut().set_tls(glue.arch().required_size(), 48).unwrap();
        ctx.as_mut().mark_ready().unwrap();
        let mut buf = AreaBuf::new();

        let err = unsafe { glue.copy_tls(&ctx, buf.ptr()) }.unwrap_err();

        assert_eq!(err, RegionError::Alignment(48));
    }

    #[test]
    fn copy_tls_in_rejects_area_past_region_end() {
        let glue = glue();
        let ctx = LibcContext::new();
        let mut buf = AreaBuf::new();
        let len = buf.len();
        let mut region = TlsRegion::new(buf.as_mut_slice());

        let err = glue.copy_tls_in(&ctx, &mut region, len - 8).unwrap_err();

        assert!(matches!(err, RegionError::TooSmall { .. }));
    }

    #[test]
    fn copy_tls_in_places_control_block_inside_region() {
        let glue = glue();
        let ctx = LibcContext::new();
        let mut buf = AreaBuf::new();
        let base = buf.ptr().as_ptr() as usize;
        let len = buf.len();
        let mut region = TlsRegion::new(buf.as_mut_slice());

        let tcb = glue.copy_tls_in(&ctx, &mut region, 100).unwrap();

        let addr = tcb.as_ptr() as usize;
        assert!(addr >= base && addr + size_of::<Pthread>() <= base + len);
        assert_eq!(unsafe { tcb.as_ref() }.dtv as usize % glue.tls_align(&ctx), 0);
    }
}
