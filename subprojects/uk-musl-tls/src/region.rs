//! Memory regions backing TLS areas.
//!
//! A thread's TLS area and control block are carved out of memory the thread
//! creation path allocated. [`TlsRegion`] is a bounded view of such memory that
//! validates every placement:
//!
//! ```text
//! base ────────────┬──────────────────────────┐
//!                  │ <before the area>        │
//!                  ├──────────────────────────┤ ◄ align_down(base + offset)
//!                  │ <alignment slack>        │ < align
//!                  │ ...................      │ ◄ base + offset
//!                  │ TLS area + TCB           │ size
//!                  ├──────────────────────────┤
//!                  │ <unused>                 │
//! base + len ──────┴──────────────────────────┘
//! ```

use core::{marker::PhantomData, ptr::NonNull};

/// Rounds `addr` down to a multiple of `align` (a power of two).
#[inline]
pub const fn align_down(addr: usize, align: usize) -> usize {
    addr & !(align - 1)
}

/// A bounded, caller-owned memory region.
///
/// The region never owns its memory; it only computes and checks placements
/// inside it.
#[derive(Debug)]
pub struct TlsRegion<'a> {
    base: NonNull<u8>,
    len: usize,
    _marker: PhantomData<&'a mut [u8]>,
}

impl<'a> TlsRegion<'a> {
    /// A region over a borrowed buffer.
    pub fn new(buf: &'a mut [u8]) -> Self {
        let len = buf.len();

        Self {
            base: NonNull::from(buf).cast(),
            len,
            _marker: PhantomData,
        }
    }

    /// A region over raw memory.
    ///
    /// # Safety
    ///
    /// `[base, base + len)` must be valid for reads and writes for `'a` and not
    /// be accessed through other pointers while placements are in use.
    pub unsafe fn from_raw_parts(base: NonNull<u8>, len: usize) -> Self {
        Self {
            base,
            len,
            _marker: PhantomData,
        }
    }

    /// First byte of the region.
    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    /// Size of the region in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the region is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Places `size` bytes at `offset` rounded down to `align`.
    ///
    /// Returns the placed address, which is aligned to `align`, at most
    /// `align - 1` bytes below `base + offset`, and such that the placed bytes
    /// lie entirely inside the region.
    pub fn place(&self, offset: usize, size: usize, align: usize) -> Result<NonNull<u8>, RegionError> {
        if !align.is_power_of_two() {
            return Err(RegionError::Alignment(align));
        }
        if offset > self.len {
            return Err(RegionError::OutOfBounds {
                offset,
                len: self.len,
            });
        }

        let base = self.base.as_ptr() as usize;
        let start = align_down(base + offset, align);
        if start < base {
            return Err(RegionError::OutOfBounds {
                offset,
                len: self.len,
            });
        }

        let placed_offset = start - base;
        let end = placed_offset.checked_add(size).ok_or(RegionError::Overflow)?;
        if end > self.len {
            return Err(RegionError::TooSmall {
                need: end,
                have: self.len,
            });
        }

        // SAFETY: `placed_offset` is within the region.
        Ok(unsafe { self.base.add(placed_offset) })
    }
}

/// Errors that can occur while placing data inside a region.
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum RegionError {
    /// The requested alignment is not a power of two.
    #[error("alignment {0:#x} is not a power of two")]
    Alignment(usize),

    /// The placement starts outside the region.
    #[error("offset {offset:#x} is outside a region of {len:#x} bytes")]
    OutOfBounds { offset: usize, len: usize },

    /// The placement does not fit in the region.
    #[error("placement needs {need:#x} bytes, region has {have:#x}")]
    TooSmall { need: usize, have: usize },

    /// A size computation overflowed.
    #[error("region size overflows")]
    Overflow,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C, align(4096))]
    struct Page([u8; 0x2000]);

    #[test]
    fn place_is_aligned_and_wastes_less_than_align() {
        let mut page = Page([0; 0x2000]);
        let region = TlsRegion::new(&mut page.0);
        let base = region.base().as_ptr() as usize;

        for shift in 0..=12 {
            let align = 1usize << shift;
            for offset in [0x1000, 0x1001, 0x1234, 0x17ff, 0x1800] {
                let placed = region.place(offset, 0x100, align).unwrap().as_ptr() as usize;

                assert_eq!(placed % align, 0);
                assert!(placed <= base + offset);
                assert!(base + offset - placed <= align - 1);
                assert!(placed + 0x100 <= base + region.len());
            }
        }
    }

    #[test]
    fn place_rejects_spill_past_the_end() {
        let mut page = Page([0; 0x2000]);
        let region = TlsRegion::new(&mut page.0);

        let err = region.place(0x1f80, 0x100, 16).unwrap_err();

        assert_eq!(
            err,
            RegionError::TooSmall {
                need: 0x2080,
                have: 0x2000
            }
        );
    }

    #[test]
    fn place_rejects_start_before_the_region() {
        let mut page = Page([0; 0x2000]);
        // Start the region one byte into the page so rounding down escapes it.
        let region = TlsRegion::new(&mut page.0[1..]);

        let err = region.place(0, 16, 64).unwrap_err();

        assert!(matches!(err, RegionError::OutOfBounds { offset: 0, .. }));
    }

    #[test]
    fn place_rejects_bad_alignment() {
        let mut page = Page([0; 0x2000]);
        let region = TlsRegion::new(&mut page.0);

        assert_eq!(region.place(0, 1, 24), Err(RegionError::Alignment(24)));
    }
}
