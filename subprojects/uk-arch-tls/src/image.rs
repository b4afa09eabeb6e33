//! TLS segment image
//!
//! ## Terminology
//!
//! - **TLS Segment**: This is the image of data in each module and specified by the
//!   ELF TLS ABI. A unikernel image is a single statically linked module, so it
//!   has at most one TLS segment.
//!
//! - **TLS Block**: This is the runtime copy of a TLS segment. There is one TLS
//!   block per thread, stored inside the thread's TLS area.

use core::{
    ptr::{self, NonNull},
    slice,
};

/// Description of the program's TLS segment.
///
/// `tdata` is the initialized part (`.tdata`), copied verbatim into every new
/// TLS block. The remaining `mem_size - tdata.len()` bytes (`.tbss`) are
/// zeroed.
#[derive(Debug, Clone, Copy)]
pub struct TlsImage<'a> {
    tdata: &'a [u8],
    mem_size: usize,
    align: usize,
}

impl<'a> TlsImage<'a> {
    /// An image for programs without a TLS segment.
    pub const EMPTY: TlsImage<'static> = TlsImage {
        tdata: &[],
        mem_size: 0,
        align: 1,
    };

    /// Creates an image from the `.tdata` contents, the total segment size and
    /// the segment alignment.
    ///
    /// Returns `None` if `align` is not a power of two or if `mem_size` is
    /// smaller than `.tdata`.
    pub const fn new(tdata: &'a [u8], mem_size: usize, align: usize) -> Option<Self> {
        if !align.is_power_of_two() || mem_size < tdata.len() {
            return None;
        }

        Some(Self {
            tdata,
            mem_size,
            align,
        })
    }

    /// Creates an image from the addresses delimiting a segment in memory:
    /// `.tdata` spans `[start, tdata_end)` and the whole segment `[start, end)`.
    ///
    /// Returns `None` if either bound lies below `start`, if `.tdata` is larger
    /// than the segment, or if `align` is not a power of two. No memory is
    /// touched unless the bounds are consistent.
    ///
    /// # Safety
    ///
    /// If the bounds are consistent, `[start, tdata_end)` must be readable and
    /// left unmodified for `'a`.
    pub unsafe fn from_bounds(start: usize, tdata_end: usize, end: usize, align: usize) -> Option<Self> {
        let tdata_size = tdata_end.checked_sub(start)?;
        let mem_size = end.checked_sub(start)?;
        if tdata_size > mem_size || tdata_size > isize::MAX as usize {
            return None;
        }

        let tdata = match NonNull::new(start as *mut u8) {
            // SAFETY: The bounds are ordered and the caller guarantees the
            // `.tdata` bytes are readable for `'a`.
            Some(ptr) => unsafe { slice::from_raw_parts(ptr.as_ptr().cast_const(), tdata_size) },
            None if tdata_size == 0 => &[],
            None => return None,
        };

        Self::new(tdata, mem_size, align)
    }

    /// Initialized data (`.tdata`).
    pub fn tdata(&self) -> &'a [u8] {
        self.tdata
    }

    /// Size of `.tdata`.
    pub fn tdata_size(&self) -> usize {
        self.tdata.len()
    }

    /// Size of `.tbss`.
    pub fn tbss_size(&self) -> usize {
        self.mem_size - self.tdata.len()
    }

    /// Size of the whole TLS block (`.tdata` + `.tbss`).
    pub fn mem_size(&self) -> usize {
        self.mem_size
    }

    /// Alignment of the TLS block.
    pub fn align(&self) -> usize {
        self.align
    }

    /// Copies `.tdata` to `dst` and zeroes the `.tbss` that follows it.
    ///
    /// # Safety
    /// - `dst` must be valid for writes of [`mem_size`](Self::mem_size) bytes.
    /// - The destination must not overlap the image itself and must not be
    ///   accessed concurrently.
    pub unsafe fn copy_to(&self, dst: NonNull<u8>) {
        let dst = dst.as_ptr();

        if !self.tdata.is_empty() {
            // SAFETY: The caller guarantees `dst` is valid for `mem_size` bytes,
            // which covers `tdata.len()`, and does not overlap the image.
            unsafe { ptr::copy_nonoverlapping(self.tdata.as_ptr(), dst, self.tdata.len()) };
        }

        let tbss = self.tbss_size();
        if tbss != 0 {
            // SAFETY: `.tbss` immediately follows `.tdata` and stays within
            // the `mem_size` bytes the caller vouched for.
            unsafe { ptr::write_bytes(dst.add(self.tdata.len()), 0, tbss) };
        }
    }
}
