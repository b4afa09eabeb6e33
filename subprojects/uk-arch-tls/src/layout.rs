//! TLS area layout
//!
//! Computes, in one place, where the TLS block, the TCB and the thread pointer
//! sit inside a TLS area. See the crate documentation for the pictures.

use core::{alloc::Layout, cmp::max};

use crate::TlsImage;

/// Bytes reserved right above the thread pointer in TLS variant I.
///
/// The AArch64 ELF ABI places the TLS block at `TP + align_up(16, p_align)`;
/// the two words in between belong to the runtime.
const GAP_ABOVE_TP: usize = 16;

/// ELF TLS ABI variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsVariant {
    /// TCB below the thread pointer, TLS block above it (aarch64).
    I,
    /// TLS block below the thread pointer, TCB at it (x86_64).
    II,
}

impl TlsVariant {
    /// The variant used by the target architecture.
    #[cfg(target_arch = "aarch64")]
    pub const NATIVE: Self = Self::I;

    /// The variant used by the target architecture.
    #[cfg(not(target_arch = "aarch64"))]
    pub const NATIVE: Self = Self::II;
}

/// Offsets of the parts of a TLS area, relative to the start of the area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlsAreaLayout {
    variant: TlsVariant,
    size: usize,
    align: usize,
    tcb_offset: usize,
    tcb_size: usize,
    tp_offset: usize,
    block_offset: usize,
    block_size: usize,
}

impl TlsAreaLayout {
    /// Computes the layout of a TLS area holding `image` and a TCB described
    /// by `tcb`.
    pub fn new(image: &TlsImage<'_>, variant: TlsVariant, tcb: Layout) -> Result<Self, LayoutError> {
        let align = max(image.align(), tcb.align());
        let block_size = image.mem_size();

        let (tcb_offset, tp_offset, block_offset, end) = match variant {
            TlsVariant::I => {
                let tp_offset = align_up(tcb.size(), align)?;
                let tcb_offset = tp_offset - tcb.size();
                let block_offset = tp_offset
                    .checked_add(align_up(GAP_ABOVE_TP, image.align())?)
                    .ok_or(LayoutError::Overflow)?;
                let end = block_offset
                    .checked_add(block_size)
                    .ok_or(LayoutError::Overflow)?;

                (tcb_offset, tp_offset, block_offset, end)
            }
            TlsVariant::II => {
                // The TCB starts with the TP self pointer.
                if tcb.size() < size_of::<usize>() {
                    return Err(LayoutError::TcbTooSmall(tcb.size()));
                }

                let tp_offset = align_up(block_size, align)?;
                let block_offset = tp_offset - align_up(block_size, image.align())?;
                let end = tp_offset
                    .checked_add(tcb.size())
                    .ok_or(LayoutError::Overflow)?;

                (tp_offset, tp_offset, block_offset, end)
            }
        };

        Ok(Self {
            variant,
            size: align_up(end, align)?,
            align,
            tcb_offset,
            tcb_size: tcb.size(),
            tp_offset,
            block_offset,
            block_size,
        })
    }

    /// ABI variant of this layout.
    pub fn variant(&self) -> TlsVariant {
        self.variant
    }

    /// Total size of the area, rounded up to [`align`](Self::align).
    pub fn size(&self) -> usize {
        self.size
    }

    /// Alignment of the area start.
    pub fn align(&self) -> usize {
        self.align
    }

    /// Offset of the TCB.
    pub fn tcb_offset(&self) -> usize {
        self.tcb_offset
    }

    /// Size of the TCB.
    pub fn tcb_size(&self) -> usize {
        self.tcb_size
    }

    /// Offset of the thread pointer.
    pub fn tp_offset(&self) -> usize {
        self.tp_offset
    }

    /// Offset of the TLS block (`.tdata` + `.tbss`).
    pub fn block_offset(&self) -> usize {
        self.block_offset
    }

    /// Size of the TLS block.
    pub fn block_size(&self) -> usize {
        self.block_size
    }
}

/// Errors that can occur while computing a [`TlsAreaLayout`].
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum LayoutError {
    /// The area size does not fit in the address space.
    #[error("TLS area size overflows")]
    Overflow,

    /// A variant II TCB cannot hold the thread-pointer self pointer.
    #[error("TCB of {0} bytes cannot hold the thread-pointer self pointer")]
    TcbTooSmall(usize),
}

fn align_up(value: usize, align: usize) -> Result<usize, LayoutError> {
    value
        .checked_add(align - 1)
        .map(|v| v & !(align - 1))
        .ok_or(LayoutError::Overflow)
}
