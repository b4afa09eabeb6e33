//! The TLS segment of the running image, as provided by the linker script.

use crate::TlsImage;

// SAFETY: The symbols are defined in the linker script and are guaranteed to
// be valid.
unsafe extern "C" {
    /// Start address of the TLS segment (first byte of `.tdata`).
    ///
    /// The linker emits this via:
    /// ```text
    /// _tls_start = .;
    /// ```
    static _tls_start: u8;

    /// End address (one-past-the-last byte) of `.tdata`.
    static _etdata: u8;

    /// End address (one-past-the-last byte) of `.tbss`, i.e. of the segment.
    static _tls_end: u8;

    /// Alignment requirement (in bytes) of the TLS segment.
    ///
    /// The value is emitted using:
    /// ```text
    /// QUAD( MAX( ALIGNOF(.tdata), ALIGNOF(.tbss) ) )
    /// ```
    static __tls_align: usize;
}

/// Returns the image's TLS segment.
///
/// Falls back to [`TlsImage::EMPTY`] if the linker-provided values are
/// inconsistent.
pub fn linker_image() -> TlsImage<'static> {
    // SAFETY: The symbols are defined in the linker script and delimit the
    // read-only `.tdata` initialization image.
    let (start, tdata_end, end, align) = unsafe {
        (
            &raw const _tls_start as usize,
            &raw const _etdata as usize,
            &raw const _tls_end as usize,
            __tls_align,
        )
    };

    // An image without TLS sections may report an alignment of zero.
    let align = align.max(1);

    // SAFETY: When ordered, `[_tls_start, _etdata)` is the `.tdata` image,
    // which is never written to at runtime.
    unsafe { TlsImage::from_bounds(start, tdata_end, end, align) }.unwrap_or_else(|| {
        log::error!(
            "inconsistent TLS segment: {start:#x}..{tdata_end:#x}..{end:#x}, align {align:#x}"
        );
        TlsImage::EMPTY
    })
}
