//! Platform constants consumed by the glue.

use core::{alloc::Layout, ffi::c_void};

/// Page size of the unikernel.
pub const PAGE_SIZE: usize = 0x1000;

/// Number of thread-specific-data keys musl supports (`PTHREAD_KEYS_MAX`).
pub const PTHREAD_KEYS_MAX: usize = 128;

/// Default stack size of a unikernel thread (16 pages).
pub const STACK_SIZE: usize = PAGE_SIZE << 4;

/// Platform constants the glue records and allocates with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LibcConfig {
    /// Page size recorded in the library state; also the TSD buffer alignment.
    pub page_size: usize,
    /// Stack size reported in the control block of lightweight threads.
    pub stack_size: usize,
    /// Capacity of a thread's TSD buffer, in keys.
    pub tsd_keys_max: usize,
}

impl LibcConfig {
    /// The unikernel's build-time constants.
    pub const DEFAULT: Self = Self {
        page_size: PAGE_SIZE,
        stack_size: STACK_SIZE,
        tsd_keys_max: PTHREAD_KEYS_MAX,
    };

    /// Checks the constants are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tsd_layout().map(|_| ())
    }

    /// Layout of a thread's TSD buffer: one pointer-sized slot per key,
    /// page aligned.
    pub fn tsd_layout(&self) -> Result<Layout, ConfigError> {
        if !self.page_size.is_power_of_two() {
            return Err(ConfigError::PageSize(self.page_size));
        }
        if self.tsd_keys_max == 0 {
            return Err(ConfigError::NoTsdKeys);
        }

        let size = self
            .tsd_keys_max
            .checked_mul(size_of::<*mut c_void>())
            .ok_or(ConfigError::TsdTooLarge(self.tsd_keys_max))?;

        Layout::from_size_align(size, self.page_size)
            .map_err(|_| ConfigError::TsdTooLarge(self.tsd_keys_max))
    }
}

impl Default for LibcConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Errors reported by [`LibcConfig::validate`].
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// The page size is not a power of two.
    #[error("page size {0:#x} is not a power of two")]
    PageSize(usize),

    /// No TSD key would fit in the buffer.
    #[error("at least one TSD key is required")]
    NoTsdKeys,

    /// The TSD buffer size does not fit in the address space.
    #[error("TSD buffer for {0} keys is too large")]
    TsdTooLarge(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_tsd_layout_is_one_pointer_per_key_page_aligned() {
        let layout = LibcConfig::DEFAULT.tsd_layout().unwrap();

        assert_eq!(layout.size(), PTHREAD_KEYS_MAX * size_of::<*mut c_void>());
        assert_eq!(layout.align(), PAGE_SIZE);
    }

    #[test]
    fn validate_rejects_odd_page_size() {
        let config = LibcConfig {
            page_size: 0x1800,
            ..LibcConfig::DEFAULT
        };

        assert_eq!(config.validate(), Err(ConfigError::PageSize(0x1800)));
    }

    #[test]
    fn validate_rejects_zero_keys() {
        let config = LibcConfig {
            tsd_keys_max: 0,
            ..LibcConfig::DEFAULT
        };

        assert_eq!(config.validate(), Err(ConfigError::NoTsdKeys));
    }
}
