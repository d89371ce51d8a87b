//! Offset and alignment arithmetic for device memory.
//!
//! All alignments handled here are powers of two, as Vulkan guarantees for
//! `VkMemoryRequirements::alignment` and `bufferImageGranularity`.

/// Align an offset up to the given alignment.
#[inline]
pub const fn align_up(offset: u64, align: u64) -> u64 {
    (offset + align - 1) & !(align - 1)
}

/// Align an offset up, returning `None` on overflow.
#[inline]
pub fn checked_align_up(offset: u64, align: u64) -> Option<u64> {
    offset.checked_add(align - 1).map(|v| v & !(align - 1))
}

/// Align an offset down to the given alignment.
#[inline]
pub const fn align_down(offset: u64, align: u64) -> u64 {
    offset & !(align - 1)
}

/// Check whether `offset` is a multiple of `align`.
#[inline]
pub const fn is_aligned(offset: u64, align: u64) -> bool {
    offset & (align - 1) == 0
}

/// Check whether the last byte of resource A and the first byte of resource B
/// land on the same granularity page.
///
/// A must lie entirely before B and `a_size` must be non-zero.
#[inline]
pub const fn on_same_granularity_page(a_offset: u64, a_size: u64, b_offset: u64, granularity: u64) -> bool {
    let a_end = a_offset + a_size - 1;
    align_down(a_end, granularity) == align_down(b_offset, granularity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(257, 256), 512);
    }

    #[test]
    fn test_checked_align_up_overflow() {
        assert_eq!(checked_align_up(u64::MAX - 2, 16), None);
        assert_eq!(checked_align_up(17, 16), Some(32));
    }

    #[test]
    fn test_is_aligned() {
        assert!(is_aligned(0, 64));
        assert!(is_aligned(4096, 64));
        assert!(!is_aligned(4100, 64));
    }

    #[test]
    fn test_granularity_pages() {
        // [0, 100) ends on page 0 of a 1024-byte granularity, as does offset 512.
        assert!(on_same_granularity_page(0, 100, 512, 1024));
        // Ending exactly on the page boundary leaves B on the next page.
        assert!(!on_same_granularity_page(0, 1024, 1024, 1024));
        assert!(!on_same_granularity_page(0, 100, 2048, 1024));
    }
}
