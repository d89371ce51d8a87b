//! Memory poisoning for debugging.
//!
//! Fills reclaimed host-visible memory with a known pattern so the CPU side
//! reading a freed staging or uniform range sees obvious garbage.

use std::ptr::NonNull;

/// Pattern used to poison reclaimed memory.
pub const FREED_PATTERN: u8 = 0xCD;

/// Poison a region of memory with the freed pattern.
///
/// # Safety
///
/// The region must be valid, writable, and unused by the CPU and GPU.
pub unsafe fn poison_freed(ptr: NonNull<u8>, size: usize) {
    std::ptr::write_bytes(ptr.as_ptr(), FREED_PATTERN, size);
}

/// Check if a region is entirely filled with the freed pattern.
///
/// # Safety
///
/// The region must be valid for reads.
#[cfg(test)]
pub unsafe fn is_freed_poison(ptr: NonNull<u8>, size: usize) -> bool {
    std::slice::from_raw_parts(ptr.as_ptr(), size)
        .iter()
        .all(|&byte| byte == FREED_PATTERN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poison_roundtrip() {
        let mut buffer = [0u8; 32];
        let ptr = NonNull::new(buffer.as_mut_ptr()).unwrap();

        unsafe {
            assert!(!is_freed_poison(ptr, 32));
            poison_freed(ptr, 16);
            assert!(is_freed_poison(ptr, 16));
            assert!(!is_freed_poison(ptr, 17));
        }
    }
}
