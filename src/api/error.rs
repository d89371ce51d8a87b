//! Allocation errors.

use std::fmt;

use crate::device::{DeviceError, MemoryPropertyFlags};

/// Errors returned by [`Allocator`](super::allocator::Allocator).
///
/// None of these are fatal: the caller decides whether to skip the work
/// that needed the memory or surface the failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocError {
    /// Zero-byte requests are not allowed
    ZeroSize,
    /// Alignment is zero or not a power of two
    InvalidAlignment(u64),
    /// No memory type matches the type bits and desired properties
    NoCompatibleMemoryType {
        type_bits: u32,
        properties: MemoryPropertyFlags,
    },
    /// The device refused to reserve a new page
    OutOfDeviceMemory { size: u64, source: DeviceError },
    /// A host-visible page could not be mapped
    MapFailed { source: DeviceError },
    /// A new page is needed but the reservation limit is reached
    PoolExhausted { live_pages: u32, limit: u32 },
    /// A fresh page could not hold the request
    RequestTooLarge { size: u64 },
    /// The allocation is stale, already freed, or from another allocator
    InvalidFree,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocError::ZeroSize => write!(f, "zero-sized allocation"),
            AllocError::InvalidAlignment(alignment) => {
                write!(f, "alignment {} is not a power of two", alignment)
            }
            AllocError::NoCompatibleMemoryType { type_bits, properties } => write!(
                f,
                "no memory type in {:#b} with properties {}",
                type_bits, properties
            ),
            AllocError::OutOfDeviceMemory { size, source } => {
                write!(f, "failed to reserve {} bytes: {}", size, source)
            }
            AllocError::MapFailed { source } => write!(f, "failed to map page: {}", source),
            AllocError::PoolExhausted { live_pages, limit } => write!(
                f,
                "device memory pool exhausted ({} of {} pages live)",
                live_pages, limit
            ),
            AllocError::RequestTooLarge { size } => {
                write!(f, "request of {} bytes does not fit a new page", size)
            }
            AllocError::InvalidFree => write!(f, "invalid, stale, or foreign allocation freed"),
        }
    }
}

impl std::error::Error for AllocError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AllocError::OutOfDeviceMemory { source, .. } | AllocError::MapFailed { source } => Some(source),
            _ => None,
        }
    }
}

/// A broken page invariant found by [`Allocator::validate`](super::allocator::Allocator::validate).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantViolation {
    /// Offending page, if the violation is page-local
    pub page: Option<crate::PageId>,
    pub message: String,
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.page {
            Some(page) => write!(f, "{}: {}", page, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for InvariantViolation {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_display() {
        let err = AllocError::PoolExhausted { live_pages: 4, limit: 4 };
        assert_eq!(err.to_string(), "device memory pool exhausted (4 of 4 pages live)");
        assert_eq!(AllocError::InvalidAlignment(3).to_string(), "alignment 3 is not a power of two");
    }

    #[test]
    fn test_source_chain() {
        let err = AllocError::OutOfDeviceMemory {
            size: 1024,
            source: DeviceError::OutOfDeviceMemory,
        };
        assert!(err.source().is_some());
        assert!(AllocError::InvalidFree.source().is_none());
    }
}
