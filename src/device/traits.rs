//! Device memory traits and types
//!
//! This module defines the device interface WITHOUT pulling in any backend-specific
//! dependencies, so the allocator depends on the trait, not on `ash`.

use std::fmt;
use std::ptr::NonNull;

/// Errors reported by a [`MemoryDevice`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The device has no memory left for this reservation
    OutOfDeviceMemory,
    /// The host could not back the reservation or mapping
    OutOfHostMemory,
    /// The device refuses to create more memory objects
    TooManyObjects,
    /// Mapping the memory object failed
    MemoryMapFailed,
    /// The memory type index does not exist on this device
    InvalidMemoryType(u32),
    /// Backend-specific error (opaque)
    Backend(String),
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::OutOfDeviceMemory => write!(f, "out of device memory"),
            DeviceError::OutOfHostMemory => write!(f, "out of host memory"),
            DeviceError::TooManyObjects => write!(f, "too many device memory objects"),
            DeviceError::MemoryMapFailed => write!(f, "memory map failed"),
            DeviceError::InvalidMemoryType(index) => write!(f, "invalid memory type index {}", index),
            DeviceError::Backend(msg) => write!(f, "backend error: {}", msg),
        }
    }
}

impl std::error::Error for DeviceError {}

/// Raw handle of one device memory reservation (`VkDeviceMemory` for Vulkan).
///
/// The handle is shared with callers but owned by the allocator page that
/// reserved it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DeviceMemory(u64);

impl DeviceMemory {
    /// The null handle.
    pub const NULL: Self = Self(0);

    /// Wrap a raw backend handle.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw backend handle.
    pub const fn as_raw(self) -> u64 {
        self.0
    }

    /// Check for the null handle.
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Memory property flags, bit-compatible with `VkMemoryPropertyFlags`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MemoryPropertyFlags {
    pub bits: u32,
}

impl MemoryPropertyFlags {
    pub const DEVICE_LOCAL: Self = Self { bits: 0x0001 };
    pub const HOST_VISIBLE: Self = Self { bits: 0x0002 };
    pub const HOST_COHERENT: Self = Self { bits: 0x0004 };
    pub const HOST_CACHED: Self = Self { bits: 0x0008 };
    pub const LAZILY_ALLOCATED: Self = Self { bits: 0x0010 };

    /// No properties.
    pub const fn empty() -> Self {
        Self { bits: 0 }
    }

    /// Build from raw bits.
    pub const fn from_raw(bits: u32) -> Self {
        Self { bits }
    }

    /// Check that every flag of `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.bits & other.bits == other.bits
    }

    /// Whether pages of this type get a persistent host mapping.
    pub const fn is_host_visible(self) -> bool {
        self.contains(Self::HOST_VISIBLE)
    }
}

impl std::ops::BitOr for MemoryPropertyFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self { bits: self.bits | rhs.bits }
    }
}

impl fmt::Display for MemoryPropertyFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(MemoryPropertyFlags, &str); 5] = [
            (MemoryPropertyFlags::DEVICE_LOCAL, "DEVICE_LOCAL"),
            (MemoryPropertyFlags::HOST_VISIBLE, "HOST_VISIBLE"),
            (MemoryPropertyFlags::HOST_COHERENT, "HOST_COHERENT"),
            (MemoryPropertyFlags::HOST_CACHED, "HOST_CACHED"),
            (MemoryPropertyFlags::LAZILY_ALLOCATED, "LAZILY_ALLOCATED"),
        ];
        let mut first = true;
        for (flag, name) in NAMES {
            if self.contains(flag) {
                if !first {
                    write!(f, " | ")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        if first {
            write!(f, "(empty)")?;
        }
        Ok(())
    }
}

/// One entry of the device's memory type table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryType {
    /// Properties of this type
    pub property_flags: MemoryPropertyFlags,
    /// Heap the type allocates from
    pub heap_index: u32,
}

impl MemoryType {
    /// Create a memory type entry.
    pub const fn new(property_flags: MemoryPropertyFlags, heap_index: u32) -> Self {
        Self { property_flags, heap_index }
    }
}

/// Device limits the allocator must respect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    /// Maximum number of simultaneously live memory reservations
    pub max_memory_allocation_count: u32,
    /// Minimum spacing between linear and non-linear resources sharing memory
    pub buffer_image_granularity: u64,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        // The Vulkan-guaranteed minimum allocation count and a common granularity.
        Self {
            max_memory_allocation_count: 4096,
            buffer_image_granularity: 1024,
        }
    }
}

/// The coarse-grained memory primitive the allocator sub-allocates from.
///
/// Implementations reserve, release, and map whole memory objects. They are
/// driven from the single thread that owns the allocator.
pub trait MemoryDevice {
    /// Reserve `size` bytes of the given memory type.
    fn allocate_memory(&mut self, size: u64, memory_type_index: u32) -> Result<DeviceMemory, DeviceError>;

    /// Release a reservation. The GPU must no longer use it.
    fn free_memory(&mut self, memory: DeviceMemory);

    /// Map a whole host-visible reservation of `size` bytes.
    fn map_memory(&mut self, memory: DeviceMemory, size: u64) -> Result<NonNull<u8>, DeviceError>;

    /// Unmap a reservation previously mapped with [`map_memory`](Self::map_memory).
    fn unmap_memory(&mut self, memory: DeviceMemory);

    /// The device's memory type table.
    fn memory_types(&self) -> &[MemoryType];

    /// Device limits relevant to sub-allocation.
    fn limits(&self) -> DeviceLimits;

    /// Find the first memory type allowed by `type_bits` (the
    /// `memoryTypeBits` of `VkMemoryRequirements`) that has every flag in
    /// `properties`.
    fn find_memory_type_index(&self, type_bits: u32, properties: MemoryPropertyFlags) -> Option<u32> {
        self.memory_types()
            .iter()
            .enumerate()
            .take(32)
            .find(|(index, ty)| type_bits & (1u32 << index) != 0 && ty.property_flags.contains(properties))
            .map(|(index, _)| index as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_flags() {
        let flags = MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_COHERENT;
        assert!(flags.contains(MemoryPropertyFlags::HOST_VISIBLE));
        assert!(!flags.contains(MemoryPropertyFlags::DEVICE_LOCAL));
        assert!(flags.is_host_visible());
        assert!(flags.contains(MemoryPropertyFlags::empty()));
        assert_eq!(flags.to_string(), "HOST_VISIBLE | HOST_COHERENT");
        assert_eq!(MemoryPropertyFlags::empty().to_string(), "(empty)");
    }

    #[test]
    fn test_device_memory_handle() {
        assert!(DeviceMemory::NULL.is_null());
        assert_eq!(DeviceMemory::from_raw(42).as_raw(), 42);
        assert_eq!(DeviceMemory::default(), DeviceMemory::NULL);
    }
}
