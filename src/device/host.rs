//! Heap-backed device for tests and tools.
//!
//! `HostDevice` behaves like a Vulkan device without needing GPU hardware:
//! reservations are bookkept, host-visible ones are backed by zeroed heap
//! memory on first map, and limits and a byte budget can be configured to
//! inject `TooManyObjects` / `OutOfDeviceMemory` failures.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::collections::HashMap;
use std::ptr::NonNull;

use super::traits::*;

/// Backing storage alignment for mapped reservations.
const STORAGE_ALIGN: usize = 4096;

/// One live reservation.
#[derive(Debug)]
struct Reservation {
    size: u64,
    memory_type_index: u32,
    /// Heap backing, created on first map and kept until free
    storage: Option<(NonNull<u8>, Layout)>,
    mapped: bool,
}

impl Reservation {
    fn release_storage(&mut self) {
        if let Some((ptr, layout)) = self.storage.take() {
            // SAFETY: ptr was returned by alloc_zeroed with this exact layout.
            unsafe { dealloc(ptr.as_ptr(), layout) };
        }
    }
}

/// Simulated device memory backed by the host heap.
#[derive(Debug)]
pub struct HostDevice {
    memory_types: Vec<MemoryType>,
    limits: DeviceLimits,
    /// Maximum reserved bytes (None = unlimited)
    budget: Option<u64>,
    reserved_bytes: u64,
    next_handle: u64,
    reservations: HashMap<u64, Reservation>,
    allocate_calls: u64,
    free_calls: u64,
}

// SAFETY: the raw storage pointers are uniquely owned by this device.
unsafe impl Send for HostDevice {}

impl HostDevice {
    /// Create a device with a typical discrete-GPU memory type table.
    ///
    /// | index | properties                                   | heap |
    /// |-------|----------------------------------------------|------|
    /// | 0     | DEVICE_LOCAL                                 | 0    |
    /// | 1     | HOST_VISIBLE, HOST_COHERENT                  | 1    |
    /// | 2     | HOST_VISIBLE, HOST_COHERENT, HOST_CACHED     | 1    |
    /// | 3     | DEVICE_LOCAL, HOST_VISIBLE, HOST_COHERENT    | 0    |
    pub fn new() -> Self {
        use MemoryPropertyFlags as F;

        Self::with_memory_types(vec![
            MemoryType::new(F::DEVICE_LOCAL, 0),
            MemoryType::new(F::HOST_VISIBLE | F::HOST_COHERENT, 1),
            MemoryType::new(F::HOST_VISIBLE | F::HOST_COHERENT | F::HOST_CACHED, 1),
            MemoryType::new(F::DEVICE_LOCAL | F::HOST_VISIBLE | F::HOST_COHERENT, 0),
        ])
    }

    /// Create a device with a custom memory type table.
    pub fn with_memory_types(memory_types: Vec<MemoryType>) -> Self {
        Self {
            memory_types,
            limits: DeviceLimits::default(),
            budget: None,
            reserved_bytes: 0,
            next_handle: 1,
            reservations: HashMap::new(),
            allocate_calls: 0,
            free_calls: 0,
        }
    }

    /// Builder pattern: set device limits.
    pub fn with_limits(mut self, limits: DeviceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Builder pattern: cap the total reserved bytes.
    pub fn with_budget(mut self, bytes: u64) -> Self {
        self.budget = Some(bytes);
        self
    }

    /// Change the byte budget of a live device.
    pub fn set_budget(&mut self, budget: Option<u64>) {
        self.budget = budget;
    }

    /// Number of live reservations.
    pub fn live_reservations(&self) -> usize {
        self.reservations.len()
    }

    /// Total bytes currently reserved.
    pub fn reserved_bytes(&self) -> u64 {
        self.reserved_bytes
    }

    /// Size of a live reservation.
    pub fn reservation_size(&self, memory: DeviceMemory) -> Option<u64> {
        self.reservations.get(&memory.as_raw()).map(|r| r.size)
    }

    /// Memory type of a live reservation.
    pub fn reservation_type(&self, memory: DeviceMemory) -> Option<u32> {
        self.reservations.get(&memory.as_raw()).map(|r| r.memory_type_index)
    }

    /// Whether a reservation is currently mapped.
    pub fn is_mapped(&self, memory: DeviceMemory) -> bool {
        self.reservations
            .get(&memory.as_raw())
            .map(|r| r.mapped)
            .unwrap_or(false)
    }

    /// Number of `allocate_memory` calls that succeeded.
    pub fn allocate_calls(&self) -> u64 {
        self.allocate_calls
    }

    /// Number of `free_memory` calls.
    pub fn free_calls(&self) -> u64 {
        self.free_calls
    }
}

impl Default for HostDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDevice for HostDevice {
    fn allocate_memory(&mut self, size: u64, memory_type_index: u32) -> Result<DeviceMemory, DeviceError> {
        if memory_type_index as usize >= self.memory_types.len() {
            return Err(DeviceError::InvalidMemoryType(memory_type_index));
        }
        if size == 0 {
            return Err(DeviceError::Backend("zero-sized reservation".to_string()));
        }
        if self.reservations.len() >= self.limits.max_memory_allocation_count as usize {
            return Err(DeviceError::TooManyObjects);
        }
        if let Some(budget) = self.budget {
            if self.reserved_bytes.saturating_add(size) > budget {
                return Err(DeviceError::OutOfDeviceMemory);
            }
        }

        let handle = self.next_handle;
        self.next_handle += 1;
        self.reservations.insert(
            handle,
            Reservation {
                size,
                memory_type_index,
                storage: None,
                mapped: false,
            },
        );
        self.reserved_bytes += size;
        self.allocate_calls += 1;

        Ok(DeviceMemory::from_raw(handle))
    }

    fn free_memory(&mut self, memory: DeviceMemory) {
        self.free_calls += 1;
        match self.reservations.remove(&memory.as_raw()) {
            Some(mut reservation) => {
                reservation.release_storage();
                self.reserved_bytes -= reservation.size;
            }
            None => debug_assert!(false, "free of unknown device memory {:?}", memory),
        }
    }

    fn map_memory(&mut self, memory: DeviceMemory, size: u64) -> Result<NonNull<u8>, DeviceError> {
        let memory_types = &self.memory_types;
        let reservation = self
            .reservations
            .get_mut(&memory.as_raw())
            .ok_or(DeviceError::MemoryMapFailed)?;

        let host_visible = memory_types
            .get(reservation.memory_type_index as usize)
            .map(|ty| ty.property_flags.is_host_visible())
            .unwrap_or(false);
        if !host_visible || reservation.mapped || size > reservation.size {
            return Err(DeviceError::MemoryMapFailed);
        }

        let ptr = match reservation.storage {
            Some((ptr, _)) => ptr,
            None => {
                let len = usize::try_from(reservation.size).map_err(|_| DeviceError::OutOfHostMemory)?;
                let layout = Layout::from_size_align(len, STORAGE_ALIGN).map_err(|_| DeviceError::OutOfHostMemory)?;
                // SAFETY: layout has non-zero size (zero-sized reservations are rejected).
                let raw = unsafe { alloc_zeroed(layout) };
                let ptr = NonNull::new(raw).ok_or(DeviceError::OutOfHostMemory)?;
                reservation.storage = Some((ptr, layout));
                ptr
            }
        };
        reservation.mapped = true;

        Ok(ptr)
    }

    fn unmap_memory(&mut self, memory: DeviceMemory) {
        if let Some(reservation) = self.reservations.get_mut(&memory.as_raw()) {
            debug_assert!(reservation.mapped, "unmap of unmapped memory {:?}", memory);
            reservation.mapped = false;
        }
    }

    fn memory_types(&self) -> &[MemoryType] {
        &self.memory_types
    }

    fn limits(&self) -> DeviceLimits {
        self.limits
    }
}

impl Drop for HostDevice {
    fn drop(&mut self) {
        for reservation in self.reservations.values_mut() {
            reservation.release_storage();
        }
    }
}
