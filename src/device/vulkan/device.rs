//! `ash`-backed memory device

use std::ptr::NonNull;

use ash::vk;
use ash::vk::Handle;

use crate::api::allocation::Allocation;
use crate::api::allocator::Allocator;
use crate::api::error::AllocError;

use super::super::traits::{DeviceError, DeviceLimits, DeviceMemory, MemoryDevice, MemoryPropertyFlags, MemoryType};

/// Vulkan device memory through `vkAllocateMemory` / `vkMapMemory`.
pub struct VulkanDevice {
    /// Logical device
    device: ash::Device,
    /// Memory type table of the physical device
    memory_types: Vec<MemoryType>,
    /// Limits of the physical device
    limits: DeviceLimits,
}

impl VulkanDevice {
    /// Create a memory device for `device`, reading the memory type table
    /// and limits of `physical_device`.
    pub fn new(instance: &ash::Instance, physical_device: vk::PhysicalDevice, device: ash::Device) -> Self {
        let memory_properties = unsafe { instance.get_physical_device_memory_properties(physical_device) };
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };

        let memory_types = memory_properties.memory_types[..memory_properties.memory_type_count as usize]
            .iter()
            .map(|ty| MemoryType::new(MemoryPropertyFlags::from_raw(ty.property_flags.as_raw()), ty.heap_index))
            .collect();

        let limits = DeviceLimits {
            max_memory_allocation_count: properties.limits.max_memory_allocation_count,
            buffer_image_granularity: properties.limits.buffer_image_granularity,
        };

        Self {
            device,
            memory_types,
            limits,
        }
    }

    /// The wrapped logical device.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }
}

fn device_error(result: vk::Result) -> DeviceError {
    match result {
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => DeviceError::OutOfDeviceMemory,
        vk::Result::ERROR_OUT_OF_HOST_MEMORY => DeviceError::OutOfHostMemory,
        vk::Result::ERROR_TOO_MANY_OBJECTS => DeviceError::TooManyObjects,
        vk::Result::ERROR_MEMORY_MAP_FAILED => DeviceError::MemoryMapFailed,
        other => DeviceError::Backend(format!("{:?}", other)),
    }
}

impl MemoryDevice for VulkanDevice {
    fn allocate_memory(&mut self, size: u64, memory_type_index: u32) -> Result<DeviceMemory, DeviceError> {
        if memory_type_index as usize >= self.memory_types.len() {
            return Err(DeviceError::InvalidMemoryType(memory_type_index));
        }

        let info = vk::MemoryAllocateInfo::builder()
            .allocation_size(size)
            .memory_type_index(memory_type_index);

        // SAFETY: info is fully initialised and the device outlives the call.
        let memory = unsafe { self.device.allocate_memory(&info, None) }.map_err(device_error)?;

        Ok(DeviceMemory::from_raw(memory.as_raw()))
    }

    fn free_memory(&mut self, memory: DeviceMemory) {
        // SAFETY: the allocator frees a reservation only after the GPU retired
        // every command that referenced it.
        unsafe {
            self.device
                .free_memory(vk::DeviceMemory::from_raw(memory.as_raw()), None)
        };
    }

    fn map_memory(&mut self, memory: DeviceMemory, size: u64) -> Result<NonNull<u8>, DeviceError> {
        // SAFETY: memory is a live, unmapped, host-visible reservation of at least `size` bytes.
        let ptr = unsafe {
            self.device.map_memory(
                vk::DeviceMemory::from_raw(memory.as_raw()),
                0,
                size,
                vk::MemoryMapFlags::empty(),
            )
        }
        .map_err(device_error)?;

        NonNull::new(ptr.cast::<u8>()).ok_or(DeviceError::MemoryMapFailed)
    }

    fn unmap_memory(&mut self, memory: DeviceMemory) {
        // SAFETY: memory is currently mapped.
        unsafe { self.device.unmap_memory(vk::DeviceMemory::from_raw(memory.as_raw())) };
    }

    fn memory_types(&self) -> &[MemoryType] {
        &self.memory_types
    }

    fn limits(&self) -> DeviceLimits {
        self.limits
    }
}

impl Allocator<VulkanDevice> {
    /// Allocate for a buffer or image from its `vkGet*MemoryRequirements`.
    pub fn allocate_for_requirements(
        &mut self,
        requirements: vk::MemoryRequirements,
        properties: MemoryPropertyFlags,
    ) -> Result<Allocation, AllocError> {
        self.allocate(
            requirements.size,
            requirements.alignment,
            requirements.memory_type_bits,
            properties,
        )
    }
}
