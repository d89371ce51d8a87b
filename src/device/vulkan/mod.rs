//! Vulkan backend for device memory
//!
//! This module implements the [`MemoryDevice`](super::MemoryDevice) trait on
//! top of an `ash::Device`.

pub mod device;

pub use device::VulkanDevice;
