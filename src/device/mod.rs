//! Device memory backends.
//!
//! The allocator only talks to the [`MemoryDevice`] trait. Backends:
//! - `host`: heap-backed simulated device, always available (tests, tools)
//! - `vulkan`: via the `ash` crate (enable `gpu-vulkan` feature)

pub mod traits;
pub use traits::{DeviceError, DeviceLimits, DeviceMemory, MemoryDevice, MemoryPropertyFlags, MemoryType};

pub mod host;
pub use host::HostDevice;

#[cfg(feature = "gpu-vulkan")]
pub mod vulkan;
