//! # gpupool
//!
//! Frame-pipelined device memory sub-allocation for Vulkan renderers.
//!
//! ## Features
//!
//! - Large pages reserved once, carved into aligned blocks (first fit)
//! - `bufferImageGranularity`-aware placement between neighbouring blocks
//! - Immediate coalescing of freed neighbours
//! - Deferred frees: a range returns to its page `frames_in_flight` ticks later
//! - Dedicated pages for requests larger than the page size
//! - Eviction of empty pages above a low-water mark
//! - Typed errors for exhausted pools and invalid or double frees
//! - Allocation diagnostics and leak reports
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gpupool::{Allocator, AllocatorConfig, HostDevice, MemoryPropertyFlags};
//!
//! let mut alloc = Allocator::new(HostDevice::new(), AllocatorConfig::default());
//!
//! // Render loop
//! let mut staging = alloc
//!     .allocate(4096, 64, u32::MAX, MemoryPropertyFlags::HOST_VISIBLE)
//!     .unwrap();
//! // ... write through staging.host_ptr(), record a copy, submit ...
//! alloc.deallocate(&mut staging).unwrap();
//!
//! // After waiting on the oldest in-flight frame's fence:
//! alloc.tick();
//! ```
//!
//! With the `gpu-vulkan` feature, `device::vulkan::VulkanDevice` drives the
//! same allocator on a real `ash::Device`.

pub mod api;
pub mod device;
pub mod diagnostics;

mod allocators;
mod debug;
mod sync;
mod util;

// Re-export public API at crate root for convenience
pub use api::allocation::Allocation;
pub use api::allocator::Allocator;
pub use api::config::AllocatorConfig;
pub use api::error::{AllocError, InvariantViolation};
pub use api::stats::{AllocatorStats, BlockInfo, PageInfo};

pub use allocators::block::BlockState;
pub use allocators::page::PageId;

// Device backends
pub use device::{DeviceError, DeviceLimits, DeviceMemory, HostDevice, MemoryDevice, MemoryPropertyFlags, MemoryType};

#[cfg(feature = "gpu-vulkan")]
pub use device::vulkan::VulkanDevice;

// Diagnostics - Core types and predefined codes
pub use diagnostics::{CollectingSink, Diagnostic, DiagnosticKind, DiagnosticSink};
pub use diagnostics::{set_strict_mode, StrictMode, StrictModeGuard};
pub use diagnostics::{GP001, GP002, GP101, GP102, GP103, GP104, GP901};

// Size helpers
pub use util::size::{format_bytes, gib, kib, mib};
