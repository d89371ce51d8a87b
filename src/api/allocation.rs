//! Allocation handles.

use std::ptr::NonNull;

use crate::allocators::block::BlockIndex;
use crate::allocators::page::PageId;
use crate::device::DeviceMemory;

/// A live sub-range of a device memory page.
///
/// The handle is a non-owning view: the memory object belongs to the page,
/// and the range stays valid until the handle is passed to
/// [`Allocator::deallocate`](super::allocator::Allocator::deallocate), which
/// resets every field. A clone that outlives the original is stale; freeing
/// it again is reported as [`AllocError::InvalidFree`](super::error::AllocError::InvalidFree).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub(crate) page: PageId,
    pub(crate) block: BlockIndex,
    pub(crate) generation: u32,
    pub(crate) offset: u64,
    pub(crate) size: u64,
    pub(crate) memory: DeviceMemory,
    pub(crate) memory_type_index: u32,
    pub(crate) host_ptr: Option<NonNull<u8>>,
}

// SAFETY: the host pointer is a view into a persistent mapping owned by the
// allocator; moving the handle to another thread does not touch the memory.
unsafe impl Send for Allocation {}

impl Allocation {
    /// An invalidated handle.
    pub const fn null() -> Self {
        Self {
            page: PageId::INVALID,
            block: BlockIndex::MAX,
            generation: 0,
            offset: 0,
            size: 0,
            memory: DeviceMemory::NULL,
            memory_type_index: 0,
            host_ptr: None,
        }
    }

    /// Byte offset inside [`memory`](Self::memory), for `vkBind*Memory`.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Requested size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// The page's device memory object.
    pub fn memory(&self) -> DeviceMemory {
        self.memory
    }

    pub fn memory_type_index(&self) -> u32 {
        self.memory_type_index
    }

    /// Page this allocation lives in.
    pub fn page_id(&self) -> PageId {
        self.page
    }

    /// Host address of the first byte, for host-visible memory.
    pub fn host_ptr(&self) -> Option<NonNull<u8>> {
        self.host_ptr
    }

    pub fn is_mapped(&self) -> bool {
        self.host_ptr.is_some()
    }

    /// False once the handle has been deallocated.
    pub fn is_valid(&self) -> bool {
        self.page != PageId::INVALID
    }

    /// View the mapped bytes.
    ///
    /// # Safety
    ///
    /// The allocation must be live, and the GPU must not be writing the range.
    pub unsafe fn mapped_slice(&self) -> Option<&[u8]> {
        let ptr = self.host_ptr?;
        Some(std::slice::from_raw_parts(ptr.as_ptr(), self.size as usize))
    }

    /// Mutably view the mapped bytes.
    ///
    /// # Safety
    ///
    /// The allocation must be live, and the GPU must not be accessing the range.
    pub unsafe fn mapped_slice_mut(&mut self) -> Option<&mut [u8]> {
        let ptr = self.host_ptr?;
        Some(std::slice::from_raw_parts_mut(ptr.as_ptr(), self.size as usize))
    }

    pub(crate) fn invalidate(&mut self) {
        *self = Self::null();
    }
}

impl Default for Allocation {
    fn default() -> Self {
        Self::null()
    }
}
