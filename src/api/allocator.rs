//! The device memory allocator.
//!
//! `Allocator` owns a set of pages reserved from a [`MemoryDevice`] and hands
//! out aligned sub-ranges of them. Frees are deferred: a deallocated range
//! sits in the garbage slot of the current frame and only returns to its
//! page's free list `frames_in_flight` calls to [`tick`](Allocator::tick)
//! later, once the GPU can no longer be using it.
//!
//! ```rust,no_run
//! use gpupool::{Allocator, AllocatorConfig, HostDevice, MemoryPropertyFlags};
//!
//! let mut alloc = Allocator::new(HostDevice::new(), AllocatorConfig::default());
//!
//! let mut vertices = alloc
//!     .allocate(64 * 1024, 256, u32::MAX, MemoryPropertyFlags::DEVICE_LOCAL)
//!     .expect("out of device memory");
//!
//! // ... bind vertices.memory() at vertices.offset(), record, submit ...
//!
//! alloc.deallocate(&mut vertices).unwrap();
//!
//! // Once per frame, after waiting on the fence of the oldest frame in flight:
//! alloc.tick();
//! ```

use crate::allocators::garbage::{GarbageRing, RetiredBlock};
use crate::allocators::page::{Page, PageId, Placement};
use crate::api::allocation::Allocation;
use crate::api::config::AllocatorConfig;
use crate::api::error::{AllocError, InvariantViolation};
use crate::api::stats::{AllocatorStats, BlockInfo, PageInfo};
use crate::debug::poison::poison_freed;
use crate::device::{DeviceError, MemoryDevice, MemoryPropertyFlags};
use crate::diagnostics::macros::gp_log;
use crate::gp_emit;
use crate::util::layout::is_aligned;

#[cfg(feature = "debug")]
use crate::debug::backtrace::BacktraceTracker;

#[derive(Debug, Default)]
struct Counters {
    peak_allocated: u64,
    allocation_count: u64,
    deallocation_count: u64,
    reclaimed_count: u64,
    evicted_pages: u64,
    failed_allocations: u64,
}

/// Frame-pipelined sub-allocator over device memory pages.
///
/// Single-threaded: drive it from the thread that submits GPU work. It may
/// be moved to another thread when the device allows it.
pub struct Allocator<D: MemoryDevice> {
    device: D,
    config: AllocatorConfig,
    /// Live pages, in creation order
    pages: Vec<Page>,
    garbage: GarbageRing,
    buffer_image_granularity: u64,
    /// Effective cap on live pages
    max_pages: u32,
    total_allocated: u64,
    total_reserved: u64,
    counters: Counters,
    #[cfg(feature = "debug")]
    traces: BacktraceTracker,
}

impl<D: MemoryDevice> Allocator<D> {
    /// Create an allocator over `device`.
    ///
    /// No memory is reserved until the first allocation.
    pub fn new(device: D, config: AllocatorConfig) -> Self {
        let limits = device.limits();
        let buffer_image_granularity = limits.buffer_image_granularity.max(1).next_power_of_two();
        let max_pages = match config.max_pages {
            Some(cap) => cap.min(limits.max_memory_allocation_count),
            None => limits.max_memory_allocation_count,
        };
        let config = AllocatorConfig {
            page_size: config.page_size.max(1),
            frames_in_flight: config.frames_in_flight.max(1),
            ..config
        };

        gp_log!(
            debug,
            "allocator created: page size {}, {} frames in flight, granularity {}, {} pages max",
            config.page_size,
            config.frames_in_flight,
            buffer_image_granularity,
            max_pages
        );

        Self {
            garbage: GarbageRing::new(config.frames_in_flight),
            device,
            config,
            pages: Vec::new(),
            buffer_image_granularity,
            max_pages,
            total_allocated: 0,
            total_reserved: 0,
            counters: Counters::default(),
            #[cfg(feature = "debug")]
            traces: BacktraceTracker::new(),
        }
    }

    /// Allocate `size` bytes aligned to `alignment` from a memory type allowed
    /// by `type_bits` that has every flag in `properties`.
    ///
    /// `type_bits` and `alignment` normally come straight from
    /// `VkMemoryRequirements`. Existing pages of the resolved memory type are
    /// tried first, in creation order; if none fits, a new page is reserved.
    /// Requests larger than the configured page size get a dedicated page.
    pub fn allocate(
        &mut self,
        size: u64,
        alignment: u64,
        type_bits: u32,
        properties: MemoryPropertyFlags,
    ) -> Result<Allocation, AllocError> {
        let result = self.try_allocate(size, alignment, type_bits, properties);
        if result.is_err() {
            self.counters.failed_allocations += 1;
        }
        result
    }

    fn try_allocate(
        &mut self,
        size: u64,
        alignment: u64,
        type_bits: u32,
        properties: MemoryPropertyFlags,
    ) -> Result<Allocation, AllocError> {
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }
        if !alignment.is_power_of_two() {
            return Err(AllocError::InvalidAlignment(alignment));
        }

        let Some(memory_type_index) = self.device.find_memory_type_index(type_bits, properties) else {
            gp_emit!(GP103, "type bits {:#b}, properties {}", type_bits, properties);
            return Err(AllocError::NoCompatibleMemoryType { type_bits, properties });
        };

        let granularity = self.buffer_image_granularity;
        let found = self
            .pages
            .iter_mut()
            .enumerate()
            .filter(|(_, page)| page.memory_type_index() == memory_type_index)
            .find_map(|(index, page)| {
                page.allocate(size, alignment, granularity)
                    .map(|placement| (index, placement))
            });

        let (page_index, placement) = match found {
            Some(found) => found,
            None => {
                let page = self.create_page(size, memory_type_index)?;
                self.pages.push(page);
                let page_index = self.pages.len() - 1;

                match self.pages[page_index].allocate(size, alignment, granularity) {
                    Some(placement) => (page_index, placement),
                    None => {
                        gp_emit!(GP901, "fresh {} cannot hold {} bytes", self.pages[page_index].id(), size);
                        return Err(AllocError::RequestTooLarge { size });
                    }
                }
            }
        };

        debug_assert!(is_aligned(placement.offset, alignment));
        Ok(self.commit(page_index, placement, size))
    }

    /// Reserve, and map if host-visible, a new page able to hold `size` bytes.
    fn create_page(&mut self, size: u64, memory_type_index: u32) -> Result<Page, AllocError> {
        let live_pages = self.pages.len() as u32;
        if live_pages >= self.max_pages {
            gp_emit!(GP101, "{} of {} pages live, {} bytes requested", live_pages, self.max_pages, size);
            return Err(AllocError::PoolExhausted {
                live_pages,
                limit: self.max_pages,
            });
        }

        let dedicated = size > self.config.page_size;
        let page_size = if dedicated { size } else { self.config.page_size };

        let memory = match self.device.allocate_memory(page_size, memory_type_index) {
            Ok(memory) => memory,
            Err(DeviceError::TooManyObjects) => {
                gp_emit!(GP101, "device refused reservation {} of {}", live_pages + 1, self.max_pages);
                return Err(AllocError::PoolExhausted {
                    live_pages,
                    limit: live_pages,
                });
            }
            Err(source) => {
                gp_emit!(GP102, "{} bytes of memory type {}: {}", page_size, memory_type_index, source);
                return Err(AllocError::OutOfDeviceMemory { size: page_size, source });
            }
        };

        let properties = self
            .device
            .memory_types()
            .get(memory_type_index as usize)
            .map(|ty| ty.property_flags)
            .unwrap_or_default();

        let host_ptr = if properties.is_host_visible() {
            match self.device.map_memory(memory, page_size) {
                Ok(ptr) => Some(ptr),
                Err(source) => {
                    self.device.free_memory(memory);
                    gp_emit!(GP104, "{} bytes of memory type {}: {}", page_size, memory_type_index, source);
                    return Err(AllocError::MapFailed { source });
                }
            }
        } else {
            None
        };

        let page = Page::new(memory, page_size, memory_type_index, properties, host_ptr, dedicated);
        self.total_reserved += page_size;

        gp_log!(
            debug,
            "reserved {}: {} bytes of memory type {} ({}){}",
            page.id(),
            page_size,
            memory_type_index,
            properties,
            if dedicated { ", dedicated" } else { "" }
        );

        Ok(page)
    }

    fn commit(&mut self, page_index: usize, placement: Placement, size: u64) -> Allocation {
        let page = &self.pages[page_index];
        let allocation = Allocation {
            page: page.id(),
            block: placement.block,
            generation: placement.generation,
            offset: placement.offset,
            size,
            memory: page.memory(),
            memory_type_index: page.memory_type_index(),
            host_ptr: page.host_ptr_at(placement.offset),
        };

        self.total_allocated += size;
        self.counters.peak_allocated = self.counters.peak_allocated.max(self.total_allocated);
        self.counters.allocation_count += 1;

        #[cfg(feature = "debug")]
        self.traces
            .record_alloc(allocation.page, allocation.block, size, self.garbage.frame());

        allocation
    }

    /// Queue an allocation for reclamation and invalidate the handle.
    ///
    /// The range stays reserved until `frames_in_flight` further calls to
    /// [`tick`](Self::tick). Freeing an invalidated, stale, or foreign handle
    /// returns [`AllocError::InvalidFree`] and leaves the allocator untouched.
    pub fn deallocate(&mut self, allocation: &mut Allocation) -> Result<(), AllocError> {
        let Some(retired) = self.retire(allocation) else {
            gp_emit!(
                GP002,
                "{} block {} generation {}",
                allocation.page,
                allocation.block,
                allocation.generation
            );
            return Err(AllocError::InvalidFree);
        };

        #[cfg(feature = "debug")]
        self.traces.record_free(retired.page, retired.block);

        self.garbage.push(retired);
        self.counters.deallocation_count += 1;
        allocation.invalidate();

        Ok(())
    }

    fn retire(&mut self, allocation: &Allocation) -> Option<RetiredBlock> {
        if !allocation.is_valid() {
            return None;
        }

        let page = self.pages.iter_mut().find(|page| page.id() == allocation.page)?;
        if page.memory() != allocation.memory {
            return None;
        }
        let size = page.retire(allocation.block, allocation.generation)?;

        Some(RetiredBlock {
            page: allocation.page,
            block: allocation.block,
            generation: allocation.generation,
            size,
        })
    }

    /// Advance to the next frame.
    ///
    /// Call once per frame, after waiting for the GPU to finish the frame
    /// submitted `frames_in_flight` frames ago. Ranges freed during that
    /// frame return to their pages, then empty pages above the `min_pages`
    /// low-water mark are released.
    pub fn tick(&mut self) {
        let retired = self.garbage.advance();
        let count = retired.len();

        for block in retired {
            self.reclaim(block);
        }
        self.evict_empty_pages();

        gp_log!(
            trace,
            "frame {}: reclaimed {} blocks, {} pages live",
            self.garbage.frame(),
            count,
            self.pages.len()
        );
    }

    /// Reclaim every pending free at once.
    ///
    /// Only valid while the GPU is idle, e.g. after `vkDeviceWaitIdle` before
    /// shutdown or swapchain recreation.
    pub fn collect_all(&mut self) {
        for block in self.garbage.drain_all() {
            self.reclaim(block);
        }
        self.evict_empty_pages();
    }

    fn reclaim(&mut self, retired: RetiredBlock) {
        let poison = self.config.poison_on_free;

        let Some(page) = self.pages.iter_mut().find(|page| page.id() == retired.page) else {
            gp_emit!(GP901, "retired block {} belongs to missing {}", retired.block, retired.page);
            return;
        };
        let Some(reclaimed) = page.deallocate(retired.block, retired.generation) else {
            gp_emit!(GP901, "retired block {} of {} is not retired", retired.block, retired.page);
            return;
        };

        if poison {
            if let Some(ptr) = page.host_ptr_at(reclaimed.offset) {
                // SAFETY: the range lies inside the page mapping and was just
                // returned to the free list; nothing references it.
                unsafe { poison_freed(ptr, reclaimed.size as usize) };
            }
        }

        self.total_allocated -= reclaimed.size;
        self.counters.reclaimed_count += 1;
    }

    /// Release empty pages while more than `min_pages` are live, newest first.
    fn evict_empty_pages(&mut self) {
        let min_pages = self.config.min_pages;
        if self.pages.len() <= min_pages {
            return;
        }
        let excess = self.pages.len() - min_pages;

        // Descending indices keep the remaining ones valid while removing.
        let doomed: Vec<usize> = self
            .pages
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, page)| page.is_empty())
            .map(|(index, _)| index)
            .take(excess)
            .collect();

        for index in doomed {
            let page = self.pages.remove(index);
            self.destroy_page(page);
            self.counters.evicted_pages += 1;
        }
    }

    fn destroy_page(&mut self, page: Page) {
        if page.host_ptr().is_some() {
            self.device.unmap_memory(page.memory());
        }
        self.device.free_memory(page.memory());
        self.total_reserved -= page.size();

        gp_log!(debug, "released {}: {} bytes", page.id(), page.size());
    }

    /// Bytes handed out and not yet reclaimed, including pending frees.
    pub fn total_allocated(&self) -> u64 {
        self.total_allocated
    }

    /// Bytes reserved from the device across live pages.
    pub fn total_reserved(&self) -> u64 {
        self.total_reserved
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Completed `tick()` calls.
    pub fn current_frame(&self) -> u64 {
        self.garbage.frame()
    }

    pub fn frames_in_flight(&self) -> usize {
        self.garbage.frames_in_flight()
    }

    /// Deallocated blocks not yet reclaimed.
    pub fn pending_frees(&self) -> usize {
        self.garbage.pending()
    }

    pub fn buffer_image_granularity(&self) -> u64 {
        self.buffer_image_granularity
    }

    /// Effective cap on live pages.
    pub fn max_pages(&self) -> u32 {
        self.max_pages
    }

    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    /// Mutable access to the device, e.g. to adjust a test budget.
    ///
    /// Memory objects owned by the allocator's pages must not be freed or
    /// unmapped through it.
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Snapshot of the allocator statistics.
    pub fn stats(&self) -> AllocatorStats {
        AllocatorStats {
            total_allocated: self.total_allocated,
            total_reserved: self.total_reserved,
            peak_allocated: self.counters.peak_allocated,
            page_count: self.pages.len(),
            dedicated_page_count: self.pages.iter().filter(|page| page.is_dedicated()).count(),
            live_allocations: self.pages.iter().map(|page| page.used_blocks() as u64).sum(),
            pending_frees: self.garbage.pending(),
            pending_bytes: self.garbage.pending_bytes(),
            free_block_bytes: self.pages.iter().map(Page::free_bytes).sum(),
            largest_free_blocks: self.pages.iter().map(Page::largest_free_block).sum(),
            allocation_count: self.counters.allocation_count,
            deallocation_count: self.counters.deallocation_count,
            reclaimed_count: self.counters.reclaimed_count,
            evicted_pages: self.counters.evicted_pages,
            failed_allocations: self.counters.failed_allocations,
            frame: self.garbage.frame(),
        }
    }

    /// Summaries of every live page, in creation order.
    pub fn pages(&self) -> Vec<PageInfo> {
        self.pages
            .iter()
            .map(|page| PageInfo {
                id: page.id(),
                memory_type_index: page.memory_type_index(),
                properties: page.properties(),
                size: page.size(),
                used_bytes: page.used_bytes(),
                block_count: page.block_count(),
                largest_free_block: page.largest_free_block(),
                dedicated: page.is_dedicated(),
                mapped: page.host_ptr().is_some(),
            })
            .collect()
    }

    /// Blocks of one page in offset order, or `None` if the page is gone.
    pub fn blocks(&self, page: PageId) -> Option<Vec<BlockInfo>> {
        let page = self.pages.iter().find(|p| p.id() == page)?;
        Some(
            page.blocks()
                .map(|(_, block)| BlockInfo {
                    id: block.id,
                    offset: block.offset,
                    size: block.size,
                    raw_size: block.raw_size,
                    state: block.state,
                })
                .collect(),
        )
    }

    /// Check every page and the allocator totals against their invariants.
    pub fn validate(&self) -> Result<(), InvariantViolation> {
        let global = |message: String| InvariantViolation { page: None, message };

        let mut reserved = 0u64;
        let mut allocated = 0u64;
        let mut retired = 0usize;

        for page in &self.pages {
            page.validate()
                .map_err(|message| InvariantViolation {
                    page: Some(page.id()),
                    message,
                })?;
            reserved += page.size();
            allocated += page.used_bytes();
            retired += page.retired_blocks() as usize;
        }

        if reserved != self.total_reserved {
            return Err(global(format!(
                "total_reserved is {} but pages hold {}",
                self.total_reserved, reserved
            )));
        }
        if allocated != self.total_allocated {
            return Err(global(format!(
                "total_allocated is {} but pages hold {}",
                self.total_allocated, allocated
            )));
        }
        if retired != self.garbage.pending() {
            return Err(global(format!(
                "{} retired blocks but {} pending frees",
                retired,
                self.garbage.pending()
            )));
        }
        if self.pages.len() > self.max_pages as usize {
            return Err(global(format!("{} pages exceed the cap of {}", self.pages.len(), self.max_pages)));
        }

        Ok(())
    }
}

impl<D: MemoryDevice> Drop for Allocator<D> {
    fn drop(&mut self) {
        let live: u32 = self.pages.iter().map(Page::used_blocks).sum();
        if live > 0 {
            let pages = self.pages.iter().filter(|page| page.used_blocks() > 0).count();

            #[cfg(not(feature = "debug"))]
            gp_emit!(GP001, "{} allocations still live across {} pages", live, pages);

            #[cfg(feature = "debug")]
            gp_emit!(
                GP001,
                "{} allocations still live across {} pages\n{}",
                live,
                pages,
                self.traces.leak_report()
            );
        }

        for page in std::mem::take(&mut self.pages) {
            self.destroy_page(page);
        }
    }
}
