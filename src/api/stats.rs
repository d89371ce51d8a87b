//! Allocation statistics and page inspection.

use crate::allocators::block::BlockState;
use crate::allocators::page::PageId;
use crate::device::MemoryPropertyFlags;
use crate::util::size::format_bytes;

/// Aggregated allocator statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    /// Bytes handed out and not yet reclaimed (includes pending frees).
    pub total_allocated: u64,

    /// Bytes reserved from the device across live pages.
    pub total_reserved: u64,

    /// Peak bytes allocated (high water mark).
    pub peak_allocated: u64,

    /// Live pages.
    pub page_count: usize,

    /// Live pages created for a single oversized request.
    pub dedicated_page_count: usize,

    /// Allocations held by callers.
    pub live_allocations: u64,

    /// Deallocated blocks waiting in the garbage ring.
    pub pending_frees: usize,

    /// Raw bytes of the blocks waiting in the garbage ring.
    pub pending_bytes: u64,

    /// Bytes held by free blocks across all pages.
    pub free_block_bytes: u64,

    /// Sum over pages of each page's largest free block.
    pub largest_free_blocks: u64,

    /// Total number of successful allocations.
    pub allocation_count: u64,

    /// Total number of accepted deallocations.
    pub deallocation_count: u64,

    /// Blocks returned to page free lists by `tick()` / `collect_all()`.
    pub reclaimed_count: u64,

    /// Pages released by eviction.
    pub evicted_pages: u64,

    /// Allocations that returned an error.
    pub failed_allocations: u64,

    /// Completed `tick()` calls.
    pub frame: u64,
}

impl AllocatorStats {
    /// Reserved bytes not covered by allocations.
    pub fn free_bytes(&self) -> u64 {
        self.total_reserved.saturating_sub(self.total_allocated)
    }

    /// How scattered the free space is (0.0 to 1.0).
    ///
    /// 0.0 when every page keeps its free bytes in a single block; close to
    /// 1.0 when free space is split into many small holes.
    pub fn fragmentation(&self) -> f64 {
        if self.free_block_bytes == 0 {
            return 0.0;
        }
        1.0 - self.largest_free_blocks as f64 / self.free_block_bytes as f64
    }

    /// Fraction of reserved bytes in use (0.0 to 1.0).
    pub fn utilization(&self) -> f64 {
        if self.total_reserved == 0 {
            return 0.0;
        }
        self.total_allocated as f64 / self.total_reserved as f64
    }
}

impl std::fmt::Display for AllocatorStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Device Memory Statistics:")?;
        writeln!(f, "  Allocated:   {}", format_bytes(self.total_allocated))?;
        writeln!(f, "  Reserved:    {}", format_bytes(self.total_reserved))?;
        writeln!(f, "  Peak:        {}", format_bytes(self.peak_allocated))?;
        writeln!(f, "  Utilization: {:.1}%", self.utilization() * 100.0)?;
        writeln!(f, "  Pages:       {} ({} dedicated)", self.page_count, self.dedicated_page_count)?;
        writeln!(f, "  Live:        {}", self.live_allocations)?;
        writeln!(f, "  Pending:     {} ({})", self.pending_frees, format_bytes(self.pending_bytes))?;
        writeln!(f, "  Fragmented:  {:.1}%", self.fragmentation() * 100.0)?;
        writeln!(f, "  Evicted:     {}", self.evicted_pages)?;
        writeln!(f, "  Failures:    {}", self.failed_allocations)?;
        Ok(())
    }
}

/// Summary of one page, for overlays and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageInfo {
    pub id: PageId,
    pub memory_type_index: u32,
    pub properties: MemoryPropertyFlags,
    pub size: u64,
    /// Raw bytes of used and retired blocks
    pub used_bytes: u64,
    pub block_count: usize,
    pub largest_free_block: u64,
    pub dedicated: bool,
    pub mapped: bool,
}

/// One block of a page, in offset order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Page-local id
    pub id: u32,
    pub offset: u64,
    /// Bytes covered, including padding
    pub size: u64,
    /// Bytes requested by the allocation (0 when free)
    pub raw_size: u64,
    pub state: BlockState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utilization() {
        let stats = AllocatorStats {
            total_allocated: 32,
            total_reserved: 128,
            ..Default::default()
        };
        assert_eq!(stats.free_bytes(), 96);
        assert!((stats.utilization() - 0.25).abs() < f64::EPSILON);
        assert_eq!(AllocatorStats::default().utilization(), 0.0);
    }

    #[test]
    fn test_fragmentation() {
        assert_eq!(AllocatorStats::default().fragmentation(), 0.0);

        let contiguous = AllocatorStats {
            free_block_bytes: 4096,
            largest_free_blocks: 4096,
            ..Default::default()
        };
        assert_eq!(contiguous.fragmentation(), 0.0);

        let scattered = AllocatorStats {
            free_block_bytes: 4096,
            largest_free_blocks: 1024,
            ..Default::default()
        };
        assert!((scattered.fragmentation() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_display_mentions_totals() {
        let stats = AllocatorStats {
            total_reserved: 1024 * 1024,
            page_count: 1,
            ..Default::default()
        };
        let text = stats.to_string();
        assert!(text.contains("Reserved:    1.00 MiB"));
        assert!(text.contains("Pages:       1 (0 dedicated)"));
    }
}
