//! Pages: one device memory reservation carved into blocks.
//!
//! Allocation is first-fit over the offset-ordered block list, which packs
//! pages front to back. Freed blocks merge with free neighbours immediately,
//! so two adjacent blocks are never both free.

use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

use super::block::{Block, BlockArena, BlockIndex, BlockState};
use crate::device::{DeviceMemory, MemoryPropertyFlags};
use crate::util::layout::{align_up, checked_align_up, on_same_granularity_page};

/// Page ids are unique across every allocator in the process, so a handle
/// from one allocator never resolves in another.
static NEXT_PAGE_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(u64);

impl PageId {
    /// The id carried by invalidated allocations.
    pub const INVALID: Self = Self(0);

    fn next() -> Self {
        Self(NEXT_PAGE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id value.
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page#{}", self.0)
    }
}

/// Where an allocation landed inside a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Placement {
    pub block: BlockIndex,
    pub generation: u32,
    /// Aligned offset of the allocation
    pub offset: u64,
}

/// A range handed back to the free list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Reclaimed {
    pub offset: u64,
    pub size: u64,
}

pub(crate) struct Page {
    id: PageId,
    memory: DeviceMemory,
    size: u64,
    memory_type_index: u32,
    properties: MemoryPropertyFlags,
    /// Persistent mapping of the whole page, for host-visible types
    host_ptr: Option<NonNull<u8>>,
    dedicated: bool,
    blocks: BlockArena,
    head: BlockIndex,
    next_block_id: u32,
    /// Raw bytes of used and retired blocks
    used_bytes: u64,
    used_blocks: u32,
    retired_blocks: u32,
}

// SAFETY: host_ptr points into the page's own mapping; the page is never shared.
unsafe impl Send for Page {}

impl Page {
    /// Track a freshly reserved (and, if host-visible, mapped) reservation.
    pub fn new(
        memory: DeviceMemory,
        size: u64,
        memory_type_index: u32,
        properties: MemoryPropertyFlags,
        host_ptr: Option<NonNull<u8>>,
        dedicated: bool,
    ) -> Self {
        let mut blocks = BlockArena::new();
        let head = blocks.insert(Block::free(0, size, 0));

        Self {
            id: PageId::next(),
            memory,
            size,
            memory_type_index,
            properties,
            host_ptr,
            dedicated,
            blocks,
            head,
            next_block_id: 1,
            used_bytes: 0,
            used_blocks: 0,
            retired_blocks: 0,
        }
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn memory(&self) -> DeviceMemory {
        self.memory
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn memory_type_index(&self) -> u32 {
        self.memory_type_index
    }

    pub fn properties(&self) -> MemoryPropertyFlags {
        self.properties
    }

    pub fn host_ptr(&self) -> Option<NonNull<u8>> {
        self.host_ptr
    }

    pub fn is_dedicated(&self) -> bool {
        self.dedicated
    }

    pub fn used_bytes(&self) -> u64 {
        self.used_bytes
    }

    /// Blocks handed out and not yet deallocated by their owner.
    pub fn used_blocks(&self) -> u32 {
        self.used_blocks
    }

    pub fn retired_blocks(&self) -> u32 {
        self.retired_blocks
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// A single free block spans the whole page.
    pub fn is_empty(&self) -> bool {
        let head = &self.blocks[self.head];
        head.is_free() && head.next.is_none()
    }

    /// Blocks in offset order.
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks {
            arena: &self.blocks,
            cursor: Some(self.head),
        }
    }

    /// Bytes held by free blocks.
    pub fn free_bytes(&self) -> u64 {
        self.blocks()
            .filter(|(_, block)| block.is_free())
            .map(|(_, block)| block.size)
            .sum()
    }

    pub fn largest_free_block(&self) -> u64 {
        self.blocks()
            .filter(|(_, block)| block.is_free())
            .map(|(_, block)| block.size)
            .max()
            .unwrap_or(0)
    }

    /// Host address of `offset`, when the page is mapped.
    pub fn host_ptr_at(&self, offset: u64) -> Option<NonNull<u8>> {
        debug_assert!(offset < self.size);
        let base = self.host_ptr?;
        // SAFETY: offset lies inside the page, and the mapping covers the page.
        Some(unsafe { NonNull::new_unchecked(base.as_ptr().add(offset as usize)) })
    }

    /// Carve `size` bytes aligned to `alignment` out of the first fitting
    /// free block.
    ///
    /// When `granularity > 1`, an allocation never shares a granularity page
    /// with an allocated neighbour: the offset is pushed to the next
    /// granularity boundary after an allocated predecessor, and a candidate
    /// whose tail would touch an allocated successor's page is skipped.
    pub fn allocate(&mut self, size: u64, alignment: u64, granularity: u64) -> Option<Placement> {
        let mut cursor = Some(self.head);

        while let Some(index) = cursor {
            let block = &self.blocks[index];
            cursor = block.next;

            if !block.is_free() || block.size < size {
                continue;
            }

            let Some(mut offset) = checked_align_up(block.offset, alignment) else {
                continue;
            };

            if granularity > 1 {
                if let Some(prev) = block.prev.map(|prev| &self.blocks[prev]) {
                    if prev.is_allocated()
                        && on_same_granularity_page(prev.allocation_offset(), prev.raw_size, offset, granularity)
                    {
                        offset = align_up(offset, granularity);
                    }
                }
            }

            let padding = offset - block.offset;
            let padded_size = match size.checked_add(padding) {
                Some(padded_size) if padded_size <= block.size => padded_size,
                _ => continue,
            };

            if granularity > 1 {
                if let Some(next) = block.next.map(|next| &self.blocks[next]) {
                    if next.is_allocated()
                        && on_same_granularity_page(offset, size, next.allocation_offset(), granularity)
                    {
                        continue;
                    }
                }
            }

            return Some(self.place(index, size, padding, padded_size));
        }

        None
    }

    fn place(&mut self, index: BlockIndex, size: u64, padding: u64, padded_size: u64) -> Placement {
        let (offset, block_size, next) = {
            let block = &self.blocks[index];
            (block.offset, block.size, block.next)
        };

        if block_size > padded_size {
            let mut remainder = Block::free(offset + padded_size, block_size - padded_size, self.next_id());
            remainder.prev = Some(index);
            remainder.next = next;
            let remainder = self.blocks.insert(remainder);

            if let Some(next) = next {
                self.blocks[next].prev = Some(remainder);
            }
            self.blocks[index].next = Some(remainder);
        }

        let generation = self.blocks.bump_generation(index);
        let block = &mut self.blocks[index];
        block.size = padded_size;
        block.raw_size = size;
        block.padding = padding;
        block.state = BlockState::Used;

        self.used_bytes += size;
        self.used_blocks += 1;

        Placement {
            block: index,
            generation,
            offset: offset + padding,
        }
    }

    fn next_id(&mut self) -> u32 {
        let id = self.next_block_id;
        self.next_block_id = self.next_block_id.wrapping_add(1);
        id
    }

    /// Mark a used block as retired. Returns its raw size, or `None` if the
    /// handle is stale or the block is not in use.
    pub fn retire(&mut self, index: BlockIndex, generation: u32) -> Option<u64> {
        let block = self.blocks.get_checked_mut(index, generation)?;
        if block.state != BlockState::Used {
            return None;
        }
        block.state = BlockState::Retired;
        let raw_size = block.raw_size;

        self.used_blocks -= 1;
        self.retired_blocks += 1;
        Some(raw_size)
    }

    /// Return a retired block to the free list, merging it with free
    /// neighbours.
    pub fn deallocate(&mut self, index: BlockIndex, generation: u32) -> Option<Reclaimed> {
        let block = self.blocks.get_checked_mut(index, generation)?;
        if block.state != BlockState::Retired {
            return None;
        }

        let reclaimed = Reclaimed {
            offset: block.allocation_offset(),
            size: block.raw_size,
        };
        block.state = BlockState::Free;
        block.raw_size = 0;
        block.padding = 0;

        self.used_bytes -= reclaimed.size;
        self.retired_blocks -= 1;

        let mut current = index;

        if let Some(prev) = self.blocks[current].prev {
            if self.blocks[prev].is_free() {
                self.absorb_next(prev);
                current = prev;
            }
        }

        if let Some(next) = self.blocks[current].next {
            if self.blocks[next].is_free() {
                self.absorb_next(current);
            }
        }

        Some(reclaimed)
    }

    /// Merge `index.next` into `index` and drop the absorbed block.
    fn absorb_next(&mut self, index: BlockIndex) {
        let Some(next) = self.blocks[index].next else {
            return;
        };
        let Some(absorbed) = self.blocks.remove(next) else {
            return;
        };

        let block = &mut self.blocks[index];
        block.size += absorbed.size;
        block.next = absorbed.next;

        if let Some(after) = absorbed.next {
            self.blocks[after].prev = Some(index);
        }
    }

    /// Check the block list against the page invariants.
    pub fn validate(&self) -> Result<(), String> {
        let mut expected_offset = 0u64;
        let mut prev: Option<(BlockIndex, bool)> = None;
        let mut count = 0usize;
        let mut used_bytes = 0u64;
        let mut used_blocks = 0u32;
        let mut retired_blocks = 0u32;

        for (index, block) in self.blocks() {
            if block.offset != expected_offset {
                return Err(format!(
                    "block {} starts at {} but the previous block ends at {}",
                    block.id, block.offset, expected_offset
                ));
            }
            if block.size == 0 {
                return Err(format!("block {} is empty", block.id));
            }
            if block.prev != prev.map(|(index, _)| index) {
                return Err(format!("block {} has a broken back-link", block.id));
            }
            if let Some((_, prev_free)) = prev {
                if prev_free && block.is_free() {
                    return Err(format!("block {} and its predecessor are both free", block.id));
                }
            }
            match block.state {
                BlockState::Free => {}
                BlockState::Used => used_blocks += 1,
                BlockState::Retired => retired_blocks += 1,
            }
            if block.is_allocated() {
                if block.padding + block.raw_size != block.size {
                    return Err(format!("block {} padding does not add up", block.id));
                }
                used_bytes += block.raw_size;
            }

            expected_offset = block.end();
            prev = Some((index, block.is_free()));
            count += 1;
        }

        if expected_offset != self.size {
            return Err(format!("blocks cover {} of {} bytes", expected_offset, self.size));
        }
        if count != self.blocks.len() {
            return Err(format!("{} blocks linked but {} stored", count, self.blocks.len()));
        }
        if used_bytes != self.used_bytes || used_blocks != self.used_blocks || retired_blocks != self.retired_blocks {
            return Err("usage counters disagree with the block list".to_string());
        }

        Ok(())
    }
}

/// Iterator over a page's blocks in offset order.
pub(crate) struct Blocks<'a> {
    arena: &'a BlockArena,
    cursor: Option<BlockIndex>,
}

impl<'a> Iterator for Blocks<'a> {
    type Item = (BlockIndex, &'a Block);

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.cursor?;
        let block = &self.arena[index];
        self.cursor = block.next;
        Some((index, block))
    }
}
