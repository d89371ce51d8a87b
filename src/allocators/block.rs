//! Blocks and the per-page block arena.
//!
//! Blocks form an offset-ordered doubly-linked list, but live in one `Vec`
//! and link to each other by index. Vacated slots are recycled through a
//! free-slot list, and every slot carries a generation that changes whenever
//! the slot is handed out again, so stale allocation handles are detectable.

use std::ops::{Index, IndexMut};

/// Index of a block slot inside its page's arena.
pub(crate) type BlockIndex = u32;

/// Lifecycle state of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    /// Available for allocation.
    Free,
    /// Handed out to a caller.
    Used,
    /// Deallocated by the caller, waiting in a garbage slot for the GPU to retire it.
    Retired,
}

/// A tracked sub-range of a page.
#[derive(Debug, Clone)]
pub(crate) struct Block {
    /// Start of the block within the page
    pub offset: u64,
    /// Bytes covered by the block; the padded size while allocated
    pub size: u64,
    /// Bytes requested by the current allocation (0 when free)
    pub raw_size: u64,
    /// Alignment and granularity padding in front of the allocation
    pub padding: u64,
    pub state: BlockState,
    /// Page-local id, for diagnostics
    pub id: u32,
    pub prev: Option<BlockIndex>,
    pub next: Option<BlockIndex>,
}

impl Block {
    /// A free block covering `[offset, offset + size)`.
    pub fn free(offset: u64, size: u64, id: u32) -> Self {
        Self {
            offset,
            size,
            raw_size: 0,
            padding: 0,
            state: BlockState::Free,
            id,
            prev: None,
            next: None,
        }
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        self.state == BlockState::Free
    }

    /// Used or retired: the range must not be handed out.
    #[inline]
    pub fn is_allocated(&self) -> bool {
        self.state != BlockState::Free
    }

    /// Offset of the allocation inside the block.
    #[inline]
    pub fn allocation_offset(&self) -> u64 {
        self.offset + self.padding
    }

    /// One past the last byte of the block.
    #[inline]
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

struct Slot {
    generation: u32,
    block: Option<Block>,
}

/// Index-linked storage for the blocks of one page.
pub(crate) struct BlockArena {
    slots: Vec<Slot>,
    vacant: Vec<BlockIndex>,
}

impl BlockArena {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            vacant: Vec::new(),
        }
    }

    /// Store a block, reusing a vacant slot when possible.
    pub fn insert(&mut self, block: Block) -> BlockIndex {
        if let Some(index) = self.vacant.pop() {
            let slot = &mut self.slots[index as usize];
            slot.generation = slot.generation.wrapping_add(1);
            slot.block = Some(block);
            index
        } else {
            let index = self.slots.len() as BlockIndex;
            self.slots.push(Slot {
                generation: 0,
                block: Some(block),
            });
            index
        }
    }

    /// Remove a block, vacating its slot.
    pub fn remove(&mut self, index: BlockIndex) -> Option<Block> {
        let slot = self.slots.get_mut(index as usize)?;
        let block = slot.block.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.vacant.push(index);
        Some(block)
    }

    /// Advance the generation of a live slot and return the new value.
    pub fn bump_generation(&mut self, index: BlockIndex) -> u32 {
        let slot = &mut self.slots[index as usize];
        slot.generation = slot.generation.wrapping_add(1);
        slot.generation
    }

    /// Look up a live block, checking the generation.
    #[cfg(test)]
    pub fn get_checked(&self, index: BlockIndex, generation: u32) -> Option<&Block> {
        let slot = self.slots.get(index as usize)?;
        if slot.generation != generation {
            return None;
        }
        slot.block.as_ref()
    }

    /// Look up a live block mutably, checking the generation.
    pub fn get_checked_mut(&mut self, index: BlockIndex, generation: u32) -> Option<&mut Block> {
        let slot = self.slots.get_mut(index as usize)?;
        if slot.generation != generation {
            return None;
        }
        slot.block.as_mut()
    }

    /// Number of live blocks.
    pub fn len(&self) -> usize {
        self.slots.len() - self.vacant.len()
    }

    /// Number of slots, live or vacant.
    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

impl Index<BlockIndex> for BlockArena {
    type Output = Block;

    fn index(&self, index: BlockIndex) -> &Block {
        match self.slots[index as usize].block.as_ref() {
            Some(block) => block,
            None => panic!("block slot {} is vacant", index),
        }
    }
}

impl IndexMut<BlockIndex> for BlockArena {
    fn index_mut(&mut self, index: BlockIndex) -> &mut Block {
        match self.slots[index as usize].block.as_mut() {
            Some(block) => block,
            None => panic!("block slot {} is vacant", index),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_reuse_bumps_generation() {
        let mut arena = BlockArena::new();
        let a = arena.insert(Block::free(0, 64, 0));
        let b = arena.insert(Block::free(64, 64, 1));
        assert_eq!(arena.len(), 2);

        assert!(arena.get_checked(b, 0).is_some());
        arena.remove(b).unwrap();
        assert!(arena.get_checked(b, 0).is_none());
        assert_eq!(arena.len(), 1);

        let c = arena.insert(Block::free(64, 64, 2));
        assert_eq!(c, b);
        assert_eq!(arena.capacity(), 2);
        assert!(arena.get_checked(c, 0).is_none());
        assert_eq!(arena[c].id, 2);
        assert_eq!(arena[a].id, 0);
    }

    #[test]
    fn test_bump_generation_invalidates_checked_lookup() {
        let mut arena = BlockArena::new();
        let a = arena.insert(Block::free(0, 64, 0));
        let generation = arena.bump_generation(a);

        assert!(arena.get_checked(a, 0).is_none());
        assert!(arena.get_checked_mut(a, generation).is_some());
    }

    #[test]
    fn test_remove_twice() {
        let mut arena = BlockArena::new();
        let a = arena.insert(Block::free(0, 64, 0));
        assert!(arena.remove(a).is_some());
        assert!(arena.remove(a).is_none());
    }

    #[test]
    fn test_block_helpers() {
        let mut block = Block::free(256, 512, 3);
        assert!(block.is_free());
        assert_eq!(block.end(), 768);

        block.state = BlockState::Retired;
        block.padding = 64;
        assert!(block.is_allocated());
        assert_eq!(block.allocation_offset(), 320);
    }
}
