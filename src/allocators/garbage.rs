//! Frame-pipelined garbage ring.
//!
//! Deallocated blocks are parked in the slot of the frame that freed them.
//! Advancing the ring hands back the slot that is now `frames_in_flight`
//! frames old, whose GPU work the caller has confirmed as retired.

use super::block::BlockIndex;
use super::page::PageId;

/// A deallocated block waiting for its frame to retire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RetiredBlock {
    pub page: PageId,
    pub block: BlockIndex,
    pub generation: u32,
    /// Raw bytes of the allocation
    pub size: u64,
}

/// One garbage list per frame in flight.
pub(crate) struct GarbageRing {
    slots: Vec<Vec<RetiredBlock>>,
    current: usize,
    /// Number of times the ring has advanced
    frame: u64,
}

impl GarbageRing {
    /// Create a ring with `frames_in_flight` slots (at least one).
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            slots: (0..frames_in_flight.max(1)).map(|_| Vec::new()).collect(),
            current: 0,
            frame: 0,
        }
    }

    /// Park a block in the current frame's slot.
    pub fn push(&mut self, retired: RetiredBlock) {
        self.slots[self.current].push(retired);
    }

    /// Move to the next slot and take everything parked there.
    pub fn advance(&mut self) -> Vec<RetiredBlock> {
        self.current = (self.current + 1) % self.slots.len();
        self.frame += 1;
        std::mem::take(&mut self.slots[self.current])
    }

    /// Take every parked block, oldest slot first.
    pub fn drain_all(&mut self) -> Vec<RetiredBlock> {
        let len = self.slots.len();
        (1..=len)
            .flat_map(|step| std::mem::take(&mut self.slots[(self.current + step) % len]))
            .collect()
    }

    /// Number of parked blocks.
    pub fn pending(&self) -> usize {
        self.slots.iter().map(Vec::len).sum()
    }

    /// Raw bytes of all parked blocks.
    pub fn pending_bytes(&self) -> u64 {
        self.slots.iter().flatten().map(|retired| retired.size).sum()
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }
}
