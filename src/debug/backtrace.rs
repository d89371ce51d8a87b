//! Allocation backtrace tracking.
//!
//! Records where each live allocation was made, so the leak report printed
//! when an allocator is dropped points at the offending call sites.

use std::collections::HashMap;
use std::fmt::Write;

use crate::allocators::block::BlockIndex;
use crate::allocators::page::PageId;

/// A captured backtrace for an allocation.
#[derive(Clone)]
pub(crate) struct AllocationTrace {
    /// Size of the allocation
    pub size: u64,

    /// Frame (tick count) the allocation was made in
    pub frame: u64,

    /// Captured backtrace (as string for simplicity)
    pub backtrace: String,
}

/// Backtraces of live allocations, keyed by page and block.
#[derive(Default)]
pub(crate) struct BacktraceTracker {
    traces: HashMap<(PageId, BlockIndex), AllocationTrace>,
}

impl BacktraceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an allocation with its backtrace.
    pub fn record_alloc(&mut self, page: PageId, block: BlockIndex, size: u64, frame: u64) {
        let trace = AllocationTrace {
            size,
            frame,
            backtrace: format!("{:?}", ::backtrace::Backtrace::new()),
        };
        self.traces.insert((page, block), trace);
    }

    /// Remove an allocation record.
    pub fn record_free(&mut self, page: PageId, block: BlockIndex) {
        self.traces.remove(&(page, block));
    }

    /// Format a leak report for every tracked allocation.
    pub fn leak_report(&self) -> String {
        let mut report = String::new();
        for ((page, block), trace) in &self.traces {
            let _ = writeln!(
                report,
                "{} block {}: {} bytes, allocated in frame {}",
                page, block, trace.size, trace.frame
            );
            let _ = writeln!(report, "{}", trace.backtrace);
        }
        report
    }
}
