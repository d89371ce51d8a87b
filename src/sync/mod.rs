//! Synchronization primitives.
//!
//! The allocator itself is single-threaded; this guards the process-wide
//! diagnostic sink.

pub(crate) mod mutex;
