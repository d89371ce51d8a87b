//! Sub-allocation internals.
//!
//! Pages carve device memory into blocks; the garbage ring defers frees
//! until the GPU has retired the frames that used them.

pub(crate) mod block;
pub(crate) mod garbage;
pub(crate) mod page;
