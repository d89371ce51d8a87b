//! Debug utilities for tracking allocations.
//!
//! Poisoning is always available (enabled by `AllocatorConfig::poison_on_free`);
//! backtraces need the `debug` feature.

pub(crate) mod poison;

#[cfg(feature = "debug")]
pub(crate) mod backtrace;
