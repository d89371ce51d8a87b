//! Public API for gpupool.
//!
//! This module contains all user-facing types.
//! Most users should only interact with [`allocator::Allocator`] and the
//! handles it returns.

pub mod allocation;
pub mod allocator;
pub mod config;
pub mod error;
pub mod stats;
