//! Diagnostics for allocator misuse and device failures.
//!
//! This module provides:
//! - **Runtime diagnostics**: Allocator-aware error messages with codes
//! - **Sinks**: Route diagnostics into tools or tests
//! - **Strict mode**: Optional panic-on-error for CI
//!
//! ## Diagnostic Codes
//!
//! | Code  | Meaning                              |
//! |-------|--------------------------------------|
//! | GP0xx | Allocation lifetime (leaks, frees)   |
//! | GP1xx | Device memory and reservation limits |
//! | GP9xx | Internal errors                      |
//!
//! ## Usage
//!
//! ```rust,ignore
//! use gpupool::gp_emit;
//!
//! gp_emit!(GP002);
//! gp_emit!(GP101, "{} pages live", 4096);
//! ```

pub mod emit;
pub mod kind;
pub mod macros;
pub mod strict;

pub use emit::{emit, emit_with_context, set_sink, suppress_diagnostics, CollectingSink, DiagnosticSink};
pub use kind::{Diagnostic, DiagnosticKind};
pub use strict::{init_from_env, set_strict_mode, strict_mode, StrictMode, StrictModeGuard};

pub use kind::{GP001, GP002, GP101, GP102, GP103, GP104, GP901};
