//! Diagnostic kinds and core types.
//!
//! Mirrors rustc's diagnostic levels for familiar UX.

/// The severity level of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// A hard error - something is definitely wrong.
    Error,
    /// A warning - something is probably wrong or suboptimal.
    Warning,
    /// Additional context about another diagnostic.
    Note,
}

impl DiagnosticKind {
    /// Get the display prefix for this kind.
    pub fn prefix(&self) -> &'static str {
        match self {
            DiagnosticKind::Error => "error",
            DiagnosticKind::Warning => "warning",
            DiagnosticKind::Note => "note",
        }
    }
}

/// A diagnostic message with code, message, and optional context.
///
/// Diagnostic codes follow the pattern:
/// - `GP0xx` - Allocation lifetime issues (leaks, invalid frees)
/// - `GP1xx` - Device memory and pool limits
/// - `GP9xx` - Internal errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Severity level.
    pub kind: DiagnosticKind,
    /// Diagnostic code (e.g., "GP002").
    pub code: &'static str,
    /// Primary message.
    pub message: &'static str,
    /// Optional additional context.
    pub note: Option<&'static str>,
    /// Optional fix suggestion.
    pub help: Option<&'static str>,
}

impl Diagnostic {
    /// Create a new error diagnostic.
    pub const fn error(code: &'static str, message: &'static str) -> Self {
        Self {
            kind: DiagnosticKind::Error,
            code,
            message,
            note: None,
            help: None,
        }
    }

    /// Create a new warning diagnostic.
    pub const fn warning(code: &'static str, message: &'static str) -> Self {
        Self {
            kind: DiagnosticKind::Warning,
            code,
            message,
            note: None,
            help: None,
        }
    }

    /// Add a note to this diagnostic.
    pub const fn with_note(mut self, note: &'static str) -> Self {
        self.note = Some(note);
        self
    }

    /// Add a help message to this diagnostic.
    pub const fn with_help(mut self, help: &'static str) -> Self {
        self.help = Some(help);
        self
    }
}

// =============================================================================
// Predefined diagnostics (GP0xx - Allocation lifetime)
// =============================================================================

/// GP001: Allocator destroyed with live allocations.
pub const GP001: Diagnostic = Diagnostic::warning(
    "GP001",
    "allocator dropped while allocations are still live"
).with_note("the pages backing these allocations are released anyway")
 .with_help("deallocate every Allocation and call collect_all() before dropping the allocator");

/// GP002: Invalid or double free.
pub const GP002: Diagnostic = Diagnostic::error(
    "GP002",
    "deallocate called with an invalid, stale, or foreign allocation"
).with_note("the handle was already freed, never came from this allocator, or its page was destroyed")
 .with_help("deallocate each Allocation exactly once, on the allocator that created it");

// =============================================================================
// Predefined diagnostics (GP1xx - Device memory)
// =============================================================================

/// GP101: Reservation cap reached.
pub const GP101: Diagnostic = Diagnostic::error(
    "GP101",
    "device memory pool exhausted: reservation limit reached"
).with_note("a new page was needed but the device allows no more memory objects")
 .with_help("raise page_size so requests share fewer, larger pages, or free long-lived allocations");

/// GP102: Device refused a reservation.
pub const GP102: Diagnostic = Diagnostic::error(
    "GP102",
    "device out of memory while reserving a new page"
).with_note("vkAllocateMemory (or the configured device) returned an error")
 .with_help("reduce resident resources or fall back to a smaller allocation");

/// GP103: No memory type satisfies the request.
pub const GP103: Diagnostic = Diagnostic::error(
    "GP103",
    "no memory type matches the requested type bits and properties"
).with_help("relax the desired property flags, e.g. drop HOST_CACHED");

/// GP104: Mapping a host-visible page failed.
pub const GP104: Diagnostic = Diagnostic::error(
    "GP104",
    "failed to map host-visible page"
).with_note("the reservation was released again");

// =============================================================================
// Predefined diagnostics (GP9xx - Internal)
// =============================================================================

/// GP901: Internal allocator error.
pub const GP901: Diagnostic = Diagnostic::error(
    "GP901",
    "internal allocator error"
).with_note("this indicates a bug in gpupool")
 .with_help("run Allocator::validate() to locate the broken page");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predefined_codes() {
        assert_eq!(GP002.kind, DiagnosticKind::Error);
        assert_eq!(GP001.kind, DiagnosticKind::Warning);
        assert!(GP101.help.is_some());
        assert_eq!(GP103.note, None);
    }

    #[test]
    fn test_prefix() {
        assert_eq!(DiagnosticKind::Warning.prefix(), "warning");
        assert_eq!(DiagnosticKind::Note.prefix(), "note");
    }
}
