//! Diagnostic emission backend.
//!
//! Handles outputting diagnostics to stderr, the `log` crate, or a custom sink.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use super::kind::{Diagnostic, DiagnosticKind};
use super::strict::should_panic;
use crate::sync::mutex::Mutex;

/// Global flag to suppress console output (for testing).
static DIAGNOSTICS_SUPPRESSED: AtomicBool = AtomicBool::new(false);

/// Installed sink, if any.
static SINK: OnceLock<Mutex<Option<Arc<dyn DiagnosticSink>>>> = OnceLock::new();

fn sink_slot() -> &'static Mutex<Option<Arc<dyn DiagnosticSink>>> {
    SINK.get_or_init(|| Mutex::new(None))
}

/// Suppress stderr and log output. Installed sinks still receive diagnostics.
pub fn suppress_diagnostics(suppress: bool) {
    DIAGNOSTICS_SUPPRESSED.store(suppress, Ordering::Relaxed);
}

/// Check if console output is suppressed.
pub fn is_suppressed() -> bool {
    DIAGNOSTICS_SUPPRESSED.load(Ordering::Relaxed)
}

/// Install a process-wide sink, returning the previous one.
pub fn set_sink(sink: Option<Arc<dyn DiagnosticSink>>) -> Option<Arc<dyn DiagnosticSink>> {
    std::mem::replace(&mut *sink_slot().lock(), sink)
}

/// Emit a diagnostic.
///
/// Stderr output happens in debug builds, or in release builds with the
/// `diagnostics` feature. The `log` feature forwards to the `log` crate.
pub fn emit(diag: &Diagnostic) {
    dispatch(diag, None);
}

/// Emit a diagnostic with additional runtime context.
pub fn emit_with_context(diag: &Diagnostic, context: &str) {
    dispatch(diag, Some(context));
}

fn dispatch(diag: &Diagnostic, context: Option<&str>) {
    if !is_suppressed() {
        #[cfg(any(debug_assertions, feature = "diagnostics"))]
        emit_to_stderr(diag, context);

        #[cfg(feature = "log")]
        emit_to_log(diag, context);
    }

    // Clone the Arc so a sink may emit recursively without deadlocking.
    let sink = sink_slot().lock().clone();
    if let Some(sink) = sink {
        sink.emit(diag, context);
    }

    if should_panic(diag.kind) && !std::thread::panicking() {
        match context {
            Some(context) => panic!(
                "[gpupool][{}] {}\nContext: {}\nStrict mode enabled - diagnostics are fatal.",
                diag.code, diag.message, context
            ),
            None => panic!(
                "[gpupool][{}] {}\nStrict mode enabled - diagnostics are fatal.",
                diag.code, diag.message
            ),
        }
    }
}

#[cfg(any(debug_assertions, feature = "diagnostics"))]
fn emit_to_stderr(diag: &Diagnostic, context: Option<&str>) {
    let mut stderr = std::io::stderr().lock();

    let _ = writeln!(
        stderr,
        "[gpupool][{}] {}: {}",
        diag.code,
        diag.kind.prefix(),
        diag.message
    );
    if let Some(context) = context {
        let _ = writeln!(stderr, "  context: {}", context);
    }
    if let Some(note) = diag.note {
        let _ = writeln!(stderr, "  note: {}", note);
    }
    if let Some(help) = diag.help {
        let _ = writeln!(stderr, "  help: {}", help);
    }
    let _ = writeln!(stderr);
}

#[cfg(feature = "log")]
fn emit_to_log(diag: &Diagnostic, context: Option<&str>) {
    let context = context.unwrap_or("");
    match diag.kind {
        DiagnosticKind::Error => log::error!(target: "gpupool", "[{}] {} {}", diag.code, diag.message, context),
        DiagnosticKind::Warning => log::warn!(target: "gpupool", "[{}] {} {}", diag.code, diag.message, context),
        DiagnosticKind::Note => log::info!(target: "gpupool", "[{}] {} {}", diag.code, diag.message, context),
    }
}

/// A diagnostic sink trait for custom output.
pub trait DiagnosticSink: Send + Sync {
    /// Handle a diagnostic and its optional runtime context.
    fn emit(&self, diag: &Diagnostic, context: Option<&str>);
}

/// A simple sink that collects diagnostics.
#[derive(Default)]
pub struct CollectingSink {
    records: Mutex<Vec<(Diagnostic, Option<String>)>>,
}

impl CollectingSink {
    /// Create a new collecting sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all collected diagnostics.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.records.lock().iter().map(|(diag, _)| diag.clone()).collect()
    }

    /// Get the contexts recorded for a given code.
    pub fn contexts_for(&self, code: &str) -> Vec<String> {
        self.records
            .lock()
            .iter()
            .filter(|(diag, _)| diag.code == code)
            .filter_map(|(_, ctx)| ctx.clone())
            .collect()
    }

    /// Check whether a diagnostic with this code was collected.
    pub fn has_code(&self, code: &str) -> bool {
        self.records.lock().iter().any(|(diag, _)| diag.code == code)
    }

    /// Clear collected diagnostics.
    pub fn clear(&self) {
        self.records.lock().clear();
    }

    /// Check if any errors were collected.
    pub fn has_errors(&self) -> bool {
        self.records
            .lock()
            .iter()
            .any(|(diag, _)| diag.kind == DiagnosticKind::Error)
    }
}

impl DiagnosticSink for CollectingSink {
    fn emit(&self, diag: &Diagnostic, context: Option<&str>) {
        self.records.lock().push((diag.clone(), context.map(str::to_owned)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::kind::{GP001, GP002};

    #[test]
    fn test_collecting_sink() {
        let sink = CollectingSink::new();
        sink.emit(&GP002, Some("page 3"));
        sink.emit(&GP001, None);

        assert_eq!(sink.diagnostics().len(), 2);
        assert!(sink.has_errors());
        assert!(sink.has_code("GP001"));
        assert_eq!(sink.contexts_for("GP002"), vec!["page 3".to_string()]);

        sink.clear();
        assert!(sink.diagnostics().is_empty());
        assert!(!sink.has_errors());
    }
}
