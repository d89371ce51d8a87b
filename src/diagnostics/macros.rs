//! Diagnostic and logging macros.

/// Emit a predefined diagnostic by code, optionally with formatted context.
///
/// # Example
///
/// ```rust,ignore
/// gp_emit!(GP002);
/// gp_emit!(GP002, "page {} block {}", page, block);
/// ```
#[macro_export]
macro_rules! gp_emit {
    ($code:ident) => {{
        $crate::diagnostics::emit::emit(&$crate::diagnostics::$code);
    }};
    ($code:ident, $($ctx:tt)+) => {{
        $crate::diagnostics::emit::emit_with_context(
            &$crate::diagnostics::$code,
            &format!($($ctx)+),
        );
    }};
}

/// Assert a condition or emit a diagnostic.
///
/// # Example
///
/// ```rust,ignore
/// gp_assert!(page.is_empty(), GP901);
/// ```
#[macro_export]
macro_rules! gp_assert {
    ($cond:expr, $code:ident) => {{
        if !$cond {
            $crate::gp_emit!($code);
        }
    }};
    ($cond:expr, $code:ident, $($ctx:tt)+) => {{
        if !$cond {
            $crate::gp_emit!($code, $($ctx)+);
        }
    }};
}

/// Allocator event logging through the `log` crate; compiled out without it.
macro_rules! gp_log {
    ($level:ident, $($arg:tt)+) => {{
        #[cfg(feature = "log")]
        {
            log::$level!(target: "gpupool", $($arg)+);
        }
        #[cfg(not(feature = "log"))]
        {
            let _ = format_args!($($arg)+);
        }
    }};
}

pub(crate) use gp_log;
