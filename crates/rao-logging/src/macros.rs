//! ---
//! rao_section: "03-persistence-logging"
//! rao_subsection: "module"
//! rao_type: "source"
//! rao_scope: "code"
//! rao_description: "Structured logging adapters and sinks."
//! rao_version: "v0.0.0-prealpha"
//! rao_owner: "tbd"
//! ---

/// Shared expansion for the level-specific macros.
#[doc(hidden)]
#[macro_export]
macro_rules! __rao_event {
    ($level:expr, $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            $level,
            case = ctx.case.unwrap_or(""),
            stage = ctx.stage.unwrap_or(""),
            profile = ctx.profile.unwrap_or(""),
            attempt = ctx.attempt.unwrap_or_default(),
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit an informational log enriched with case context.
#[macro_export]
macro_rules! rao_info {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__rao_event!(tracing::Level::INFO, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__rao_event!(tracing::Level::INFO, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a warning enriched with case context.
#[macro_export]
macro_rules! rao_warn {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__rao_event!(tracing::Level::WARN, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__rao_event!(tracing::Level::WARN, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a debug log enriched with case context.
#[macro_export]
macro_rules! rao_debug {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__rao_event!(tracing::Level::DEBUG, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__rao_event!(tracing::Level::DEBUG, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit an error log enriched with case context.
#[macro_export]
macro_rules! rao_error {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__rao_event!(tracing::Level::ERROR, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__rao_event!(tracing::Level::ERROR, $crate::LogContext::default(), $($arg)+)
    };
}
