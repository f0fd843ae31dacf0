//! Structured logging utilities for dirq components.
//!
//! Provides consistent logging with component prefixes and structured fields.
//!
//! # Usage
//!
//! ```ignore
//! use dirq_config::log_sched_debug;
//!
//! log_sched_debug!("Admission granted", job = "deep count", in_flight = 3);
//! ```

/// Component identifiers for log filtering
pub struct Component;

impl Component {
    pub const SCHED: &'static str = "SCHED";
    pub const FETCH: &'static str = "FETCH";
    pub const WATCH: &'static str = "WATCH";
    pub const THUMB: &'static str = "THUMB";
    pub const CLI: &'static str = "CLI";
}

/// Log levels for runtime configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

// === SCHED logging macros ===

#[macro_export]
macro_rules! log_sched_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "SCHED", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_sched_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "SCHED", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_sched_trace {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::trace!(component = "SCHED", $($key = $value,)* $msg)
    };
}

// === FETCH logging macros ===

#[macro_export]
macro_rules! log_fetch_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "FETCH", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_fetch_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "FETCH", $($key = $value,)* $msg)
    };
}

// === WATCH logging macros ===

#[macro_export]
macro_rules! log_watch_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "WATCH", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_watch_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "WATCH", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_watch_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "WATCH", $($key = $value,)* $msg)
    };
}

// === THUMB logging macros ===

#[macro_export]
macro_rules! log_thumb_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "THUMB", $($key = $value,)* $msg)
    };
}

/// Initialize logging with the given level filter.
/// Call this once at application startup.
pub fn init_logging(level: LogLevel) {
    use tracing_subscriber::EnvFilter;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_constants() {
        assert_eq!(Component::SCHED, "SCHED");
        assert_eq!(Component::FETCH, "FETCH");
        assert_eq!(Component::THUMB, "THUMB");
    }

    #[test]
    fn test_level_filters() {
        assert_eq!(LogLevel::Warn.as_filter(), "warn");
        assert_eq!(LogLevel::Trace.as_filter(), "trace");
    }
}
