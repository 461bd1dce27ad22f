//! Logging macros with verbosity level control.
//!
//! Zero-cost when disabled (verbosity=0). Levels:
//! - 0: SILENT (nothing)
//! - 1: SUMMARY (one line per evaluation run or resolver pass)
//! - 2: DETAIL (waves, per-conflict decisions, rejected resolutions)
//! - 3: DEBUG (per-constraint internals, cache behaviour)

/// Verbosity level constants.
pub const VERBOSITY_SILENT: u8 = 0;
pub const VERBOSITY_SUMMARY: u8 = 1;
pub const VERBOSITY_DETAIL: u8 = 2;
pub const VERBOSITY_DEBUG: u8 = 3;

/// Log at SUMMARY level (verbosity >= 1).
#[macro_export]
macro_rules! log_summary {
    ($verbosity:expr, $($arg:tt)*) => {
        if $verbosity >= $crate::logging::VERBOSITY_SUMMARY {
            eprintln!("[league-constraints] {}", format_args!($($arg)*));
        }
    };
}

/// Log at DETAIL level (verbosity >= 2).
///
/// Used for: wave dispatch, strategy attempts, validation rejections.
#[macro_export]
macro_rules! log_detail {
    ($verbosity:expr, $($arg:tt)*) => {
        if $verbosity >= $crate::logging::VERBOSITY_DETAIL {
            eprintln!("[league-constraints]   {}", format_args!($($arg)*));
        }
    };
}

/// Log at DEBUG level (verbosity >= 3).
#[macro_export]
macro_rules! log_debug {
    ($verbosity:expr, $($arg:tt)*) => {
        if $verbosity >= $crate::logging::VERBOSITY_DEBUG {
            eprintln!("[league-constraints]     {}", format_args!($($arg)*));
        }
    };
}
