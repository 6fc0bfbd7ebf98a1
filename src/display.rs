// display.rs — Verbosity-gated stderr diagnostics.
//
// A crate-level atomic display level shared by every module, plus the
// `notify!` macro that gates output on it.  The wire is never written to by
// this path; all diagnostics go to stderr.
//
// 0 = silent; 1 = errors only; 2 = normal; 3 = detail; 4 = debug.

use std::sync::atomic::{AtomicU32, Ordering};

/// Global display level.  Adjusted once at startup from the CLI flags and
/// read lock-free everywhere else.
pub static DISPLAY_LEVEL: AtomicU32 = AtomicU32::new(2);

/// Returns the current display level.
#[inline]
pub fn display_level() -> u32 {
    DISPLAY_LEVEL.load(Ordering::Relaxed)
}

/// Sets the display level.
#[inline]
pub fn set_display_level(level: u32) {
    DISPLAY_LEVEL.store(level, Ordering::Relaxed);
}

/// Emits a formatted diagnostic to stderr when the display level is at least
/// `$level`.  Format strings carry their own trailing newline.
#[macro_export]
macro_rules! notify {
    ($level:expr, $($arg:tt)*) => {
        if $crate::display::display_level() >= $level {
            eprint!($($arg)*);
        }
    };
}
