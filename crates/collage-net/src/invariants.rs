//! `debug_assert!`-based consistency checks for shutdown coordination.
//! Compiled out entirely in release builds.

/// The shutdown signal must have actually reached the read loop (either the
/// send succeeded, or there was nothing left to signal).
macro_rules! debug_assert_shutdown_signaled {
    ($expected:expr, $actual:expr) => {
        debug_assert_eq!(
            $expected, $actual,
            "shutdown was not signaled to the read loop"
        )
    };
}

/// Blocked senders must be woken once shutdown has been triggered.
macro_rules! debug_assert_senders_woken {
    ($expected:expr, $actual:expr) => {
        debug_assert_eq!($expected, $actual, "blocked senders were not woken")
    };
}

pub(crate) use debug_assert_senders_woken;
pub(crate) use debug_assert_shutdown_signaled;
