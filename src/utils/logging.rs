//! Logging macros gated on a per-module switch.
//!
//! A module opts in by declaring `const ENABLE_LOGS: bool` and importing the
//! macros from the crate root:
//!
//! ```ignore
//! const ENABLE_LOGS: bool = true;
//! use crate::{log_info, log_warn};
//!
//! log_info!("generated {} notifications", created);
//! ```
//!
//! Setting the constant to `false` silences a noisy module (the scheduler,
//! the generator) without touching `RUST_LOG` for the rest of the service.

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!($($arg)*);
        }
    };
}

#[cfg(test)]
mod tests {
    const ENABLE_LOGS: bool = false;

    #[test]
    fn disabled_module_skips_formatting() {
        let mut evaluated = false;
        let mut touch = || {
            evaluated = true;
            "x"
        };
        log_info!("{}", touch());
        log_warn!("{}", touch());
        log_error!("{}", touch());
        assert!(!evaluated);
    }
}
