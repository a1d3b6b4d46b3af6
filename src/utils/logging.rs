//! Logging setup plus macros gated on a per-module `ENABLE_LOGS` constant.
//!
//! Chatty modules (the prefetch cache logs every request) declare
//! `const ENABLE_LOGS: bool = ...;` and use `log_info!` / `log_warn!` /
//! `log_error!` so the noise can be switched off at compile time without
//! touching `RUST_LOG`.

use env_logger::Env;

/// Installs the global logger. `RUST_LOG` wins; otherwise `info`.
/// Safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init();
}

/// `log::info!` when the calling module's `ENABLE_LOGS` is true.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!($($arg)*);
        }
    };
}

/// `log::warn!` when the calling module's `ENABLE_LOGS` is true.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!($($arg)*);
        }
    };
}

/// `log::error!` when the calling module's `ENABLE_LOGS` is true.
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
    use super::*;

    #[test]
    fn test_init_logging_twice_is_harmless() {
        init_logging();
        init_logging();
        log::info!("logger installed");
    }
}
