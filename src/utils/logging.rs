//! Process logging: `env_logger` setup plus module-gated log macros.
//!
//! A module opts in by declaring a flag and importing the macros from the
//! crate root:
//! ```ignore
//! const ENABLE_LOGS: bool = true;
//! use crate::{log_debug, log_info};
//!
//! log_info!("activity loop started");
//! ```

use log::LevelFilter;

/// Initialise `env_logger`. `RUST_LOG` takes precedence over `verbosity`.
pub fn init(verbosity: u8) {
    let level = match verbosity {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut builder = env_logger::Builder::new();
    builder.filter_level(level).parse_default_env();
    // A second init (tests, embedding) is harmless.
    let _ = builder.try_init();
}

/// Shared body of the gated macros; not meant to be called directly.
#[doc(hidden)]
#[macro_export]
macro_rules! __log_gated {
    ($level:expr, $($arg:tt)*) => {
        if ENABLE_LOGS {
            log::log!($level, $($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => { $crate::__log_gated!(log::Level::Debug, $($arg)*) };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => { $crate::__log_gated!(log::Level::Info, $($arg)*) };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => { $crate::__log_gated!(log::Level::Warn, $($arg)*) };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => { $crate::__log_gated!(log::Level::Error, $($arg)*) };
}
