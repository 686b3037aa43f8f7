//! Logging setup shared by every icechain crate
//!
//! Library crates log through the macros below; binaries call [`init`] once.
//!
//! Usage:
//! - Set ICECHAIN_LOG=off (default) - no logs
//! - Set ICECHAIN_LOG=info - backup/restore progress
//! - Set ICECHAIN_LOG=debug - per-file and per-PIT detail

use std::sync::Once;

// Re-export emit so macros can use it
pub use emit;

/// Environment variable consulted by [`init_diagnostics`]
pub const LOG_ENV: &str = "ICECHAIN_LOG";

static INIT: Once = Once::new();

/// Map an `ICECHAIN_LOG` value to a minimum level. `None` disables output.
fn parse_level(value: &str) -> Result<Option<emit::Level>, ()> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "off" => Ok(None),
        "error" => Ok(Some(emit::Level::Error)),
        "warn" => Ok(Some(emit::Level::Warn)),
        "info" => Ok(Some(emit::Level::Info)),
        "debug" => Ok(Some(emit::Level::Debug)),
        _ => Err(()),
    }
}

/// Initialize diagnostics based on the ICECHAIN_LOG environment variable
///
/// Safe to call more than once; only the first call configures the emitter.
pub fn init_diagnostics() {
    INIT.call_once(|| {
        let setting = std::env::var(LOG_ENV).unwrap_or_else(|_| "off".to_string());

        let level = match parse_level(&setting) {
            Ok(Some(level)) => level,
            Ok(None) => return,
            Err(()) => {
                // Bootstrap warning, the emitter is not running yet
                eprintln!("Warning: Unknown {LOG_ENV} value '{setting}', using 'info'");
                emit::Level::Info
            }
        };

        let rt = emit::setup()
            .emit_to(emit_term::stderr())
            .emit_when(emit::level::min_filter(level))
            .init();

        // The runtime lives for the whole process
        std::mem::forget(rt);
    });
}

/// Log basic operations (backups started, PITs appended, restores finished)
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::emit::info!($($arg)*)
    };
}

/// Log detailed diagnostics (per-file copies, chain traversal steps)
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::emit::debug!($($arg)*)
    };
}

/// Log recoverable conditions (retries, lenient skips)
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::emit::warn!($($arg)*)
    };
}

/// Log failures that abort an operation
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::emit::error!($($arg)*)
    };
}

// Short-name versions

#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::emit::info!($($arg)*)
    };
}

#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        $crate::emit::debug!($($arg)*)
    };
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::emit::warn!($($arg)*)
    };
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        $crate::emit::error!($($arg)*)
    };
}

pub use init_diagnostics as init;
