//! Logging configuration and initialization.
//!
//! Uses tracing with environment-based filtering and optional JSON file output.

use std::io::IsTerminal;
use std::path::Path;
use std::sync::{Mutex, Once};

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::error::{Result, TangleError};

/// Initialize logging for the CLI.
///
/// Honors `RUST_LOG` if set; otherwise a default filter is derived from the
/// verbosity and quiet flags (warn by default, info at `-v`, debug at `-vv`).
///
/// # Errors
///
/// Returns an error if the filter is malformed, the log file cannot be
/// created, or a global subscriber was already installed.
pub fn init_logging(verbosity: u8, quiet: bool, log_file: Option<&Path>) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter(verbosity, quiet)))
        .map_err(|e| TangleError::Config(format!("invalid log filter: {e}")))?;

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_file(cfg!(debug_assertions))
        .with_line_number(cfg!(debug_assertions))
        .with_ansi(std::io::stderr().is_terminal());

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    let install = if let Some(path) = log_file {
        let file = std::fs::File::create(path)?;
        let file_layer = fmt::layer()
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .json();
        tracing::subscriber::set_global_default(subscriber.with(file_layer))
    } else {
        tracing::subscriber::set_global_default(subscriber)
    };
    install.map_err(|e| TangleError::Config(format!("logging already initialized: {e}")))
}

fn default_filter(verbosity: u8, quiet: bool) -> String {
    if quiet {
        return "error".to_string();
    }

    match verbosity {
        0 => "tangle=warn".to_string(),
        1 => "tangle=info".to_string(),
        2 => "tangle=debug".to_string(),
        _ => "tangle=trace".to_string(),
    }
}

/// Initialize logging for tests with the test writer.
pub fn init_test_logging() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("tangle=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}
