//! Log setup for smartmarks binaries.
//!
//! Output goes to stderr: stdout carries the RPC stream.

use tracing_subscriber::{fmt, EnvFilter};

use crate::types::settings::LoggingSettings;

/// Builds the filter: `RUST_LOG` when set and valid, else the configured one.
pub fn build_filter(settings: &LoggingSettings) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global subscriber. Returns `false` if one was already set.
pub fn init(settings: &LoggingSettings) -> bool {
    fmt()
        .with_env_filter(build_filter(settings))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .try_init()
        .is_ok()
}
