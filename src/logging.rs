//! Diagnostic logging setup.
//!
//! Events go to stderr so stdout stays a clean passthrough for remote
//! command output.

use std::io::IsTerminal;

use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter directives.
pub const LOG_ENV: &str = "GANTRY_LOG";

const DEFAULT_DIRECTIVES: &str = "info";

/// Builds the filter from [`LOG_ENV`], falling back to `info` when it is
/// unset or unparseable.
#[must_use]
pub fn filter_from_env() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
}

/// Installs the global subscriber. Calling it twice leaves the first
/// subscriber in place.
pub fn init() {
    let use_color = std::io::stderr().is_terminal();
    tracing_subscriber::fmt()
        .with_env_filter(filter_from_env())
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(use_color)
        .try_init()
        .ok();
}
