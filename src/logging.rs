//! Logging configuration for sqleval.
//!
//! Diagnostics go to stderr through `tracing`; stdout is reserved for the
//! per-case progress lines and reports.

use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is not set.
const DEFAULT_FILTER: &str = "info,sqlx=warn";

/// Initializes logging to stderr.
///
/// `verbose` raises the default level to `debug` for this crate.
pub fn init_stderr_logging(verbose: bool) {
    let default = if verbose {
        "info,sqleval=debug,sqlx=warn"
    } else {
        DEFAULT_FILTER
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}
