//! Structured logging setup.
//!
//! Logs go to stderr; stdout carries merged intervals only.

use crate::record::{MergeError, Result};
use tracing_subscriber::EnvFilter;

/// Default filter when neither `--log-level` nor `RUST_LOG` is given.
pub const DEFAULT_LOG_LEVEL: &str = "warn";

/// Build the filter: an explicit level wins over `RUST_LOG`.
pub fn filter(level: Option<&str>) -> Result<EnvFilter> {
    match level {
        Some(level) => EnvFilter::try_new(level)
            .map_err(|e| MergeError::InvalidConfig(format!("log level '{}': {}", level, e))),
        None => Ok(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL))),
    }
}

/// Install the global stderr subscriber.
pub fn init(level: Option<&str>) -> Result<()> {
    let filter = filter(level)?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| MergeError::InvalidConfig(format!("logging: {}", e)))
}

#[cfg(test)]
pub fn init_for_tests() {
    use std::sync::Once;

    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new("imerge=debug"))
            .with_test_writer()
            .try_init();
    });
}
