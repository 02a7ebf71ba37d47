//! `tracing` subscriber setup.

use tracing_subscriber::{fmt, EnvFilter};

use crate::types::{BTreeError, Result};

/// Installs a global fmt subscriber filtered by `filter`.
///
/// Fails if the directive does not parse or a global subscriber is already set.
pub fn init_logging(filter: &str) -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_new(filter)
                .map_err(|e| BTreeError::Config(format!("invalid log filter: {e}")))?,
        )
        .with_target(true)
        .with_thread_ids(true)
        .try_init()
        .map_err(|_| BTreeError::Config("logging already initialized".into()))
}
