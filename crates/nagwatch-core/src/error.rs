//! Error types for invalid configuration.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("nag interval must be positive (use DoNotNag to disable repeats)")]
    ZeroNagInterval,

    #[error("purge window must be positive: {name}")]
    ZeroPurgeWindow { name: &'static str },

    #[error("first-run purge window ({first_run}s) is shorter than the periodic window ({window}s)")]
    FirstRunWindowTooShort { first_run: u64, window: u64 },

    #[error("allowed staleness must be positive")]
    ZeroStaleness,

    #[error("unknown alert state: {0}")]
    UnknownState(String),
}
