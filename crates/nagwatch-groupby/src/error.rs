//! Error types for the group-by pipeline.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GroupByError {
    #[error("flush frequency must be positive")]
    ZeroFlushFrequency,

    #[error("group-by processor already started")]
    AlreadyStarted,
}
