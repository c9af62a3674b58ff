//! Downstream hand-off for flushed groups.

use std::sync::Arc;

use nagwatch_core::AlertGroup;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink queue is full")]
    Full,

    #[error("sink is closed")]
    Closed,

    #[error("sink io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sink encode error: {0}")]
    Encode(String),
}

/// Accepts one flushed group per call. Ownership of the group passes to the
/// sink; a failed group is not retried by the processor.
pub trait AlertSink: Send + Sync + 'static {
    fn submit(&self, group: AlertGroup) -> Result<(), SinkError>;
}

impl<S: AlertSink + ?Sized> AlertSink for Arc<S> {
    fn submit(&self, group: AlertGroup) -> Result<(), SinkError> {
        (**self).submit(group)
    }
}

impl<S: AlertSink + ?Sized> AlertSink for Box<S> {
    fn submit(&self, group: AlertGroup) -> Result<(), SinkError> {
        (**self).submit(group)
    }
}
