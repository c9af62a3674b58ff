//! nagwatch-groupby: batches raised alerts into per-key groups and flushes
//! them downstream on a wall-clock aligned schedule.
//!
//! Producers call [`GroupByProcessor::process`] from any number of tasks;
//! a single scheduled task flushes the buffer and hands each
//! [`AlertGroup`](nagwatch_core::AlertGroup) to an [`AlertSink`].

pub mod error;
pub mod keygen;
pub mod processor;
pub mod sink;
pub mod state;

pub use error::GroupByError;
pub use keygen::{GroupKeyGenerator, MetadataProvider, StaticMetadata};
pub use processor::{FlushReport, GroupByProcessor, ProcessorConfig, ProcessorHandle};
pub use sink::{AlertSink, SinkError};
pub use state::GroupByState;
