//! nagwatch-core: per-entity alert state machine, nag gating, missing-data
//! detection and time-based purge.
//!
//! Pure library with no IO or async dependencies. Every time-dependent
//! operation takes `now` as epoch seconds.

pub mod checkpoint;
pub mod error;
pub mod group;
pub mod missing;
pub mod purge;
pub mod store;
pub mod transition;
pub mod types;

pub use error::ConfigError;
pub use group::{AlertGroup, GroupKey};
pub use missing::{MissingDataDetector, MissingEntity};
pub use purge::{PurgePolicy, WindowPurgePolicy};
pub use store::{NagInterval, StateStore, StoreConfig};
pub use transition::{TransitionConfig, TransitionRules};
pub use types::{Alert, AlertState, AlertType, StateChange, StateId, TagMap, state_id};
