//! Missing-data detection over the entities a store already knows.
//!
//! A missing entity sends no data, so its identity cannot be re-derived from
//! live input. Detection walks the stored identities instead and compares
//! each last-seen time against the allowed staleness.

use crate::error::ConfigError;
use crate::store::StateStore;
use crate::transition::TransitionConfig;
use crate::types::{AlertState, StateChange, StateId, TagMap};

/// An entity raised as missing in this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingEntity {
    pub state_id: StateId,
    /// Identity tags, when the alert preserves them.
    pub tags: Option<TagMap>,
    pub last_seen: i64,
    pub change: StateChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MissingDataDetector {
    allowed_staleness_secs: u64,
}

impl MissingDataDetector {
    pub fn new(allowed_staleness_secs: u64) -> Result<Self, ConfigError> {
        if allowed_staleness_secs == 0 {
            return Err(ConfigError::ZeroStaleness);
        }
        Ok(Self {
            allowed_staleness_secs,
        })
    }

    pub fn allowed_staleness_secs(&self) -> u64 {
        self.allowed_staleness_secs
    }

    /// Raise `Missing` for every stale entity and return the ones that
    /// should notify.
    ///
    /// Runs inside the current evaluation cycle, so an entity already raised
    /// this run from live data is not raised again. Never-seen entities are
    /// skipped.
    pub fn detect<T: TransitionConfig>(
        &self,
        store: &mut StateStore<T>,
        now: i64,
    ) -> Vec<MissingEntity> {
        let deadline = now.saturating_sub(self.allowed_staleness_secs as i64);

        let mut stale: Vec<(StateId, i64)> = store
            .stored_ids()
            .filter_map(|id| {
                store
                    .last_seen_time(id)
                    .filter(|seen| *seen < deadline)
                    .map(|seen| (id, seen))
            })
            .collect();
        stale.sort_unstable();

        stale
            .into_iter()
            .filter_map(|(id, last_seen)| {
                let change = store.raise_alert_by_id(id, AlertState::Missing, now);
                change.should_raise.then(|| MissingEntity {
                    state_id: id,
                    tags: store.tags(id).cloned(),
                    last_seen,
                    change,
                })
            })
            .collect()
    }
}
