//! Persisted state-entry records.
//!
//! A checkpoint is a sequence of [`StateEntry`] records. Every field except
//! `state_id` is optional; an absent field leaves the stored value untouched
//! on restore.

use serde::{Deserialize, Serialize};

use crate::types::{AlertState, StateId, TagMap};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateEntry {
    pub state_id: StateId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<TagMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_state: Option<AlertState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_state: Option<AlertState>,
    /// Epoch seconds of the newest data point.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<i64>,
    /// Epoch seconds of the last permitted notification; 0 means reset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nag_timestamp: Option<i64>,
}

impl StateEntry {
    /// A record that only names the entity; restoring it creates the entity
    /// with defaults and changes nothing else.
    pub fn bare(state_id: StateId) -> Self {
        Self {
            state_id,
            ..Self::default()
        }
    }
}
