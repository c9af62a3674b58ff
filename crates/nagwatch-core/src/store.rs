//! Per-entity alert state store.
//!
//! Holds current/previous severity, nag timer, last-seen time and optional
//! identity tags for every entity of one alert definition, and decides per
//! evaluation whether an entity should raise a notification.
//!
//! A [`StateStore`] is owned by exactly one evaluation worker. It is `Send`
//! so it can move to that worker, but deliberately not `Sync`: sharing one
//! across threads requires an explicit wrapper such as `Mutex<StateStore>`.

use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

use crate::checkpoint::StateEntry;
use crate::error::ConfigError;
use crate::transition::{TransitionConfig, TransitionRules};
use crate::types::{AlertState, StateChange, StateId, TagMap, state_id};

// ─── Nag Interval ────────────────────────────────────────────────

/// Minimum spacing between repeat notifications for a sustained state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NagInterval {
    /// Never repeat after the initial transition raise.
    DoNotNag,
    /// Repeat at most once per `n` seconds.
    Every(u64),
}

impl NagInterval {
    /// `None` maps to [`NagInterval::DoNotNag`]; zero seconds is rejected.
    pub fn from_secs(secs: Option<u64>) -> Result<Self, ConfigError> {
        match secs {
            None => Ok(Self::DoNotNag),
            Some(0) => Err(ConfigError::ZeroNagInterval),
            Some(n) => Ok(Self::Every(n)),
        }
    }

    fn is_due(self, now: i64, nag_timestamp: i64) -> bool {
        match self {
            Self::DoNotNag => false,
            Self::Every(secs) => now.saturating_sub(nag_timestamp) > secs as i64,
        }
    }
}

/// Per-alert store settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    pub nag_interval: NagInterval,
    /// Keep each entity's tags so it can be described after it goes missing.
    pub preserve_identity: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            nag_interval: NagInterval::DoNotNag,
            preserve_identity: false,
        }
    }
}

// ─── Entity State ────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct EntityState {
    current: AlertState,
    previous: AlertState,
    /// 0 means never nagged or reset.
    nag_timestamp: i64,
    last_seen: Option<i64>,
    tags: Option<TagMap>,
}

impl EntityState {
    fn to_entry(&self, id: StateId) -> StateEntry {
        StateEntry {
            state_id: id,
            tags: self.tags.clone(),
            current_state: Some(self.current),
            previous_state: Some(self.previous),
            last_seen: self.last_seen,
            nag_timestamp: Some(self.nag_timestamp),
        }
    }
}

// ─── State Store ─────────────────────────────────────────────────

pub struct StateStore<T = TransitionRules> {
    config: StoreConfig,
    transitions: T,
    entities: HashMap<StateId, EntityState>,
    raised_this_run: HashSet<StateId>,
    _not_sync: PhantomData<Cell<()>>,
}

impl<T: TransitionConfig> StateStore<T> {
    pub fn new(config: StoreConfig, transitions: T) -> Self {
        Self {
            config,
            transitions,
            entities: HashMap::new(),
            raised_this_run: HashSet::new(),
            _not_sync: PhantomData,
        }
    }

    /// Start a new evaluation cycle. Must be called once per cycle before
    /// any `raise_alert` call.
    pub fn new_run(&mut self) {
        self.raised_this_run.clear();
    }

    /// Decide whether the entity `(namespace, alert_id, tags)` observed in
    /// `new_state` at `now` should raise a notification.
    pub fn raise_alert(
        &mut self,
        namespace: &str,
        alert_id: u64,
        tags: &TagMap,
        new_state: AlertState,
        now: i64,
    ) -> StateChange {
        self.raise_alert_by_id(state_id(namespace, alert_id, tags), new_state, now)
    }

    /// Same as [`Self::raise_alert`] for an already-derived identity.
    ///
    /// Used for entities that no longer send data (missing detection).
    pub fn raise_alert_by_id(&mut self, id: StateId, new_state: AlertState, now: i64) -> StateChange {
        if !self.raised_this_run.insert(id) {
            let current = self.current_state(id);
            return StateChange::silent(current, new_state);
        }

        let nag_interval = self.config.nag_interval;
        let entity = self.entities.entry(id).or_default();
        let old_state = entity.current;

        if new_state != old_state {
            entity.nag_timestamp = 0;
            entity.previous = old_state;
            entity.current = new_state;

            if !self.transitions.raise_alert(old_state, new_state) {
                return StateChange::silent(old_state, new_state);
            }
            entity.nag_timestamp = now;
            return StateChange {
                previous_state: old_state,
                new_state,
                is_nag: false,
                should_raise: true,
            };
        }

        let origin_state = entity.previous;

        if new_state.is_healthy() {
            entity.nag_timestamp = 0;
            return StateChange::silent(origin_state, new_state);
        }

        if self.transitions.raise_alert(origin_state, new_state)
            && nag_interval.is_due(now, entity.nag_timestamp)
        {
            entity.nag_timestamp = now;
            return StateChange {
                previous_state: origin_state,
                new_state,
                is_nag: true,
                should_raise: true,
            };
        }

        StateChange::silent(origin_state, new_state)
    }

    /// Record a data point seen at `seen` for the entity.
    ///
    /// Last-seen only moves forward. Identity tags are stored once, and only
    /// when identity preservation is enabled.
    pub fn update_data_point(
        &mut self,
        namespace: &str,
        alert_id: u64,
        tags: &TagMap,
        seen: i64,
    ) -> StateId {
        let id = state_id(namespace, alert_id, tags);
        let preserve = self.config.preserve_identity;
        let entity = self.entities.entry(id).or_default();

        if entity.last_seen.is_none_or(|last| seen > last) {
            entity.last_seen = Some(seen);
        }
        if preserve && entity.tags.is_none() {
            entity.tags = Some(tags.clone());
        }
        id
    }
}

impl<T> StateStore<T> {
    /// Epoch seconds of the newest data point, `None` if never seen.
    pub fn last_seen_time(&self, id: StateId) -> Option<i64> {
        self.entities.get(&id).and_then(|e| e.last_seen)
    }

    /// Identities of every stored entity.
    pub fn stored_ids(&self) -> impl Iterator<Item = StateId> + '_ {
        self.entities.keys().copied()
    }

    pub fn current_state(&self, id: StateId) -> AlertState {
        self.entities.get(&id).map(|e| e.current).unwrap_or_default()
    }

    pub fn previous_state(&self, id: StateId) -> AlertState {
        self.entities.get(&id).map(|e| e.previous).unwrap_or_default()
    }

    pub fn nag_timestamp(&self, id: StateId) -> i64 {
        self.entities.get(&id).map_or(0, |e| e.nag_timestamp)
    }

    pub fn tags(&self, id: StateId) -> Option<&TagMap> {
        self.entities.get(&id).and_then(|e| e.tags.as_ref())
    }

    pub fn contains(&self, id: StateId) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Remove every entity whose last-seen time is older than `cutoff`.
    ///
    /// Entities that were never seen carry no timestamp and are kept.
    /// Returns the number removed.
    pub fn purge_state_by_time(&mut self, cutoff: i64) -> usize {
        let before = self.entities.len();
        self.entities
            .retain(|_, e| e.last_seen.is_none_or(|seen| seen >= cutoff));
        let removed = before - self.entities.len();
        if removed > 0 {
            let entities = &self.entities;
            self.raised_this_run.retain(|id| entities.contains_key(id));
        }
        removed
    }

    /// Point-in-time snapshot of every entity, ordered by identity.
    pub fn entries(&self) -> Vec<StateEntry> {
        let mut entries: Vec<StateEntry> = self
            .entities
            .iter()
            .map(|(id, e)| e.to_entry(*id))
            .collect();
        entries.sort_by_key(|e| e.state_id);
        entries
    }

    /// Apply one persisted record. Absent fields leave the stored value as is.
    pub fn put(&mut self, entry: StateEntry) {
        let entity = self.entities.entry(entry.state_id).or_default();
        if let Some(tags) = entry.tags {
            entity.tags = Some(tags);
        }
        if let Some(current) = entry.current_state {
            entity.current = current;
        }
        if let Some(previous) = entry.previous_state {
            entity.previous = previous;
        }
        if let Some(seen) = entry.last_seen {
            entity.last_seen = Some(seen);
        }
        if let Some(nag) = entry.nag_timestamp {
            entity.nag_timestamp = nag;
        }
    }

    /// Restore from a full snapshot.
    pub fn restore(&mut self, entries: impl IntoIterator<Item = StateEntry>) {
        for entry in entries {
            self.put(entry);
        }
    }
}

impl<T: Clone> StateStore<T> {
    /// Independent copy of the store. The per-run marker is not carried over.
    pub fn copy(&self) -> Self {
        Self {
            config: self.config,
            transitions: self.transitions.clone(),
            entities: self.entities.clone(),
            raised_this_run: HashSet::new(),
            _not_sync: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for StateStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("config", &self.config)
            .field("entities", &self.entities.len())
            .field("raised_this_run", &self.raised_this_run.len())
            .finish()
    }
}

// ─── Tests ───────────────────────────────────────────────────────
