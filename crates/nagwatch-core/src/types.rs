use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::Xxh3;

use crate::error::ConfigError;

// ─── Alert State ──────────────────────────────────────────────────

/// Severity observed for an entity on one evaluation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    #[default]
    Good,
    Warn,
    Bad,
    Unknown,
    Missing,
}

impl AlertState {
    pub const ALL: [Self; 5] = [
        Self::Good,
        Self::Warn,
        Self::Bad,
        Self::Unknown,
        Self::Missing,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Good => "good",
            Self::Warn => "warn",
            Self::Bad => "bad",
            Self::Unknown => "unknown",
            Self::Missing => "missing",
        }
    }

    pub fn is_healthy(self) -> bool {
        self == Self::Good
    }
}

impl fmt::Display for AlertState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertState {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "good" | "ok" => Ok(Self::Good),
            "warn" | "warning" => Ok(Self::Warn),
            "bad" | "critical" => Ok(Self::Bad),
            "unknown" => Ok(Self::Unknown),
            "missing" => Ok(Self::Missing),
            _ => Err(ConfigError::UnknownState(s.to_string())),
        }
    }
}

// ─── Alert Type ───────────────────────────────────────────────────

/// Kind of alert definition an occurrence came from.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertType {
    #[default]
    Metric,
    Healthcheck,
}

impl AlertType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Metric => "metric",
            Self::Healthcheck => "healthcheck",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Entity Identity ──────────────────────────────────────────────

/// Sorted tag set identifying one time series.
pub type TagMap = BTreeMap<String, String>;

/// Stable 64-bit identity of an entity within an alert.
///
/// Collisions are possible and accepted: two colliding entities share one
/// state slot.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateId(pub u64);

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Derive the [`StateId`] for `(namespace, alert_id, tags)`.
///
/// Every field is length-prefixed before hashing so that adjacent strings
/// cannot shift bytes between each other. `TagMap` iterates in key order,
/// which makes the result independent of insertion order.
pub fn state_id(namespace: &str, alert_id: u64, tags: &TagMap) -> StateId {
    let mut hasher = Xxh3::new();
    write_field(&mut hasher, namespace.as_bytes());
    hasher.update(&alert_id.to_le_bytes());
    hasher.update(&(tags.len() as u64).to_le_bytes());
    for (key, value) in tags {
        write_field(&mut hasher, key.as_bytes());
        write_field(&mut hasher, value.as_bytes());
    }
    StateId(hasher.digest())
}

fn write_field(hasher: &mut Xxh3, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

// ─── State Change ─────────────────────────────────────────────────

/// Outcome of one `raise_alert` decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub previous_state: AlertState,
    pub new_state: AlertState,
    /// True only when this raise is a repeat notification for a sustained state.
    pub is_nag: bool,
    pub should_raise: bool,
}

impl StateChange {
    pub(crate) fn silent(previous_state: AlertState, new_state: AlertState) -> Self {
        Self {
            previous_state,
            new_state,
            is_nag: false,
            should_raise: false,
        }
    }
}

// ─── Alert ────────────────────────────────────────────────────────

/// A raised alert occurrence, ready for grouping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub namespace: String,
    pub alert_id: u64,
    pub alert_type: AlertType,
    pub state_id: StateId,
    pub tags: TagMap,
    pub state: AlertState,
    pub previous_state: AlertState,
    pub is_nag: bool,
    /// Epoch seconds of the evaluation that raised this alert.
    pub raised_at: i64,
}

impl Alert {
    /// Build an occurrence from a raising [`StateChange`].
    ///
    /// `state_id` is passed explicitly because a missing entity may no
    /// longer have the tags it was derived from.
    pub fn from_change(
        state_id: StateId,
        namespace: &str,
        alert_id: u64,
        alert_type: AlertType,
        tags: TagMap,
        change: &StateChange,
        raised_at: i64,
    ) -> Self {
        Self {
            namespace: namespace.to_string(),
            alert_id,
            alert_type,
            state_id,
            tags,
            state: change.new_state,
            previous_state: change.previous_state,
            is_nag: change.is_nag,
            raised_at,
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────
