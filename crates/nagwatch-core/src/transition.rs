//! Transition policy: which state changes may ever produce a notification.

use serde::{Deserialize, Serialize};

use crate::types::AlertState;

/// Decides whether moving from `old` to `new` is a notifying transition.
///
/// The state store also asks this with `(previous_state, current_state)` for
/// sustained states before it considers a nag.
pub trait TransitionConfig {
    fn raise_alert(&self, old: AlertState, new: AlertState) -> bool;
}

impl<F> TransitionConfig for F
where
    F: Fn(AlertState, AlertState) -> bool,
{
    fn raise_alert(&self, old: AlertState, new: AlertState) -> bool {
        self(old, new)
    }
}

/// Flat transition rules keyed on the destination state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransitionRules {
    /// Raise when an unhealthy entity returns to `Good`.
    pub notify_on_recovery: bool,
    pub notify_on_warn: bool,
    pub notify_on_missing: bool,
    pub notify_on_unknown: bool,
}

impl TransitionRules {
    /// Raise on every unhealthy destination, stay silent on recovery.
    pub fn unhealthy_only() -> Self {
        Self {
            notify_on_recovery: false,
            notify_on_warn: true,
            notify_on_missing: true,
            notify_on_unknown: true,
        }
    }

    /// [`Self::unhealthy_only`] plus recovery notifications.
    pub fn with_recovery() -> Self {
        Self {
            notify_on_recovery: true,
            ..Self::unhealthy_only()
        }
    }
}

impl Default for TransitionRules {
    fn default() -> Self {
        Self::unhealthy_only()
    }
}

impl TransitionConfig for TransitionRules {
    fn raise_alert(&self, old: AlertState, new: AlertState) -> bool {
        match new {
            AlertState::Good => self.notify_on_recovery && !old.is_healthy(),
            AlertState::Bad => true,
            AlertState::Warn => self.notify_on_warn,
            AlertState::Missing => self.notify_on_missing,
            AlertState::Unknown => self.notify_on_unknown,
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────
