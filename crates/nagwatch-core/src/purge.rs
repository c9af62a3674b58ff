//! Purge policy: when stale entity state is discarded.

use crate::error::ConfigError;
use crate::store::StateStore;

/// Computes a cutoff and purges the store with it.
///
/// `first_run` is true for the first purge after process start, when the
/// store may hold a restored checkpoint whose entities have not reported yet.
pub trait PurgePolicy {
    fn cutoff(&self, now: i64, first_run: bool) -> i64;

    /// Returns the number of entities removed.
    fn purge<T>(&self, store: &mut StateStore<T>, now: i64, first_run: bool) -> usize {
        store.purge_state_by_time(self.cutoff(now, first_run))
    }
}

/// Fixed-window purge with a more liberal window on the first run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPurgePolicy {
    window_secs: u64,
    first_run_window_secs: u64,
}

impl WindowPurgePolicy {
    pub fn new(window_secs: u64, first_run_window_secs: u64) -> Result<Self, ConfigError> {
        if window_secs == 0 {
            return Err(ConfigError::ZeroPurgeWindow {
                name: "window_secs",
            });
        }
        if first_run_window_secs == 0 {
            return Err(ConfigError::ZeroPurgeWindow {
                name: "first_run_window_secs",
            });
        }
        if first_run_window_secs < window_secs {
            return Err(ConfigError::FirstRunWindowTooShort {
                first_run: first_run_window_secs,
                window: window_secs,
            });
        }
        Ok(Self {
            window_secs,
            first_run_window_secs,
        })
    }

    pub fn window_secs(&self) -> u64 {
        self.window_secs
    }

    pub fn first_run_window_secs(&self) -> u64 {
        self.first_run_window_secs
    }
}

impl PurgePolicy for WindowPurgePolicy {
    fn cutoff(&self, now: i64, first_run: bool) -> i64 {
        let window = if first_run {
            self.first_run_window_secs
        } else {
            self.window_secs
        };
        now.saturating_sub(window as i64)
    }
}
