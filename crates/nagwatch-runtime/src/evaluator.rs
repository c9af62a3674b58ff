//! Per-alert evaluation cycle.
//!
//! Each configured alert owns one [`StateStore`]. Observations are buffered
//! between cycles; a cycle replays them against the store, runs missing-data
//! detection and the scheduled purge, and returns the alerts to notify.

use nagwatch_core::{
    Alert, AlertType, MissingDataDetector, PurgePolicy, StateStore, TagMap, TransitionRules,
    checkpoint::StateEntry,
};

use crate::config::AlertDefinition;
use crate::ingest::Observation;

/// Result of one evaluation cycle for one alert.
#[derive(Debug, Default)]
pub struct CycleOutcome {
    pub alerts: Vec<Alert>,
    pub observed: usize,
    pub missing: usize,
    pub purged: usize,
}

pub struct AlertEvaluator {
    alert_id: u64,
    namespace: String,
    alert_type: AlertType,
    store: StateStore<TransitionRules>,
    missing: Option<MissingDataDetector>,
    pending: Vec<Observation>,
    first_run: bool,
}

impl AlertEvaluator {
    pub fn new(definition: &AlertDefinition) -> anyhow::Result<Self> {
        Ok(Self {
            alert_id: definition.id,
            namespace: definition.namespace.clone(),
            alert_type: definition.alert_type,
            store: StateStore::new(definition.store_config()?, definition.transitions),
            missing: definition.missing_detector()?,
            pending: Vec::new(),
            first_run: true,
        })
    }

    /// Buffer an observation for the next cycle.
    ///
    /// An observation naming a namespace other than the alert's is refused:
    /// entity identity and group keys are always derived from the alert's
    /// own namespace. Returns whether the observation was accepted.
    pub fn observe(&mut self, observation: Observation) -> bool {
        if let Some(namespace) = &observation.namespace
            && *namespace != self.namespace
        {
            tracing::debug!(
                alert_id = self.alert_id,
                expected = %self.namespace,
                got = %namespace,
                "dropping observation from foreign namespace"
            );
            return false;
        }
        self.pending.push(observation);
        true
    }

    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    #[cfg(test)]
    pub fn store(&self) -> &StateStore<TransitionRules> {
        &self.store
    }

    /// Run one cycle at `now` (epoch seconds).
    ///
    /// Observations are applied newest first: a store raises each entity at
    /// most once per run, so the latest reported state is the one that
    /// decides the entity's transition. On equal timestamps the observation
    /// received last wins.
    pub fn run_cycle<P: PurgePolicy>(&mut self, now: i64, purge: &P) -> CycleOutcome {
        self.store.new_run();

        let mut batch = std::mem::take(&mut self.pending);
        batch.reverse();
        batch.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let mut outcome = CycleOutcome {
            observed: batch.len(),
            ..CycleOutcome::default()
        };

        for observation in batch {
            let id = self.store.update_data_point(
                &self.namespace,
                self.alert_id,
                &observation.tags,
                observation.timestamp,
            );
            let change = self.store.raise_alert(
                &self.namespace,
                self.alert_id,
                &observation.tags,
                observation.state,
                now,
            );
            if change.should_raise {
                outcome.alerts.push(Alert::from_change(
                    id,
                    &self.namespace,
                    self.alert_id,
                    self.alert_type,
                    observation.tags,
                    &change,
                    now,
                ));
            }
        }

        if let Some(detector) = &self.missing {
            for entity in detector.detect(&mut self.store, now) {
                outcome.missing += 1;
                tracing::debug!(
                    alert_id = self.alert_id,
                    state_id = %entity.state_id,
                    last_seen = entity.last_seen,
                    "entity stopped reporting"
                );
                outcome.alerts.push(Alert::from_change(
                    entity.state_id,
                    &self.namespace,
                    self.alert_id,
                    self.alert_type,
                    entity.tags.unwrap_or_else(TagMap::new),
                    &entity.change,
                    now,
                ));
            }
        }

        outcome.purged = purge.purge(&mut self.store, now, self.first_run);
        self.first_run = false;

        let alert_label = self.alert_id.to_string();
        if outcome.purged > 0 {
            metrics::counter!("nagwatch_state_purged_total", "alert_id" => alert_label.clone())
                .increment(outcome.purged as u64);
        }
        for alert in &outcome.alerts {
            metrics::counter!(
                "nagwatch_alerts_raised_total",
                "alert_id" => alert_label.clone(),
                "nag" => if alert.is_nag { "true" } else { "false" }
            )
            .increment(1);
        }

        tracing::debug!(
            alert_id = self.alert_id,
            observed = outcome.observed,
            raised = outcome.alerts.len(),
            missing = outcome.missing,
            purged = outcome.purged,
            entities = self.store.len(),
            "evaluation cycle complete"
        );
        outcome
    }

    pub fn entries(&self) -> Vec<StateEntry> {
        self.store.entries()
    }

    /// Restore checkpointed entities. The next cycle still counts as the
    /// first run for purge purposes.
    pub fn restore(&mut self, entries: impl IntoIterator<Item = StateEntry>) {
        self.store.restore(entries);
    }
}
