//! Attaches a [`GroupKey`] to each raised alert.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use nagwatch_core::{Alert, GroupKey};

/// Source of per-alert grouping rules (tag keys to group by).
pub trait MetadataProvider: Send + Sync {
    fn grouping_rules(&self, alert_id: u64) -> Option<Vec<String>>;
}

/// In-memory rules, loaded from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticMetadata {
    rules: HashMap<u64, Vec<String>>,
}

impl StaticMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(mut self, alert_id: u64, keys: Vec<String>) -> Self {
        self.rules.insert(alert_id, keys);
        self
    }

    pub fn insert(&mut self, alert_id: u64, keys: Vec<String>) {
        self.rules.insert(alert_id, keys);
    }
}

impl MetadataProvider for StaticMetadata {
    fn grouping_rules(&self, alert_id: u64) -> Option<Vec<String>> {
        self.rules.get(&alert_id).cloned()
    }
}

pub struct GroupKeyGenerator<P> {
    provider: P,
    stranded: AtomicU64,
}

impl<P: MetadataProvider> GroupKeyGenerator<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            stranded: AtomicU64::new(0),
        }
    }

    /// Pair `alert` with its group key.
    ///
    /// Without grouping rules the alert goes to the ungrouped bucket of its
    /// alert id. It is never dropped.
    pub fn process(&self, alert: Alert) -> (GroupKey, Alert) {
        let key = match self.provider.grouping_rules(alert.alert_id) {
            Some(keys) => GroupKey::for_alert(&alert, &keys),
            None => {
                self.stranded.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(
                    "nagwatch_groupby_stranded_total",
                    "alert_id" => alert.alert_id.to_string()
                )
                .increment(1);
                tracing::debug!(
                    alert_id = alert.alert_id,
                    "no grouping rules, using ungrouped bucket"
                );
                GroupKey::ungrouped(&alert)
            }
        };
        (key, alert)
    }

    /// Alerts that fell back to the ungrouped bucket since creation.
    pub fn stranded_count(&self) -> u64 {
        self.stranded.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nagwatch_core::{AlertState, AlertType, StateId, TagMap};

    fn alert(alert_id: u64, tags: &[(&str, &str)]) -> Alert {
        Alert {
            namespace: "prod".to_string(),
            alert_id,
            alert_type: AlertType::Metric,
            state_id: StateId(alert_id),
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<TagMap>(),
            state: AlertState::Bad,
            previous_state: AlertState::Good,
            is_nag: false,
            raised_at: 0,
        }
    }

    #[test]
    fn groups_by_rule_tags() {
        let generator =
            GroupKeyGenerator::new(StaticMetadata::new().with_rules(7, vec!["host".into()]));
        let (a, _) = generator.process(alert(7, &[("host", "A"), ("dc", "east")]));
        let (b, _) = generator.process(alert(7, &[("host", "B"), ("dc", "east")]));
        let (a2, _) = generator.process(alert(7, &[("host", "A"), ("dc", "west")]));

        assert_ne!(a, b);
        assert_eq!(a, a2);
        assert_eq!(generator.stranded_count(), 0);
    }

    #[test]
    fn missing_tag_gets_its_own_group() {
        let generator =
            GroupKeyGenerator::new(StaticMetadata::new().with_rules(7, vec!["host".into()]));
        let (with_host, _) = generator.process(alert(7, &[("host", "A")]));
        let (without, _) = generator.process(alert(7, &[("dc", "east")]));

        assert_eq!(without.values, vec![None]);
        assert_ne!(with_host, without);
    }

    #[test]
    fn unknown_rules_fall_back_and_are_counted() {
        let generator = GroupKeyGenerator::new(StaticMetadata::new());
        let (a, alert_a) = generator.process(alert(9, &[("host", "A")]));
        let (b, _) = generator.process(alert(9, &[("host", "B")]));

        assert!(a.is_ungrouped());
        assert_eq!(a, b);
        assert_eq!(alert_a.tags.get("host").map(String::as_str), Some("A"));
        assert_eq!(generator.stranded_count(), 2);
    }
}
