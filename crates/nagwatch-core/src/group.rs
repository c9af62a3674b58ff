//! Grouping key and flushed alert groups.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{Alert, AlertType};

/// Batching key for raised alerts.
///
/// `keys` are the sorted grouping-tag names, `values` the matching tag
/// values of the alert (`None` where the alert lacks the tag). An alert whose
/// grouping rules are unknown gets empty `keys` and `values`, so every such
/// alert of one alert id lands in a single group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKey {
    pub namespace: String,
    pub alert_id: u64,
    pub alert_type: AlertType,
    pub keys: Vec<String>,
    pub values: Vec<Option<String>>,
}

impl GroupKey {
    /// Key for `alert` grouped by `rule_keys` (sorted and deduplicated here).
    pub fn for_alert(alert: &Alert, rule_keys: &[String]) -> Self {
        let mut keys = rule_keys.to_vec();
        keys.sort();
        keys.dedup();
        let values = keys.iter().map(|k| alert.tags.get(k).cloned()).collect();
        Self {
            namespace: alert.namespace.clone(),
            alert_id: alert.alert_id,
            alert_type: alert.alert_type,
            keys,
            values,
        }
    }

    /// Fallback key used when grouping rules are unavailable.
    pub fn ungrouped(alert: &Alert) -> Self {
        Self::for_alert(alert, &[])
    }

    pub fn is_ungrouped(&self) -> bool {
        self.keys.is_empty()
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}[", self.namespace, self.alert_id, self.alert_type)?;
        for (i, (k, v)) in self.keys.iter().zip(&self.values).enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            match v {
                Some(v) => write!(f, "{k}={v}")?,
                None => write!(f, "{k}=<none>")?,
            }
        }
        f.write_str("]")
    }
}

/// Alerts accumulated for one key between two flushes, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertGroup {
    key: GroupKey,
    alerts: Vec<Alert>,
}

impl AlertGroup {
    pub fn new(key: GroupKey, alerts: Vec<Alert>) -> Self {
        Self { key, alerts }
    }

    pub fn key(&self) -> &GroupKey {
        &self.key
    }

    pub fn alerts(&self) -> &[Alert] {
        &self.alerts
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AlertState, StateId, TagMap};

    fn alert(tags: &[(&str, &str)]) -> Alert {
        Alert {
            namespace: "prod".to_string(),
            alert_id: 7,
            alert_type: AlertType::Metric,
            state_id: StateId(1),
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
    fn keys_are_sorted_and_values_follow() {
        let a = alert(&[("host", "A"), ("dc", "east")]);
        let key = GroupKey::for_alert(&a, &["host".to_string(), "dc".to_string()]);
        assert_eq!(key.keys, vec!["dc", "host"]);
        assert_eq!(
            key.values,
            vec![Some("east".to_string()), Some("A".to_string())]
        );
    }

    #[test]
    fn absent_tag_yields_none_value() {
        let a = alert(&[("dc", "east")]);
        let key = GroupKey::for_alert(&a, &["host".to_string()]);
        assert_eq!(key.values, vec![None]);
        assert_eq!(key.to_string(), "prod/7/metric[host=<none>]");
    }

    #[test]
    fn ungrouped_key_ignores_tags() {
        let a = GroupKey::ungrouped(&alert(&[("host", "A")]));
        let b = GroupKey::ungrouped(&alert(&[("host", "B")]));
        assert_eq!(a, b);
        assert!(a.is_ungrouped());
    }

    #[test]
    fn display_lists_pairs() {
        let key = GroupKey::for_alert(
            &alert(&[("host", "A"), ("dc", "east")]),
            &["host".to_string(), "dc".to_string()],
        );
        assert_eq!(key.to_string(), "prod/7/metric[dc=east,host=A]");
    }
}
