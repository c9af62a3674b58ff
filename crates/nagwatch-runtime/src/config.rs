//! TOML configuration: alert definitions plus pipeline settings.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use serde::Deserialize;

use nagwatch_core::{
    AlertType, MissingDataDetector, NagInterval, StoreConfig, TransitionRules, WindowPurgePolicy,
};
use nagwatch_groupby::{ProcessorConfig, StaticMetadata};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    #[serde(default)]
    pub groupby: GroupByConfig,
    #[serde(default)]
    pub purge: PurgeConfig,
    #[serde(default)]
    pub emitter: EmitterConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub alerts: Vec<AlertDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EvaluationConfig {
    /// Seconds between evaluation cycles.
    pub interval_secs: u64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GroupByConfig {
    pub flush_frequency_ms: u64,
    /// Grace period for an in-flight flush at shutdown.
    pub stop_timeout_secs: u64,
}

impl Default for GroupByConfig {
    fn default() -> Self {
        Self {
            flush_frequency_ms: 60_000,
            stop_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PurgeConfig {
    pub window_secs: u64,
    pub first_run_window_secs: u64,
}

impl Default for PurgeConfig {
    fn default() -> Self {
        Self {
            window_secs: 86_400,
            first_run_window_secs: 7 * 86_400,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EmitterConfig {
    pub workers: usize,
    pub queue_capacity: usize,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 1_024,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CheckpointConfig {
    pub path: Option<PathBuf>,
    /// Seconds between periodic checkpoints; `None` writes only at shutdown.
    pub interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetricsConfig {
    /// Serve Prometheus metrics on this address; absent disables the exporter.
    pub listen: Option<SocketAddr>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AlertDefinition {
    pub id: u64,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default, rename = "type")]
    pub alert_type: AlertType,
    /// Seconds between repeat notifications; absent disables nagging.
    #[serde(default)]
    pub nag_interval_secs: Option<u64>,
    #[serde(default)]
    pub preserve_identity: bool,
    /// Raise `missing` when an entity is silent for this long.
    #[serde(default)]
    pub missing_after_secs: Option<u64>,
    /// Tag keys to group notifications by; absent means ungrouped.
    #[serde(default)]
    pub group_by: Option<Vec<String>>,
    #[serde(default)]
    pub transitions: TransitionRules,
}

fn default_namespace() -> String {
    "default".to_string()
}

impl AlertDefinition {
    pub fn store_config(&self) -> anyhow::Result<StoreConfig> {
        let nag_interval = NagInterval::from_secs(self.nag_interval_secs)
            .with_context(|| format!("alert {}", self.id))?;
        Ok(StoreConfig {
            nag_interval,
            preserve_identity: self.preserve_identity,
        })
    }

    pub fn missing_detector(&self) -> anyhow::Result<Option<MissingDataDetector>> {
        self.missing_after_secs
            .map(MissingDataDetector::new)
            .transpose()
            .with_context(|| format!("alert {}", self.id))
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self =
            toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Fail fast on anything the pipeline cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.evaluation.interval_secs == 0 {
            bail!("evaluation.interval_secs must be positive");
        }
        if self.emitter.workers == 0 {
            bail!("emitter.workers must be positive");
        }
        if self.emitter.queue_capacity == 0 {
            bail!("emitter.queue_capacity must be positive");
        }
        if self.checkpoint.interval_secs == Some(0) {
            bail!("checkpoint.interval_secs must be positive");
        }
        self.processor_config()?;
        self.purge_policy()?;

        let mut seen = HashSet::new();
        for alert in &self.alerts {
            if !seen.insert(alert.id) {
                bail!("duplicate alert id {}", alert.id);
            }
            alert.store_config()?;
            alert.missing_detector()?;
            if let Some(keys) = &alert.group_by
                && keys.iter().any(|k| k.trim().is_empty())
            {
                bail!("alert {}: group_by contains an empty tag key", alert.id);
            }
        }
        Ok(())
    }

    pub fn processor_config(&self) -> anyhow::Result<ProcessorConfig> {
        ProcessorConfig::from_millis(self.groupby.flush_frequency_ms).context("groupby")
    }

    pub fn purge_policy(&self) -> anyhow::Result<WindowPurgePolicy> {
        WindowPurgePolicy::new(self.purge.window_secs, self.purge.first_run_window_secs)
            .context("purge")
    }

    /// Grouping rules for every alert that declares them.
    pub fn metadata(&self) -> StaticMetadata {
        let mut metadata = StaticMetadata::new();
        for alert in &self.alerts {
            if let Some(keys) = &alert.group_by {
                metadata.insert(alert.id, keys.clone());
            }
        }
        metadata
    }
}
