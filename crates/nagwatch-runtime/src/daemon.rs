//! Long-running pipeline: ingest, evaluate, group, flush, checkpoint.
//!
//! A single coordinator task owns every [`AlertEvaluator`], so each state
//! store is only ever touched from one task. Raised alerts cross into the
//! shared group-by processor, whose own schedule flushes them downstream.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};

use nagwatch_core::WindowPurgePolicy;
use nagwatch_groupby::{
    AlertSink, FlushReport, GroupByProcessor, GroupKeyGenerator, StaticMetadata,
};

use crate::checkpoint::{self, Checkpoint};
use crate::config::AppConfig;
use crate::emit::{EmitterPool, JsonLinesSink};
use crate::evaluator::AlertEvaluator;
use crate::ingest::{self, InputSource, Observation};

const OBSERVATION_QUEUE: usize = 4_096;

// ─── Pipeline ────────────────────────────────────────────────────

/// Summary of one evaluation pass over every alert.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleSummary {
    pub observed: usize,
    pub raised: usize,
    pub purged: usize,
}

pub struct Pipeline<S> {
    evaluators: BTreeMap<u64, AlertEvaluator>,
    keygen: GroupKeyGenerator<StaticMetadata>,
    processor: Arc<GroupByProcessor<S>>,
    purge: WindowPurgePolicy,
    dropped_observations: u64,
}

impl<S: AlertSink> Pipeline<S> {
    pub fn new(config: &AppConfig, sink: S) -> anyhow::Result<Self> {
        let evaluators = config
            .alerts
            .iter()
            .map(|def| Ok((def.id, AlertEvaluator::new(def)?)))
            .collect::<anyhow::Result<BTreeMap<_, _>>>()?;
        Ok(Self {
            evaluators,
            keygen: GroupKeyGenerator::new(config.metadata()),
            processor: Arc::new(GroupByProcessor::new(config.processor_config()?, sink)),
            purge: config.purge_policy()?,
            dropped_observations: 0,
        })
    }

    pub fn processor(&self) -> &Arc<GroupByProcessor<S>> {
        &self.processor
    }

    /// Route an observation to its alert. Observations for unconfigured
    /// alerts, or from a namespace other than the alert's, are dropped.
    pub fn observe(&mut self, observation: Observation) {
        let accepted = match self.evaluators.get_mut(&observation.alert_id) {
            Some(evaluator) => evaluator.observe(observation),
            None => {
                tracing::debug!(
                    alert_id = observation.alert_id,
                    "dropping observation for unconfigured alert"
                );
                false
            }
        };
        if !accepted {
            self.dropped_observations += 1;
        }
    }

    pub fn dropped_observations(&self) -> u64 {
        self.dropped_observations
    }

    /// Alerts routed to an ungrouped bucket for lack of grouping rules.
    pub fn stranded_alerts(&self) -> u64 {
        self.keygen.stranded_count()
    }

    /// Evaluate every alert at `now` and hand raised alerts to the processor.
    pub fn run_cycle(&mut self, now: i64) -> CycleSummary {
        let mut summary = CycleSummary::default();
        for evaluator in self.evaluators.values_mut() {
            let outcome = evaluator.run_cycle(now, &self.purge);
            summary.observed += outcome.observed;
            summary.purged += outcome.purged;
            summary.raised += outcome.alerts.len();
            for alert in outcome.alerts {
                self.processor.process(self.keygen.process(alert));
            }
        }
        summary
    }

    pub fn checkpoint(&self, taken_at: i64) -> Checkpoint {
        let mut checkpoint = Checkpoint::new(taken_at);
        for (id, evaluator) in &self.evaluators {
            checkpoint.alerts.insert(*id, evaluator.entries());
        }
        checkpoint
    }

    /// Restore every alert present in both the checkpoint and the config.
    /// Returns the number of entities restored.
    pub fn restore(&mut self, checkpoint: Checkpoint) -> usize {
        let mut restored = 0;
        for (id, entries) in checkpoint.alerts {
            match self.evaluators.get_mut(&id) {
                Some(evaluator) => {
                    restored += entries.len();
                    evaluator.restore(entries);
                }
                None => tracing::info!(
                    alert_id = id,
                    entities = entries.len(),
                    "ignoring checkpointed alert that is no longer configured"
                ),
            }
        }
        restored
    }
}

// ─── Daemon ──────────────────────────────────────────────────────

pub struct RunOptions {
    pub config: AppConfig,
    pub input: InputSource,
    pub checkpoint: Option<PathBuf>,
}

/// Run until a shutdown signal or the end of input.
pub async fn run_daemon(opts: RunOptions) -> anyhow::Result<()> {
    let RunOptions {
        config,
        input,
        checkpoint: checkpoint_path,
    } = opts;

    let (sink, emitters) = EmitterPool::spawn(
        config.emitter.workers,
        config.emitter.queue_capacity,
        JsonLinesSink::stdout(),
    );
    let mut pipeline = Pipeline::new(&config, sink)?;

    if let Some(path) = &checkpoint_path {
        match load_checkpoint(path).await? {
            Some(checkpoint) => {
                let taken_at = checkpoint.taken_at;
                let restored = pipeline.restore(checkpoint);
                tracing::info!(path = %path.display(), taken_at, restored, "restored checkpoint");
            }
            None => tracing::info!(path = %path.display(), "no checkpoint, cold start"),
        }
    }

    let handle = pipeline.processor().start()?;

    let (obs_tx, mut obs_rx) = mpsc::channel(OBSERVATION_QUEUE);
    let ingest_task = tokio::spawn(async move {
        match ingest::read_source(input, obs_tx).await {
            Ok(skipped) => tracing::info!(skipped, "input finished"),
            Err(e) => tracing::error!("input failed: {e:#}"),
        }
    });

    let period = Duration::from_secs(config.evaluation.interval_secs);
    let mut cycles = interval_at(Instant::now() + period, period);
    cycles.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut checkpoints = match (&checkpoint_path, config.checkpoint.interval_secs) {
        (Some(_), Some(secs)) => {
            let every = Duration::from_secs(secs);
            let mut ticker = interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            Some(ticker)
        }
        _ => None,
    };

    tracing::info!(
        alerts = config.alerts.len(),
        evaluation_interval_secs = config.evaluation.interval_secs,
        flush_frequency_ms = pipeline.processor().config().flush_frequency().as_millis() as u64,
        purge_window_secs = pipeline.purge.window_secs(),
        first_run_purge_window_secs = pipeline.purge.first_run_window_secs(),
        "nagwatch running"
    );

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => break,
            next = obs_rx.recv() => match next {
                Some(observation) => pipeline.observe(observation),
                None => {
                    tracing::info!("input closed, shutting down");
                    break;
                }
            },
            _ = cycles.tick() => {
                let summary = pipeline.run_cycle(Utc::now().timestamp());
                tracing::debug!(
                    observed = summary.observed,
                    raised = summary.raised,
                    purged = summary.purged,
                    "cycle complete"
                );
            }
            () = tick_optional(&mut checkpoints) => {
                if let Some(path) = &checkpoint_path {
                    let checkpoint = pipeline.checkpoint(Utc::now().timestamp());
                    if let Err(e) = save_checkpoint(path, checkpoint).await {
                        tracing::warn!("periodic checkpoint failed: {e:#}");
                    }
                }
            }
        }
    }

    ingest_task.abort();
    // Observations already queued still belong to the final cycle.
    while let Ok(observation) = obs_rx.try_recv() {
        pipeline.observe(observation);
    }
    let summary = pipeline.run_cycle(Utc::now().timestamp());
    tracing::debug!(
        raised = summary.raised,
        dropped_observations = pipeline.dropped_observations(),
        "final cycle complete"
    );

    let grace = Duration::from_secs(config.groupby.stop_timeout_secs);
    if !handle.stop_with_timeout(grace).await {
        tracing::warn!(
            timeout_secs = grace.as_secs(),
            "group-by processor did not stop in time"
        );
    }
    let report = final_flush(Arc::clone(pipeline.processor())).await?;
    tracing::info!(
        groups = report.groups,
        alerts = report.alerts,
        failed = report.failed_groups,
        submit_failures_total = pipeline.processor().submit_failures(),
        stranded_alerts_total = pipeline.stranded_alerts(),
        "final flush complete"
    );

    if let Some(path) = &checkpoint_path {
        let checkpoint = pipeline.checkpoint(Utc::now().timestamp());
        let entities = checkpoint.entity_count();
        save_checkpoint(path, checkpoint).await?;
        tracing::info!(path = %path.display(), entities, "checkpoint written");
    }

    // Dropping the pipeline drops the last channel sink, letting emitters drain.
    drop(pipeline);
    match emitters.join(grace).await {
        Some(emitted) => tracing::debug!(emitted, "emitters drained"),
        None => tracing::warn!("emitters did not drain in time"),
    }

    tracing::info!("nagwatch stopped");
    Ok(())
}

async fn final_flush<S: AlertSink>(
    processor: Arc<GroupByProcessor<S>>,
) -> anyhow::Result<FlushReport> {
    tokio::task::spawn_blocking(move || processor.flush_state())
        .await
        .context("final flush task failed")
}

async fn load_checkpoint(path: &Path) -> anyhow::Result<Option<Checkpoint>> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || checkpoint::load(&path)).await?
}

async fn save_checkpoint(path: &Path, checkpoint: Checkpoint) -> anyhow::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || checkpoint::save(&path, &checkpoint)).await?
}

async fn tick_optional(ticker: &mut Option<Interval>) {
    match ticker {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Resolves on ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
                    _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                tracing::warn!("failed to register SIGTERM handler: {e}");
                ctrl_c.await.ok();
                tracing::info!("received ctrl-c, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        tracing::info!("received ctrl-c, shutting down");
    }
}
