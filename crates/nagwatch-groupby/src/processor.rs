//! Scheduled flush of the group-by buffer into [`AlertGroup`]s.
//!
//! Flushes land on wall-clock boundaries of the flush frequency (a 60s
//! frequency flushes on the minute), independent of process start time.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use nagwatch_core::{Alert, AlertGroup, GroupKey};

use crate::error::GroupByError;
use crate::sink::AlertSink;
use crate::state::GroupByState;

// ─── Config ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorConfig {
    flush_frequency: Duration,
}

impl ProcessorConfig {
    pub fn new(flush_frequency: Duration) -> Result<Self, GroupByError> {
        if flush_frequency.as_millis() == 0 {
            return Err(GroupByError::ZeroFlushFrequency);
        }
        Ok(Self { flush_frequency })
    }

    pub fn from_millis(flush_frequency_ms: u64) -> Result<Self, GroupByError> {
        Self::new(Duration::from_millis(flush_frequency_ms))
    }

    pub fn flush_frequency(&self) -> Duration {
        self.flush_frequency
    }
}

/// Delay until the next multiple of `frequency_ms` after `now_ms`.
///
/// Exactly on a boundary the full frequency is returned, so a flush never
/// fires immediately at startup.
pub fn initial_delay(now_ms: u64, frequency_ms: u64) -> Duration {
    Duration::from_millis(frequency_ms - now_ms % frequency_ms)
}

// ─── Flush Report ────────────────────────────────────────────────

/// Outcome of one flush cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub groups: usize,
    pub alerts: usize,
    pub failed_groups: usize,
}

// ─── Processor ───────────────────────────────────────────────────

pub struct GroupByProcessor<S> {
    config: ProcessorConfig,
    state: GroupByState<GroupKey, Alert>,
    sink: S,
    started: AtomicBool,
    submit_failures: AtomicU64,
}

impl<S: AlertSink> GroupByProcessor<S> {
    pub fn new(config: ProcessorConfig, sink: S) -> Self {
        Self {
            config,
            state: GroupByState::new(),
            sink,
            started: AtomicBool::new(false),
            submit_failures: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Ingestion entry point. Safe to call from any number of tasks.
    pub fn process(&self, (key, alert): (GroupKey, Alert)) -> usize {
        let size = self.state.add(key, alert);
        metrics::gauge!("nagwatch_groupby_buffered_alerts").set(size as f64);
        size
    }

    /// Approximate number of buffered alerts.
    pub fn buffered(&self) -> usize {
        self.state.len()
    }

    /// Groups that failed to submit since creation.
    pub fn submit_failures(&self) -> u64 {
        self.submit_failures.load(Ordering::Relaxed)
    }

    /// Flush the buffer and submit every group independently.
    ///
    /// A failing group (sink error or panic) is logged and counted; the
    /// remaining groups of the same flush are still submitted.
    pub fn flush_state(&self) -> FlushReport {
        let snapshot = self.state.flush();
        metrics::gauge!("nagwatch_groupby_buffered_alerts").set(0.0);

        let mut report = FlushReport::default();
        for (key, alerts) in snapshot {
            report.groups += 1;
            report.alerts += alerts.len();

            let summary = FailureContext::capture(&key, &alerts);
            let group = AlertGroup::new(key, alerts);
            let outcome = catch_unwind(AssertUnwindSafe(|| self.sink.submit(group)));

            let error = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(panic) => panic_message(panic.as_ref()),
            };
            report.failed_groups += 1;
            self.submit_failures.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("nagwatch_groupby_submit_failures_total").increment(1);
            tracing::error!(
                group = %summary.key,
                alerts = ?summary.alerts,
                error = %error,
                "failed to submit alert group"
            );
        }

        if report.groups > 0 {
            metrics::counter!("nagwatch_groupby_groups_flushed_total")
                .increment(report.groups as u64);
            tracing::debug!(
                groups = report.groups,
                alerts = report.alerts,
                failed = report.failed_groups,
                "flushed alert groups"
            );
        }
        report
    }

    /// Start the flush schedule on the current tokio runtime.
    pub fn start(self: &Arc<Self>) -> Result<ProcessorHandle, GroupByError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(GroupByError::AlreadyStarted);
        }
        let token = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(self).run_schedule(token.clone()));
        tracing::info!(
            flush_frequency_ms = self.config.flush_frequency.as_millis() as u64,
            "group-by processor started"
        );
        Ok(ProcessorHandle { token, task })
    }

    async fn run_schedule(self: Arc<Self>, token: CancellationToken) {
        let frequency = self.config.flush_frequency;
        let now_ms = Utc::now().timestamp_millis().max(0) as u64;
        let delay = initial_delay(now_ms, frequency.as_millis() as u64);

        tokio::select! {
            () = token.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }

        let mut ticker = tokio::time::interval(frequency);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let processor = Arc::clone(&self);
            if let Err(e) = tokio::task::spawn_blocking(move || processor.flush_state()).await {
                tracing::error!("flush task failed: {e}");
            }
        }
        tracing::info!("group-by processor stopped");
    }
}

// ─── Handle ──────────────────────────────────────────────────────

/// Handle to a running flush schedule.
pub struct ProcessorHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl ProcessorHandle {
    /// Stop scheduling immediately. A flush already in progress may or may
    /// not complete.
    pub fn stop(self) {
        self.token.cancel();
        self.task.abort();
    }

    /// Stop scheduling and wait up to `timeout` for an in-progress flush.
    ///
    /// Returns `true` if the schedule wound down within the timeout. Group
    /// submissions already underway are never interrupted.
    pub async fn stop_with_timeout(self, timeout: Duration) -> bool {
        self.token.cancel();
        tokio::time::timeout(timeout, self.task).await.is_ok()
    }
}

// ─── Failure Context ─────────────────────────────────────────────

struct FailureContext {
    key: String,
    alerts: Vec<String>,
}

impl FailureContext {
    fn capture(key: &GroupKey, alerts: &[Alert]) -> Self {
        Self {
            key: key.to_string(),
            alerts: alerts
                .iter()
                .map(|a| format!("{}:{}->{}", a.state_id, a.previous_state, a.state))
                .collect(),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("sink panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("sink panicked: {s}")
    } else {
        "sink panicked".to_string()
    }
}

// ─── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::SinkError;
    use std::sync::atomic::AtomicUsize;
    use nagwatch_core::{AlertState, AlertType, StateId, TagMap};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct CollectingSink {
        groups: Mutex<Vec<AlertGroup>>,
    }

    impl AlertSink for CollectingSink {
        fn submit(&self, group: AlertGroup) -> Result<(), SinkError> {
            self.groups.lock().push(group);
            Ok(())
        }
    }

    /// Fails every group whose key has the given host value.
    struct FailingSink {
        bad_host: &'static str,
        panic: bool,
        accepted: Mutex<Vec<AlertGroup>>,
    }

    impl AlertSink for FailingSink {
        fn submit(&self, group: AlertGroup) -> Result<(), SinkError> {
            if group.key().values == vec![Some(self.bad_host.to_string())] {
                if self.panic {
                    panic!("downstream exploded");
                }
                return Err(SinkError::Closed);
            }
            self.accepted.lock().push(group);
            Ok(())
        }
    }

    fn alert(host: Option<&str>, raised_at: i64) -> Alert {
        let mut tags = TagMap::new();
        if let Some(h) = host {
            tags.insert("host".to_string(), h.to_string());
        }
        Alert {
            namespace: "prod".to_string(),
            alert_id: 7,
            alert_type: AlertType::Metric,
            state_id: StateId(raised_at as u64),
            tags,
            state: AlertState::Bad,
            previous_state: AlertState::Good,
            is_nag: false,
            raised_at,
        }
    }

    fn keyed(host: Option<&str>, raised_at: i64) -> (GroupKey, Alert) {
        let a = alert(host, raised_at);
        (GroupKey::for_alert(&a, &["host".to_string()]), a)
    }

    fn config(ms: u64) -> ProcessorConfig {
        ProcessorConfig::from_millis(ms).expect("valid config")
    }

    #[test]
    fn zero_frequency_is_rejected() {
        assert!(matches!(
            ProcessorConfig::from_millis(0),
            Err(GroupByError::ZeroFlushFrequency)
        ));
    }

    #[test]
    fn initial_delay_aligns_to_boundary() {
        assert_eq!(initial_delay(125_000, 60_000), Duration::from_millis(55_000));
        assert_eq!(initial_delay(120_000, 60_000), Duration::from_millis(60_000));
        assert_eq!(initial_delay(120_001, 60_000), Duration::from_millis(59_999));
    }

    #[test]
    fn grouping_scenario_produces_three_groups() {
        let sink = Arc::new(CollectingSink::default());
        let processor = GroupByProcessor::new(config(60_000), Arc::clone(&sink));
        processor.process(keyed(Some("A"), 1));
        processor.process(keyed(Some("B"), 2));
        processor.process(keyed(Some("A"), 3));
        processor.process(keyed(None, 4));

        let report = processor.flush_state();
        assert_eq!(
            report,
            FlushReport {
                groups: 3,
                alerts: 4,
                failed_groups: 0
            }
        );

        let groups = sink.groups.lock();
        let host_a = groups
            .iter()
            .find(|g| g.key().values == vec![Some("A".to_string())])
            .expect("group A");
        let times: Vec<i64> = host_a.alerts().iter().map(|a| a.raised_at).collect();
        assert_eq!(times, vec![1, 3]);
        assert!(groups.iter().any(|g| g.key().values == vec![None]));
    }

    #[test]
    fn failed_group_does_not_block_siblings() {
        let sink = Arc::new(FailingSink {
            bad_host: "B",
            panic: false,
            accepted: Mutex::new(Vec::new()),
        });
        let processor = GroupByProcessor::new(config(60_000), Arc::clone(&sink));
        processor.process(keyed(Some("A"), 1));
        processor.process(keyed(Some("B"), 2));
        processor.process(keyed(Some("C"), 3));

        let report = processor.flush_state();
        assert_eq!(report.groups, 3);
        assert_eq!(report.failed_groups, 1);
        assert_eq!(sink.accepted.lock().len(), 2);
        assert_eq!(processor.submit_failures(), 1);

        // The failed group is not re-queued.
        assert_eq!(processor.flush_state(), FlushReport::default());
    }

    #[test]
    fn panicking_sink_is_isolated() {
        let sink = Arc::new(FailingSink {
            bad_host: "A",
            panic: true,
            accepted: Mutex::new(Vec::new()),
        });
        let processor = GroupByProcessor::new(config(60_000), Arc::clone(&sink));
        processor.process(keyed(Some("A"), 1));
        processor.process(keyed(Some("B"), 2));

        let report = processor.flush_state();
        assert_eq!(report.failed_groups, 1);
        assert_eq!(sink.accepted.lock().len(), 1);
    }

    #[test]
    fn flush_on_empty_buffer_submits_nothing() {
        let sink = Arc::new(CollectingSink::default());
        let processor = GroupByProcessor::new(config(1_000), Arc::clone(&sink));
        assert_eq!(processor.flush_state(), FlushReport::default());
        assert!(sink.groups.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_flushes_buffered_alerts() {
        let sink = Arc::new(CollectingSink::default());
        let processor = Arc::new(GroupByProcessor::new(config(1_000), Arc::clone(&sink)));
        let handle = processor.start().expect("start");

        processor.process(keyed(Some("A"), 1));
        // Aligned delay is at most one period, then the first tick fires.
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        for _ in 0..10 {
            if !sink.groups.lock().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(sink.groups.lock().len(), 1);
        assert_eq!(processor.buffered(), 0);

        assert!(handle.stop_with_timeout(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let processor = Arc::new(GroupByProcessor::new(
            config(60_000),
            Arc::new(CollectingSink::default()),
        ));
        let handle = processor.start().expect("first start");
        assert!(matches!(processor.start(), Err(GroupByError::AlreadyStarted)));
        handle.stop();
    }

    #[tokio::test]
    async fn stop_with_timeout_before_first_flush() {
        let sink = Arc::new(CollectingSink::default());
        let processor = Arc::new(GroupByProcessor::new(config(3_600_000), Arc::clone(&sink)));
        let handle = processor.start().expect("start");
        processor.process(keyed(Some("A"), 1));

        assert!(handle.stop_with_timeout(Duration::from_secs(1)).await);
        assert!(sink.groups.lock().is_empty());
        assert_eq!(processor.buffered(), 1);
    }

    /// Blocks inside `submit` long enough to stop mid-flush.
    #[derive(Default)]
    struct SlowSink {
        submitted: AtomicUsize,
    }

    impl AlertSink for SlowSink {
        fn submit(&self, _group: AlertGroup) -> Result<(), SinkError> {
            std::thread::sleep(Duration::from_millis(800));
            self.submitted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Start a 200ms schedule with one buffered alert and return once a
    /// flush has taken it, while the submission is still in progress.
    async fn start_mid_flush() -> (Arc<SlowSink>, ProcessorHandle) {
        let sink = Arc::new(SlowSink::default());
        let processor = Arc::new(GroupByProcessor::new(config(200), Arc::clone(&sink)));
        processor.process(keyed(Some("A"), 1));
        let handle = processor.start().expect("start");

        for _ in 0..200 {
            if processor.buffered() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(processor.buffered(), 0, "flush never started");
        assert_eq!(sink.submitted.load(Ordering::SeqCst), 0);
        (sink, handle)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_with_timeout_waits_for_in_flight_flush() {
        let (sink, handle) = start_mid_flush().await;

        assert!(handle.stop_with_timeout(Duration::from_secs(5)).await);
        assert_eq!(sink.submitted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_with_short_timeout_leaves_submission_running() {
        let (sink, handle) = start_mid_flush().await;

        assert!(!handle.stop_with_timeout(Duration::from_millis(100)).await);
        assert_eq!(sink.submitted.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(sink.submitted.load(Ordering::SeqCst), 1);
    }
}
