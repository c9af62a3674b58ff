//! Downstream emitters for flushed alert groups.
//!
//! The processor submits into a [`ChannelSink`], which never blocks the
//! flush. A small pool of emitter tasks drains the channel into the final
//! sink (JSON lines on stdout by default).

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use nagwatch_core::AlertGroup;
use nagwatch_groupby::{AlertSink, SinkError};

// ─── JSON Lines ──────────────────────────────────────────────────

/// Writes each group as one JSON object per line.
pub struct JsonLinesSink<W> {
    out: Mutex<W>,
}

impl<W: Write + Send + 'static> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

impl JsonLinesSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send + 'static> AlertSink for JsonLinesSink<W> {
    fn submit(&self, group: AlertGroup) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(&group).map_err(|e| SinkError::Encode(e.to_string()))?;
        line.push(b'\n');
        let mut out = self.out.lock();
        out.write_all(&line)?;
        out.flush()?;
        Ok(())
    }
}

// ─── Channel ─────────────────────────────────────────────────────

/// Non-blocking hand-off into a bounded queue.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<AlertGroup>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<AlertGroup>) -> Self {
        Self { tx }
    }
}

impl AlertSink for ChannelSink {
    fn submit(&self, group: AlertGroup) -> Result<(), SinkError> {
        self.tx.try_send(group).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::Full,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

// ─── Emitter Pool ────────────────────────────────────────────────

/// Emitter tasks sharing one queue. They exit once every [`ChannelSink`]
/// feeding the queue has been dropped and the queue is drained.
pub struct EmitterPool {
    workers: Vec<JoinHandle<u64>>,
}

impl EmitterPool {
    /// Create the queue and spawn `workers` tasks forwarding into `downstream`.
    pub fn spawn<D>(workers: usize, capacity: usize, downstream: D) -> (ChannelSink, Self)
    where
        D: AlertSink,
    {
        let (tx, rx) = mpsc::channel(capacity);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let downstream = Arc::new(downstream);

        let workers = (0..workers)
            .map(|worker| {
                let rx = Arc::clone(&rx);
                let downstream = Arc::clone(&downstream);
                tokio::spawn(run_worker(worker, rx, downstream))
            })
            .collect();
        (ChannelSink::new(tx), Self { workers })
    }

    /// Wait up to `timeout` for every worker to drain and exit. Returns the
    /// number of groups emitted, or `None` on timeout.
    pub async fn join(self, timeout: Duration) -> Option<u64> {
        let all = async {
            let mut emitted = 0;
            for worker in self.workers {
                match worker.await {
                    Ok(n) => emitted += n,
                    Err(e) => tracing::error!("emitter task failed: {e}"),
                }
            }
            emitted
        };
        tokio::time::timeout(timeout, all).await.ok()
    }
}

async fn run_worker<D: AlertSink>(
    worker: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<AlertGroup>>>,
    downstream: Arc<D>,
) -> u64 {
    let mut emitted = 0;
    loop {
        let next = rx.lock().await.recv().await;
        let Some(group) = next else { break };

        let key = group.key().to_string();
        let sink = Arc::clone(&downstream);
        match tokio::task::spawn_blocking(move || sink.submit(group)).await {
            Ok(Ok(())) => emitted += 1,
            Ok(Err(e)) => tracing::error!(worker, group = %key, "emit failed: {e}"),
            Err(e) => tracing::error!(worker, group = %key, "emit task failed: {e}"),
        }
    }
    tracing::debug!(worker, emitted, "emitter stopped");
    emitted
}

#[cfg(test)]
mod tests {
    use super::*;
    use nagwatch_core::{Alert, AlertState, AlertType, GroupKey, StateId, TagMap};

    fn group(host: &str) -> AlertGroup {
        let alert = Alert {
            namespace: "prod".to_string(),
            alert_id: 7,
            alert_type: AlertType::Metric,
            state_id: StateId(1),
            tags: [("host".to_string(), host.to_string())].into_iter().collect::<TagMap>(),
            state: AlertState::Bad,
            previous_state: AlertState::Good,
            is_nag: false,
            raised_at: 100,
        };
        let key = GroupKey::for_alert(&alert, &["host".to_string()]);
        AlertGroup::new(key, vec![alert])
    }

    #[derive(Default)]
    struct Collect(Mutex<Vec<AlertGroup>>);

    impl AlertSink for Collect {
        fn submit(&self, group: AlertGroup) -> Result<(), SinkError> {
            self.0.lock().push(group);
            Ok(())
        }
    }

    #[test]
    fn json_lines_writes_one_line_per_group() {
        let sink = JsonLinesSink::new(Vec::new());
        sink.submit(group("A")).expect("submit A");
        sink.submit(group("B")).expect("submit B");

        let out = String::from_utf8(sink.into_inner()).expect("utf8");
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: AlertGroup = serde_json::from_str(lines[1]).expect("parse");
        assert_eq!(parsed, group("B"));
    }

    #[tokio::test]
    async fn channel_sink_reports_full_and_closed() {
        let (tx, rx) = mpsc::channel(1);
        let sink = ChannelSink::new(tx);
        sink.submit(group("A")).expect("first fits");
        assert!(matches!(sink.submit(group("B")), Err(SinkError::Full)));

        drop(rx);
        assert!(matches!(sink.submit(group("C")), Err(SinkError::Closed)));
    }

    #[tokio::test]
    async fn pool_drains_queue_and_exits_when_sinks_drop() {
        let downstream = Arc::new(Collect::default());
        let (sink, pool) = EmitterPool::spawn(3, 16, Arc::clone(&downstream));
        for host in ["A", "B", "C", "D"] {
            sink.submit(group(host)).expect("submit");
        }
        drop(sink);

        let emitted = pool.join(Duration::from_secs(5)).await;
        assert_eq!(emitted, Some(4));
        assert_eq!(downstream.0.lock().len(), 4);
    }
}
