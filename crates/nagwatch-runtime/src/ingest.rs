//! NDJSON observation input.
//!
//! One JSON object per line. Blank lines are ignored; malformed lines are
//! logged and skipped so a single bad producer cannot stall the pipeline.

use std::path::PathBuf;

use anyhow::Context;
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use nagwatch_core::{AlertState, TagMap};

/// One data point for one entity.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Observation {
    /// Must match the alert definition's namespace when present. Absent
    /// means the alert's own namespace.
    #[serde(default)]
    pub namespace: Option<String>,
    pub alert_id: u64,
    #[serde(default)]
    pub tags: TagMap,
    pub state: AlertState,
    /// Epoch seconds at which the data point was produced.
    pub timestamp: i64,
}

pub fn parse_line(line: &str) -> Result<Observation, serde_json::Error> {
    serde_json::from_str(line)
}

/// Where observations come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    Stdin,
    File(PathBuf),
}

impl InputSource {
    pub fn from_arg(arg: Option<PathBuf>) -> Self {
        match arg {
            Some(path) if path.as_os_str() != "-" => Self::File(path),
            _ => Self::Stdin,
        }
    }
}

/// Read `source` to EOF, forwarding every parsed observation to `tx`.
///
/// Returns the number of lines skipped as malformed. Stops early when the
/// receiving side has gone away.
pub async fn read_source(source: InputSource, tx: mpsc::Sender<Observation>) -> anyhow::Result<u64> {
    match source {
        InputSource::Stdin => read_lines(BufReader::new(tokio::io::stdin()), tx).await,
        InputSource::File(path) => {
            let file = tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("opening input {}", path.display()))?;
            read_lines(BufReader::new(file), tx).await
        }
    }
}

async fn read_lines<R>(reader: R, tx: mpsc::Sender<Observation>) -> anyhow::Result<u64>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut line_no = 0u64;
    let mut skipped = 0u64;

    while let Some(line) = lines.next_line().await.context("reading input")? {
        line_no += 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match parse_line(trimmed) {
            Ok(observation) => {
                if tx.send(observation).await.is_err() {
                    tracing::debug!("observation receiver closed, stopping input");
                    break;
                }
            }
            Err(e) => {
                skipped += 1;
                tracing::warn!(line = line_no, "skipping malformed observation: {e}");
            }
        }
    }
    Ok(skipped)
}
