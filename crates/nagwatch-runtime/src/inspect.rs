//! `nagwatch inspect`: summarize a checkpoint file.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use anyhow::bail;
use chrono::{TimeZone, Utc};
use serde::Serialize;

use nagwatch_core::AlertState;

use crate::checkpoint::{self, Checkpoint};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertSummary {
    pub alert_id: u64,
    pub entities: usize,
    /// Entity count per current state, entities without a state count as `good`.
    pub states: BTreeMap<AlertState, usize>,
    pub newest_seen: Option<i64>,
}

pub fn summarize(checkpoint: &Checkpoint) -> Vec<AlertSummary> {
    checkpoint
        .alerts
        .iter()
        .map(|(alert_id, entries)| {
            let mut states = BTreeMap::new();
            for entry in entries {
                *states.entry(entry.current_state.unwrap_or_default()).or_insert(0) += 1;
            }
            AlertSummary {
                alert_id: *alert_id,
                entities: entries.len(),
                states,
                newest_seen: entries.iter().filter_map(|e| e.last_seen).max(),
            }
        })
        .collect()
}

pub fn render_text(checkpoint: &Checkpoint, summaries: &[AlertSummary]) -> String {
    let mut out = String::new();
    let taken = Utc
        .timestamp_opt(checkpoint.taken_at, 0)
        .single()
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| checkpoint.taken_at.to_string());
    let _ = writeln!(
        out,
        "checkpoint v{} taken {taken}: {} alerts, {} entities",
        checkpoint.version,
        summaries.len(),
        checkpoint.entity_count()
    );
    for summary in summaries {
        let states: Vec<String> = summary
            .states
            .iter()
            .map(|(state, n)| format!("{state}={n}"))
            .collect();
        let _ = writeln!(
            out,
            "  alert {:<8} entities={:<6} {}",
            summary.alert_id,
            summary.entities,
            states.join(" ")
        );
    }
    out
}

pub fn cmd_inspect(path: &Path, json: bool) -> anyhow::Result<()> {
    let Some(checkpoint) = checkpoint::load(path)? else {
        bail!("checkpoint {} does not exist", path.display());
    };
    let summaries = summarize(&checkpoint);
    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
    } else {
        print!("{}", render_text(&checkpoint, &summaries));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nagwatch_core::StateId;
    use nagwatch_core::checkpoint::StateEntry;

    fn entry(id: u64, state: Option<AlertState>, seen: Option<i64>) -> StateEntry {
        StateEntry {
            current_state: state,
            last_seen: seen,
            ..StateEntry::bare(StateId(id))
        }
    }

    fn checkpoint() -> Checkpoint {
        let mut checkpoint = Checkpoint::new(0);
        checkpoint.alerts.insert(
            7,
            vec![
                entry(1, Some(AlertState::Bad), Some(50)),
                entry(2, Some(AlertState::Bad), Some(80)),
                entry(3, None, None),
            ],
        );
        checkpoint.alerts.insert(9, Vec::new());
        checkpoint
    }

    #[test]
    fn histogram_counts_current_states() {
        let summaries = summarize(&checkpoint());
        assert_eq!(summaries.len(), 2);

        let first = &summaries[0];
        assert_eq!(first.alert_id, 7);
        assert_eq!(first.entities, 3);
        assert_eq!(first.states.get(&AlertState::Bad), Some(&2));
        assert_eq!(first.states.get(&AlertState::Good), Some(&1));
        assert_eq!(first.newest_seen, Some(80));

        assert_eq!(summaries[1].entities, 0);
        assert_eq!(summaries[1].newest_seen, None);
    }

    #[test]
    fn text_lists_every_alert() {
        let checkpoint = checkpoint();
        let text = render_text(&checkpoint, &summarize(&checkpoint));
        assert!(text.starts_with("checkpoint v1 taken 1970-01-01T00:00:00+00:00: 2 alerts, 3 entities"));
        assert!(text.contains("good=1 bad=2"));
        assert!(text.contains("alert 9"));
    }

    #[test]
    fn missing_checkpoint_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(cmd_inspect(&dir.path().join("absent.json"), false).is_err());
    }
}
