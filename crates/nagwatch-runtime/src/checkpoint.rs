//! Checkpoint file: every alert's state entries as one JSON document.
//!
//! Written atomically (temp file in the same directory, then rename) so a
//! crash mid-write leaves the previous checkpoint intact.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

use nagwatch_core::checkpoint::StateEntry;

pub const CHECKPOINT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    /// Epoch seconds at which the snapshot was taken.
    pub taken_at: i64,
    pub alerts: BTreeMap<u64, Vec<StateEntry>>,
}

impl Checkpoint {
    pub fn new(taken_at: i64) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            taken_at,
            alerts: BTreeMap::new(),
        }
    }

    pub fn entity_count(&self) -> usize {
        self.alerts.values().map(Vec::len).sum()
    }
}

/// Load a checkpoint. A missing file is a cold start (`Ok(None)`); an
/// unreadable or corrupt one is an error.
pub fn load(path: &Path) -> anyhow::Result<Option<Checkpoint>> {
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("reading checkpoint {}", path.display()));
        }
    };
    let checkpoint: Checkpoint = serde_json::from_slice(&raw)
        .with_context(|| format!("parsing checkpoint {}", path.display()))?;
    if checkpoint.version != CHECKPOINT_VERSION {
        bail!(
            "checkpoint {} has unsupported version {} (expected {CHECKPOINT_VERSION})",
            path.display(),
            checkpoint.version
        );
    }
    Ok(Some(checkpoint))
}

pub fn save(path: &Path, checkpoint: &Checkpoint) -> anyhow::Result<()> {
    let dir = parent_dir(path);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("creating checkpoint dir {}", dir.display()))?;

    let tmp = temp_path(path);
    let result = (|| -> anyhow::Result<()> {
        let mut file = std::fs::File::create(&tmp)?;
        serde_json::to_writer(&mut file, checkpoint)?;
        file.write_all(b"\n")?;
        file.sync_all()?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    })();

    if result.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    result.with_context(|| format!("writing checkpoint {}", path.display()))
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "checkpoint".into());
    name.push(format!(".tmp.{}", std::process::id()));
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nagwatch_core::{AlertState, StateId};

    fn sample() -> Checkpoint {
        let mut checkpoint = Checkpoint::new(1_700_000_000);
        checkpoint.alerts.insert(
            7,
            vec![
                StateEntry {
                    current_state: Some(AlertState::Bad),
                    last_seen: Some(1_699_999_990),
                    nag_timestamp: Some(1_699_999_000),
                    ..StateEntry::bare(StateId(1))
                },
                StateEntry::bare(StateId(2)),
            ],
        );
        checkpoint.alerts.insert(8, Vec::new());
        checkpoint
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.json");

        let checkpoint = sample();
        save(&path, &checkpoint).expect("save");
        let loaded = load(&path).expect("load").expect("present");
        assert_eq!(loaded, checkpoint);
        assert_eq!(loaded.entity_count(), 2);
    }

    #[test]
    fn save_replaces_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.json");

        save(&path, &sample()).expect("first save");
        save(&path, &Checkpoint::new(5)).expect("second save");

        let loaded = load(&path).expect("load").expect("present");
        assert_eq!(loaded.taken_at, 5);
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .expect("read dir")
            .map(|e| e.expect("entry").file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("state.json")]);
    }

    #[test]
    fn save_creates_parent_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested/deeper/state.json");
        save(&path, &Checkpoint::new(1)).expect("save");
        assert!(path.exists());
    }

    #[test]
    fn missing_file_is_cold_start() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(load(&dir.path().join("absent.json")).expect("load").is_none());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").expect("write");
        let err = load(&path).expect_err("corrupt");
        assert!(err.to_string().contains("parsing checkpoint"));
    }

    #[test]
    fn unknown_version_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        std::fs::write(&path, r#"{"version":99,"taken_at":0,"alerts":{}}"#).expect("write");
        assert!(load(&path).is_err());
    }
}
