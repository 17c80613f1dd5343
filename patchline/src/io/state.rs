//! Persisted run state: the crash-durable record of the last good run.
//!
//! The snapshot file is written at exactly two points: [`StateStore::mark_crashed`]
//! immediately before risky work begins, and [`StateStore::commit_success`]
//! after a fully clean run. Per-job enabled flags are pure user preference and
//! live in their own file, untouched by snapshot invalidation.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::types::{PersistedSnapshot, Snapshot, fold_id};

/// Store handle over `.patchline/state.json` and `.patchline/jobs.json`.
#[derive(Debug, Clone)]
pub struct StateStore {
    state_path: PathBuf,
    jobs_path: PathBuf,
}

/// Per-job enabled/disabled preferences (case-folded job name -> flag).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobPrefs {
    #[serde(default)]
    pub enabled: BTreeMap<String, bool>,
}

impl StateStore {
    pub fn new(state_path: impl Into<PathBuf>, jobs_path: impl Into<PathBuf>) -> Self {
        Self {
            state_path: state_path.into(),
            jobs_path: jobs_path.into(),
        }
    }

    /// Load the last run's snapshot.
    ///
    /// A missing file means "no prior state". An unreadable or corrupt file
    /// is treated the same way (with a warning) so a damaged store forces a
    /// full redo instead of failing the run outright.
    pub fn load(&self) -> Option<PersistedSnapshot> {
        if !self.state_path.exists() {
            return None;
        }
        let contents = match fs::read_to_string(&self.state_path) {
            Ok(contents) => contents,
            Err(err) => {
                warn!(path = %self.state_path.display(), err = %err, "unreadable run state, forcing full redo");
                return None;
            }
        };
        match serde_json::from_str(&contents) {
            Ok(state) => {
                debug!(path = %self.state_path.display(), "run state loaded");
                Some(state)
            }
            Err(err) => {
                warn!(path = %self.state_path.display(), err = %err, "corrupt run state, forcing full redo");
                None
            }
        }
    }

    /// Set the crash flag and flush it to disk before the risky operation it
    /// guards. All other fields are left as they were.
    pub fn mark_crashed(&self) -> Result<()> {
        let mut state = self.load().unwrap_or_default();
        state.crashed = true;
        debug!(path = %self.state_path.display(), "marking run state crashed");
        self.write(&state)
    }

    /// Record a fully successful run: refresh every field and clear the
    /// crash flag.
    pub fn commit_success(
        &self,
        snapshot: &Snapshot,
        tool_version: u32,
        settings_fingerprint: u64,
    ) -> Result<()> {
        let state = PersistedSnapshot {
            inputs: snapshot.inputs.clone(),
            masters: snapshot.masters.clone(),
            tool_version,
            settings_fingerprint,
            crashed: false,
        };
        debug!(path = %self.state_path.display(), tool_version, "committing run state");
        self.write(&state)
    }

    /// Whether the user left `job` enabled. `default` comes from the job's
    /// own enabled-at-start declaration.
    pub fn enabled(&self, job: &str, default: bool) -> bool {
        self.load_prefs()
            .enabled
            .get(&fold_id(job))
            .copied()
            .unwrap_or(default)
    }

    pub fn set_enabled(&self, job: &str, enabled: bool) -> Result<()> {
        let mut prefs = self.load_prefs();
        prefs.enabled.insert(fold_id(job), enabled);
        let mut buf = serde_json::to_string_pretty(&prefs).context("serialize job prefs")?;
        buf.push('\n');
        write_atomic(&self.jobs_path, &buf)
    }

    fn load_prefs(&self) -> JobPrefs {
        if !self.jobs_path.exists() {
            return JobPrefs::default();
        }
        fs::read_to_string(&self.jobs_path)
            .ok()
            .and_then(|contents| serde_json::from_str(&contents).ok())
            .unwrap_or_else(|| {
                warn!(path = %self.jobs_path.display(), "corrupt job prefs, using defaults");
                JobPrefs::default()
            })
    }

    fn write(&self, state: &PersistedSnapshot) -> Result<()> {
        let mut buf = serde_json::to_string_pretty(state).context("serialize run state")?;
        buf.push('\n');
        write_atomic(&self.state_path, &buf)
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("state path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp state {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace state {}", path.display()))?;
    Ok(())
}
