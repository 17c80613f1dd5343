//! Orchestrator configuration stored under `.patchline/config.toml`.

use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Orchestrator configuration (TOML).
///
/// This file is intended to be edited by humans and must remain stable and
/// automatable. Missing fields default to sensible values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Directory (relative to the workspace root) holding the input files.
    pub data_dir: String,

    /// Directory scanned for candidate patcher packages.
    pub packages_dir: String,

    /// Directory the jobs write their output artifacts into.
    pub output_dir: String,

    /// Memory ceiling passed to every job process, in megabytes.
    pub max_memory_mb: u32,

    /// Preferred language passed to every job process.
    pub language: String,

    /// Progress-window coordinates passed to every job process.
    pub progress_at: Option<(i64, i64)>,

    /// Truncate per-job stdout/stderr logs beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Stream job output to the per-job log line-by-line while it runs.
    pub streaming: bool,

    /// Wall-clock budget for a job's custom needs-patch probe, in seconds.
    /// Job execution itself is deliberately unbounded.
    pub probe_timeout_secs: u64,

    pub sort: SortConfig,
    pub merge: MergeConfig,
}

/// External ordering pass executed before the jobs when enabled.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SortConfig {
    pub enabled: bool,
    /// Command to execute (e.g. `["loot", "sort"]`).
    pub command: Vec<String>,
}

/// Final merge pass combining the run's artifacts into one.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MergeConfig {
    pub enabled: bool,
    /// Command to execute; the ordered artifact list is appended as args.
    pub command: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
            packages_dir: "patchers".to_string(),
            output_dir: "artifacts".to_string(),
            max_memory_mb: 2048,
            language: "en".to_string(),
            progress_at: None,
            output_limit_bytes: 1_000_000,
            streaming: true,
            probe_timeout_secs: 60,
            sort: SortConfig::default(),
            merge: MergeConfig::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.data_dir.trim().is_empty() {
            return Err(anyhow!("data_dir must be non-empty"));
        }
        if self.packages_dir.trim().is_empty() {
            return Err(anyhow!("packages_dir must be non-empty"));
        }
        if self.output_dir.trim().is_empty() {
            return Err(anyhow!("output_dir must be non-empty"));
        }
        if self.max_memory_mb == 0 {
            return Err(anyhow!("max_memory_mb must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.probe_timeout_secs == 0 {
            return Err(anyhow!("probe_timeout_secs must be > 0"));
        }
        if self.sort.enabled && command_invalid(&self.sort.command) {
            return Err(anyhow!("sort.command must be a non-empty array"));
        }
        if self.merge.enabled && command_invalid(&self.merge.command) {
            return Err(anyhow!("merge.command must be a non-empty array"));
        }
        Ok(())
    }

    /// Fingerprint over the settings whose change must invalidate prior
    /// output. Resource knobs (memory, log limits) are deliberately excluded.
    pub fn important_fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.language.hash(&mut hasher);
        self.sort.enabled.hash(&mut hasher);
        self.sort.command.hash(&mut hasher);
        self.merge.enabled.hash(&mut hasher);
        self.merge.command.hash(&mut hasher);
        hasher.finish()
    }
}

fn command_invalid(command: &[String]) -> bool {
    command.is_empty() || command[0].trim().is_empty()
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `Config::default()`.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        let cfg = Config::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: Config =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &Config) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
