//! Test-only helpers for constructing pipeline fixtures.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, UNIX_EPOCH};

use anyhow::{Context, Result};

use crate::core::types::{Decision, JobResult, fold_id};
use crate::io::catalog::FsCatalog;
use crate::io::launcher::{LaunchSpec, Launcher, ProbeSpec};
use crate::policy::FailurePolicy;
use crate::run::{RunContext, RunOptions};

/// A throwaway workspace wired with the default directory layout.
pub struct TestWorkspace {
    temp: tempfile::TempDir,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create tempdir")?;
        for dir in ["data", "patchers", "artifacts"] {
            fs::create_dir_all(temp.path().join(dir))
                .with_context(|| format!("create {dir}"))?;
        }
        Ok(Self { temp })
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root().join("data")
    }

    pub fn packages_dir(&self) -> PathBuf {
        self.root().join("patchers")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root().join("artifacts")
    }

    /// Write the load-order file (one identifier per line).
    pub fn write_order(&self, lines: &[&str]) -> Result<()> {
        let mut contents = lines.join("\n");
        contents.push('\n');
        fs::write(self.data_dir().join("loadorder.txt"), contents).context("write load order")
    }

    /// Create an input file with a deterministic mtime.
    pub fn write_input(&self, id: &str, mtime_secs: u64) -> Result<()> {
        let path = self.data_dir().join(id);
        fs::write(&path, id).with_context(|| format!("write input {id}"))?;
        set_mtime(&path, mtime_secs)
    }

    /// Reset an existing input's mtime (a changed fingerprint).
    pub fn touch_input(&self, id: &str, mtime_secs: u64) -> Result<()> {
        set_mtime(&self.data_dir().join(id), mtime_secs)
    }

    /// Create an output artifact file (as a job would have).
    pub fn write_artifact(&self, id: &str) -> Result<()> {
        fs::write(self.output_dir().join(id), id).with_context(|| format!("write artifact {id}"))
    }

    /// Write an artifact's declared-masters sidecar.
    pub fn write_masters(&self, artifact: &str, masters: &[&str]) -> Result<()> {
        let mut contents = masters.join("\n");
        contents.push('\n');
        fs::write(
            self.output_dir().join(format!("{artifact}.masters")),
            contents,
        )
        .with_context(|| format!("write masters for {artifact}"))
    }

    /// Create a patcher package directory with the given manifest TOML.
    pub fn write_package(&self, dir_name: &str, manifest: &str) -> Result<()> {
        let package = self.packages_dir().join(dir_name);
        fs::create_dir_all(&package).with_context(|| format!("create package {dir_name}"))?;
        fs::write(package.join("patcher.toml"), manifest)
            .with_context(|| format!("write manifest for {dir_name}"))
    }

    /// Write `.patchline/config.toml`.
    pub fn write_config(&self, contents: &str) -> Result<()> {
        let dir = self.root().join(".patchline");
        fs::create_dir_all(&dir).context("create .patchline")?;
        fs::write(dir.join("config.toml"), contents).context("write config")
    }

    /// Prepare a run context over this workspace.
    pub fn context(&self, options: RunOptions) -> Result<RunContext<FsCatalog>> {
        RunContext::prepare(self.root(), options)
    }
}

fn set_mtime(path: &Path, mtime_secs: u64) -> Result<()> {
    let file = fs::File::options()
        .write(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    file.set_modified(UNIX_EPOCH + Duration::from_secs(mtime_secs))
        .with_context(|| format!("set mtime of {}", path.display()))
}

/// Minimal well-formed manifest for a job.
pub fn manifest(name: &str, artifact: &str) -> String {
    format!(
        r#"
            name = "{name}"
            artifact = "{artifact}"
            version = "1.0.0"
            contract = 1
            capabilities = ["describe", "run"]
            command = ["run.sh"]
        "#
    )
}

/// Launcher that returns scripted exit codes without spawning processes.
#[derive(Default)]
pub struct ScriptedLauncher {
    /// Case-folded job name -> exit code (absent means 0).
    exits: BTreeMap<String, i32>,
    /// Case-folded job name -> probe answer (absent means false).
    probes: BTreeMap<String, bool>,
    launches: Mutex<Vec<LaunchSpec>>,
    probed: Mutex<Vec<String>>,
}

impl ScriptedLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_exit(mut self, job: &str, exit_code: i32) -> Self {
        self.exits.insert(fold_id(job), exit_code);
        self
    }

    pub fn with_probe(mut self, job: &str, wants_patch: bool) -> Self {
        self.probes.insert(fold_id(job), wants_patch);
        self
    }

    /// Job names launched so far, in order.
    pub fn launched(&self) -> Vec<String> {
        lock(&self.launches).iter().map(|s| s.job.clone()).collect()
    }

    /// Full launch specs captured so far.
    pub fn specs(&self) -> Vec<LaunchSpec> {
        lock(&self.launches).clone()
    }

    pub fn probed(&self) -> Vec<String> {
        lock(&self.probed).clone()
    }
}

impl Launcher for ScriptedLauncher {
    fn launch(&self, spec: &LaunchSpec) -> Result<JobResult> {
        lock(&self.launches).push(spec.clone());
        let exit_code = self.exits.get(&fold_id(&spec.job)).copied().unwrap_or(0);
        Ok(JobResult {
            job: spec.job.clone(),
            exit_code: Some(exit_code),
            error: None,
        })
    }

    fn probe(&self, spec: &ProbeSpec) -> Result<bool> {
        lock(&self.probed).push(spec.job.clone());
        Ok(self.probes.get(&fold_id(&spec.job)).copied().unwrap_or(false))
    }
}

/// Policy that returns a fixed decision and records what it was asked about.
pub struct ScriptedPolicy {
    decision: Decision,
    asked: Mutex<Vec<String>>,
}

impl ScriptedPolicy {
    pub fn new(decision: Decision) -> Self {
        Self {
            decision,
            asked: Mutex::new(Vec::new()),
        }
    }

    pub fn asked(&self) -> Vec<String> {
        lock(&self.asked).clone()
    }
}

impl FailurePolicy for ScriptedPolicy {
    fn on_failure(&self, result: &JobResult) -> Result<Decision> {
        lock(&self.asked).push(result.job.clone());
        Ok(self.decision)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
