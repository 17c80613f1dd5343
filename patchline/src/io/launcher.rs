//! Launching patcher jobs as isolated external processes.
//!
//! The [`Launcher`] trait decouples run orchestration from actual process
//! spawning. Tests use scripted launchers that return predetermined results
//! without spawning anything.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::core::types::JobResult;
use crate::io::paths::resolve_command;
use crate::io::process::{CommandOutput, run_command};

/// Everything needed to launch one job process.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Job identity, used for logging and the result.
    pub job: String,
    /// Package directory the process runs in.
    pub package_dir: PathBuf,
    /// Base argv from the manifest; contract flags are appended.
    pub command: Vec<String>,
    /// Pass `--force` through to the job.
    pub force: bool,
    /// Pass `--skip-import` through to the job.
    pub skip_import: bool,
    /// Memory ceiling in megabytes.
    pub max_memory_mb: u32,
    /// Preferred language code.
    pub language: String,
    /// Progress-window coordinates, if the front-end pinned them.
    pub progress_at: Option<(i64, i64)>,
    /// Block-list pass-through, if one exists.
    pub blocklist_path: Option<PathBuf>,
    /// Where to write the job's stdout/stderr log.
    pub log_path: PathBuf,
    /// Truncate captured output beyond this many bytes.
    pub output_limit_bytes: usize,
    /// Stream stdout to the log while the job runs.
    pub stream: bool,
}

/// Parameters for a job's custom needs-patch probe.
#[derive(Debug, Clone)]
pub struct ProbeSpec {
    pub job: String,
    pub package_dir: PathBuf,
    pub command: Vec<String>,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

/// Abstraction over job process execution.
pub trait Launcher {
    /// Run the job to completion and report its result. Must not time the
    /// job out: a hung job blocks the pipeline by design.
    fn launch(&self, spec: &LaunchSpec) -> Result<JobResult>;

    /// Run the job's custom needs-patch predicate. Exit 0 means "patch
    /// needed".
    fn probe(&self, spec: &ProbeSpec) -> Result<bool>;
}

/// Launcher that spawns real processes.
pub struct ProcessLauncher;

impl ProcessLauncher {
    fn build_command(spec: &LaunchSpec) -> std::process::Command {
        let program = resolve_command(&spec.package_dir, &spec.command[0]);
        let mut cmd = std::process::Command::new(program);
        cmd.args(&spec.command[1..]);
        // Contract flags: run headless and exit when done, honoring the
        // host's regeneration and resource decisions.
        cmd.arg("--headless");
        if spec.force {
            cmd.arg("--force");
        }
        if spec.skip_import {
            cmd.arg("--skip-import");
        }
        cmd.arg("--max-memory").arg(spec.max_memory_mb.to_string());
        cmd.arg("--lang").arg(&spec.language);
        if let Some((x, y)) = spec.progress_at {
            cmd.arg("--progress-at").arg(format!("{x},{y}"));
        }
        if let Some(blocklist) = &spec.blocklist_path {
            cmd.arg("--blocklist").arg(blocklist);
        }
        cmd.current_dir(&spec.package_dir);
        cmd
    }
}

impl Launcher for ProcessLauncher {
    #[instrument(skip_all, fields(job = %spec.job))]
    fn launch(&self, spec: &LaunchSpec) -> Result<JobResult> {
        info!(package = %spec.package_dir.display(), "launching job");

        let cmd = Self::build_command(spec);
        let stream_path = spec.stream.then(|| spec.log_path.clone());
        let output = run_command(
            cmd,
            None,
            spec.output_limit_bytes,
            stream_path.as_deref(),
        )
        .with_context(|| format!("run job {}", spec.job))?;

        if !spec.stream {
            write_job_log(&spec.log_path, &spec.job, &output)?;
        } else {
            append_stderr_log(&spec.log_path, &spec.job, &output)?;
        }

        let exit_code = output.status.code();
        if !output.status.success() {
            warn!(job = %spec.job, exit_code = ?exit_code, "job failed");
        }
        Ok(JobResult {
            job: spec.job.clone(),
            exit_code,
            error: None,
        })
    }

    #[instrument(skip_all, fields(job = %spec.job, timeout_secs = spec.timeout.as_secs()))]
    fn probe(&self, spec: &ProbeSpec) -> Result<bool> {
        let program = resolve_command(&spec.package_dir, &spec.command[0]);
        let mut cmd = std::process::Command::new(program);
        cmd.args(&spec.command[1..]);
        cmd.current_dir(&spec.package_dir);

        let output = run_command(cmd, Some(spec.timeout), spec.output_limit_bytes, None)
            .with_context(|| format!("probe job {}", spec.job))?;
        if output.timed_out {
            warn!(job = %spec.job, "probe timed out, assuming patch needed");
            return Ok(true);
        }
        Ok(output.status.success())
    }
}

fn write_job_log(path: &Path, job: &str, output: &CommandOutput) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create job log dir {}", parent.display()))?;
    }
    let mut buf = String::new();
    buf.push_str("=== stdout ===\n");
    buf.push_str(&String::from_utf8_lossy(&output.stdout));
    buf.push_str(&output.stdout_truncated_notice(job));
    buf.push_str("\n=== stderr ===\n");
    buf.push_str(&String::from_utf8_lossy(&output.stderr));
    buf.push_str(&output.stderr_truncated_notice(job));
    buf.push_str(&format!("\n=== exit: {:?} ===\n", output.status.code()));

    fs::write(path, buf).with_context(|| format!("write job log {}", path.display()))
}

/// In streaming mode stdout already went to the log; stderr and the exit
/// status are appended afterward.
fn append_stderr_log(path: &Path, job: &str, output: &CommandOutput) -> Result<()> {
    use std::io::Write;

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open job log {}", path.display()))?;
    let mut buf = String::new();
    buf.push_str("\n=== stderr ===\n");
    buf.push_str(&String::from_utf8_lossy(&output.stderr));
    buf.push_str(&output.stderr_truncated_notice(job));
    buf.push_str(&format!("\n=== exit: {:?} ===\n", output.status.code()));
    file.write_all(buf.as_bytes())
        .with_context(|| format!("append job log {}", path.display()))
}
