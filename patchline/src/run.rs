//! Orchestration of a full pipeline run.
//!
//! A run walks `Idle -> Importing -> Running -> Merging -> Done`, with
//! `Aborted` reachable from any phase. The crash flag is flushed to disk
//! before the first risky step, so an interrupted run forces regeneration on
//! the next one. Success state is committed only after every phase finished
//! cleanly.

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::invalidation::{Probe, first_trigger, needs_import};
use crate::core::types::{Decision, JobResult, RunPhase, Snapshot, fold_id};
use crate::core::version::encode_version;
use crate::io::catalog::{Catalog, FsCatalog, category_map, snapshot};
use crate::io::config::{Config, load_config};
use crate::io::launcher::{LaunchSpec, Launcher, ProbeSpec};
use crate::io::load_order::read_load_order;
use crate::io::paths::WorkspacePaths;
use crate::io::registry::{
    BlockedJob, Job, SkippedPackage, discover_jobs, load_exclusions, order_jobs,
};
use crate::io::state::StateStore;
use crate::policy::FailurePolicy;

/// Version of the orchestrator itself, fed to the version axis.
pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Caller-supplied knobs for one run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Force regeneration regardless of every other axis.
    pub force: bool,
    /// Treat every enabled input as a dependency of every artifact.
    pub all_deps: bool,
    /// Disable incremental streaming of job output to the per-job log.
    pub no_stream: bool,
    /// Override the configured language for this run.
    pub language: Option<String>,
    /// Override the configured progress-window coordinates.
    pub progress_at: Option<(i64, i64)>,
}

/// Why a run stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStop {
    /// Nothing needed regeneration; no job executed.
    UpToDate,
    /// Jobs (and merge, when enabled) completed; success state committed.
    Completed,
    /// A job failed and the failure policy chose abort.
    Aborted { job: String },
    /// A cancel request was honored at a job boundary.
    Cancelled,
}

/// Summary of one run invocation.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub imported: bool,
    pub stop: RunStop,
    pub results: Vec<JobResult>,
    /// Names of jobs that failed but were continued past.
    pub failed: Vec<String>,
    pub merged: bool,
}

/// Progress notifications emitted while a run executes.
#[derive(Debug, Clone)]
pub enum RunEvent {
    Phase(RunPhase),
    JobStarted {
        job: String,
        index: usize,
        total: usize,
    },
    JobFinished {
        job: String,
        success: bool,
    },
}

/// Everything one run needs, passed explicitly instead of read from
/// process-wide statics.
pub struct RunContext<C: Catalog> {
    pub paths: WorkspacePaths,
    pub config: Config,
    pub options: RunOptions,
    /// Discovered jobs in final execution order.
    pub jobs: Vec<Job>,
    pub blocked: Vec<BlockedJob>,
    pub skipped: Vec<SkippedPackage>,
    pub store: StateStore,
    pub catalog: C,
    pub phase: RunPhase,
    imported: bool,
}

impl RunContext<FsCatalog> {
    /// Assemble a context from a workspace root: load config, discover and
    /// order jobs, open the state store.
    pub fn prepare(root: impl Into<PathBuf>, options: RunOptions) -> Result<Self> {
        let paths = WorkspacePaths::new(root);
        let mut config = load_config(&paths.config_path)?;
        if let Some(language) = &options.language {
            config.language = language.clone();
        }
        if let Some(progress_at) = options.progress_at {
            config.progress_at = Some(progress_at);
        }

        let data_dir = paths.data_dir(&config.data_dir);
        let output_dir = paths.output_dir(&config.output_dir);
        let exclusions = load_exclusions(&paths.blocklist_path)?;
        let discovery = discover_jobs(&paths.packages_dir(&config.packages_dir), &exclusions)?;
        let load_order = read_load_order(&data_dir)?;
        let jobs = order_jobs(discovery.jobs, &load_order);
        let store = StateStore::new(&paths.state_path, &paths.jobs_path);
        let catalog = FsCatalog::new(&data_dir, &output_dir);

        Ok(Self::new(
            paths,
            config,
            options,
            jobs,
            discovery.blocked,
            discovery.skipped,
            store,
            catalog,
        ))
    }
}

impl<C: Catalog> RunContext<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        paths: WorkspacePaths,
        config: Config,
        options: RunOptions,
        jobs: Vec<Job>,
        blocked: Vec<BlockedJob>,
        skipped: Vec<SkippedPackage>,
        store: StateStore,
        catalog: C,
    ) -> Self {
        Self {
            paths,
            config,
            options,
            jobs,
            blocked,
            skipped,
            store,
            catalog,
            phase: RunPhase::Idle,
            imported: false,
        }
    }

    /// Jobs the user left enabled, in execution order.
    pub fn enabled_jobs(&self) -> Vec<Job> {
        self.jobs
            .iter()
            .filter(|job| self.store.enabled(&job.name, job.enabled_at_start))
            .cloned()
            .collect()
    }

    /// Union of the enabled jobs' interest categories.
    fn interest(&self, jobs: &[Job]) -> BTreeSet<String> {
        jobs.iter()
            .flat_map(|job| job.categories.iter().cloned())
            .collect()
    }

    /// Run the import phase once per process lifetime. Re-entrant calls are
    /// safe no-ops.
    #[instrument(skip_all)]
    pub fn start_import(&mut self) -> Result<()> {
        if self.imported {
            debug!("import already done, no-op");
            return Ok(());
        }
        self.phase = RunPhase::Importing;
        let interest = self.interest(&self.enabled_jobs());
        self.catalog.import(&interest)?;
        self.imported = true;
        self.phase = RunPhase::Idle;
        Ok(())
    }

    /// Execute a full run: verdicts, import, ordering pass, jobs, merge,
    /// success commit. `cancel` is latched and honored only at job
    /// boundaries.
    #[instrument(skip_all)]
    pub fn run_changes<L, P, F>(
        &mut self,
        launcher: &L,
        policy: &P,
        cancel: &AtomicBool,
        mut on_event: F,
    ) -> Result<RunReport>
    where
        L: Launcher,
        P: FailurePolicy,
        F: FnMut(RunEvent),
    {
        let run_id = allocate_run_id();
        let enabled = self.enabled_jobs();
        info!(run_id = %run_id, jobs = enabled.len(), "starting run");

        // Hard preconditions come before any state mutation or job launch.
        if self.config.merge.enabled && !self.config.sort.enabled {
            bail!("merge is enabled but the ordering pass is not; enable sort before merging");
        }

        let artifacts: Vec<String> = enabled.iter().map(|job| job.artifact.clone()).collect();
        let current = snapshot(&self.catalog, &artifacts)?;
        if let Err(err) = self.check_required_inputs(&enabled, &current) {
            // Missing declared inputs are fatal and leave the state marked
            // crashed so the next run is forced to regenerate.
            self.store.mark_crashed()?;
            self.phase = RunPhase::Aborted;
            return Err(err);
        }

        let persisted = self.store.load();
        let interest = self.interest(&enabled);
        let categories = category_map(&self.catalog, &current.inputs)?;
        let output_dir = self.paths.output_dir(&self.config.output_dir);
        let artifacts_present = artifacts
            .iter()
            .all(|artifact| output_dir.join(artifact).exists());
        let settings_fingerprint = self.config.important_fingerprint();
        let tool_version = encode_version(TOOL_VERSION);

        let probe = Probe {
            force: self.options.force,
            artifacts_present,
            persisted: persisted.as_ref(),
            tool_version,
            settings_fingerprint,
            current: &current,
            interest: &interest,
            categories: &categories,
            all_deps: self.options.all_deps,
        };

        let import_needed = needs_import(&probe);
        if import_needed {
            on_event(RunEvent::Phase(RunPhase::Importing));
            self.start_import()?;
        }

        // The dependency-drain axis is only meaningful once import has run.
        let trigger = first_trigger(&probe, self.imported);
        drop(probe);

        let patch_needed = match trigger {
            Some(axis) => {
                info!(axis = ?axis, "regeneration required");
                true
            }
            // No axis fired: the jobs' own predicates get the last word.
            None => self.jobs_request_patch(launcher, &enabled)?,
        };

        if !patch_needed {
            info!("everything up to date, nothing to run");
            self.phase = RunPhase::Done;
            return Ok(RunReport {
                run_id,
                imported: self.imported,
                stop: RunStop::UpToDate,
                results: Vec::new(),
                failed: Vec::new(),
                merged: false,
            });
        }

        // Risky work starts here; flush the crash flag first so an abnormal
        // termination is visible to the next run.
        self.store.mark_crashed()?;

        if self.config.sort.enabled {
            self.run_sort(&run_id)?;
        }

        self.phase = RunPhase::Running;
        on_event(RunEvent::Phase(RunPhase::Running));

        let mut results = Vec::new();
        let mut failed = Vec::new();
        let total = enabled.len();
        let skip_import = !import_needed;

        for (index, job) in enabled.iter().enumerate() {
            if cancel.load(Ordering::SeqCst) {
                info!(job = %job.name, "cancel latched, stopping at job boundary");
                self.phase = RunPhase::Aborted;
                on_event(RunEvent::Phase(RunPhase::Aborted));
                return Ok(self.finish_report(run_id, RunStop::Cancelled, results, failed, false));
            }

            on_event(RunEvent::JobStarted {
                job: job.name.clone(),
                index,
                total,
            });

            self.run_hook(job, &job.on_start_command, &[]);

            let spec = self.launch_spec(job, &run_id, skip_import);
            let result = match launcher.launch(&spec) {
                Ok(result) => result,
                // Launch-level failures feed the same policy as nonzero exits.
                Err(err) => JobResult {
                    job: job.name.clone(),
                    exit_code: None,
                    error: Some(format!("{err:#}")),
                },
            };

            let outcome = if result.success() { "success" } else { "failure" };
            self.run_hook(job, &job.on_exit_command, &[outcome]);

            on_event(RunEvent::JobFinished {
                job: job.name.clone(),
                success: result.success(),
            });

            if result.success() {
                results.push(result);
                continue;
            }

            warn!(job = %job.name, exit_code = ?result.exit_code, "job failed");
            failed.push(job.name.clone());
            let decision = policy.on_failure(&result)?;
            results.push(result);
            if decision == Decision::Abort {
                let job = job.name.clone();
                self.phase = RunPhase::Aborted;
                on_event(RunEvent::Phase(RunPhase::Aborted));
                return Ok(self.finish_report(run_id, RunStop::Aborted { job }, results, failed, false));
            }
        }

        let mut merged = false;
        if self.config.merge.enabled {
            if cancel.load(Ordering::SeqCst) {
                self.phase = RunPhase::Aborted;
                on_event(RunEvent::Phase(RunPhase::Aborted));
                return Ok(self.finish_report(run_id, RunStop::Cancelled, results, failed, false));
            }
            self.phase = RunPhase::Merging;
            on_event(RunEvent::Phase(RunPhase::Merging));
            // A partially merged artifact is worse than none: merge failure
            // is fatal and the crash flag stays set.
            self.run_merge(launcher, &artifacts, &run_id)?;
            merged = true;
        }

        if failed.is_empty() {
            // Jobs may have rewritten their artifacts' declared masters;
            // commit the post-run dependency snapshot with the pre-run input
            // stamps.
            let committed = Snapshot {
                inputs: current.inputs,
                masters: snapshot(&self.catalog, &artifacts)?.masters,
            };
            self.store
                .commit_success(&committed, tool_version, settings_fingerprint)?;
        } else {
            // Continued-past failures leave the crash flag set: the pipeline
            // output is incomplete and the next run must retry.
            info!(failed = failed.len(), "run finished with failures, success state not committed");
        }

        self.phase = RunPhase::Done;
        on_event(RunEvent::Phase(RunPhase::Done));
        Ok(self.finish_report(run_id, RunStop::Completed, results, failed, merged))
    }

    fn check_required_inputs(&self, jobs: &[Job], current: &Snapshot) -> Result<()> {
        let enabled_ids: BTreeSet<String> = current
            .inputs
            .iter()
            .map(|stamp| fold_id(&stamp.id))
            .collect();
        for job in jobs {
            for required in &job.requires {
                if !enabled_ids.contains(&fold_id(required)) {
                    bail!(
                        "job '{}' requires input '{}' which is not in the enabled set",
                        job.name,
                        required
                    );
                }
            }
        }
        Ok(())
    }

    /// Axis 9: ask each job's own predicate, stopping at the first yes.
    fn jobs_request_patch<L: Launcher>(&self, launcher: &L, jobs: &[Job]) -> Result<bool> {
        for job in jobs {
            if job.probe_command.is_empty() {
                continue;
            }
            let spec = ProbeSpec {
                job: job.name.clone(),
                package_dir: job.package_dir.clone(),
                command: job.probe_command.clone(),
                timeout: Duration::from_secs(self.config.probe_timeout_secs),
                output_limit_bytes: self.config.output_limit_bytes,
            };
            match launcher.probe(&spec) {
                Ok(true) => {
                    info!(job = %job.name, "job predicate requested regeneration");
                    return Ok(true);
                }
                Ok(false) => {}
                Err(err) => {
                    // Conservative: an unanswerable predicate means patch.
                    warn!(job = %job.name, err = %err, "probe failed, assuming patch needed");
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Lifecycle hooks are advisory: a failing hook is logged with the job's
    /// identity and never aborts the run.
    fn run_hook(&self, job: &Job, command: &[String], extra_args: &[&str]) {
        if command.is_empty() {
            return;
        }
        let program = crate::io::paths::resolve_command(&job.package_dir, &command[0]);
        let mut cmd = std::process::Command::new(program);
        cmd.args(&command[1..])
            .args(extra_args)
            .current_dir(&job.package_dir);
        match crate::io::process::run_command(
            cmd,
            Some(Duration::from_secs(self.config.probe_timeout_secs)),
            self.config.output_limit_bytes,
            None,
        ) {
            Ok(output) if output.status.success() => {}
            Ok(output) => {
                warn!(job = %job.name, exit_code = ?output.status.code(), "lifecycle hook failed");
            }
            Err(err) => {
                warn!(job = %job.name, err = %err, "lifecycle hook could not run");
            }
        }
    }

    fn launch_spec(&self, job: &Job, run_id: &str, skip_import: bool) -> LaunchSpec {
        let blocklist_path = self
            .paths
            .blocklist_path
            .exists()
            .then(|| self.paths.blocklist_path.clone());
        LaunchSpec {
            job: job.name.clone(),
            package_dir: job.package_dir.clone(),
            command: job.command.clone(),
            force: self.options.force,
            skip_import,
            max_memory_mb: self.config.max_memory_mb,
            language: self.config.language.clone(),
            progress_at: self.config.progress_at,
            blocklist_path,
            log_path: self
                .paths
                .run_dir(run_id)
                .join(format!("{}.log", fold_id(&job.name))),
            output_limit_bytes: self.config.output_limit_bytes,
            stream: self.config.streaming && !self.options.no_stream,
        }
    }

    /// External ordering pass; nonzero exit is fatal.
    fn run_sort(&self, run_id: &str) -> Result<()> {
        let command = &self.config.sort.command;
        let log_path = self.paths.run_dir(run_id).join("sort.log");
        let mut cmd = std::process::Command::new(&command[0]);
        cmd.args(&command[1..]).current_dir(&self.paths.root);
        let output = crate::io::process::run_command(
            cmd,
            None,
            self.config.output_limit_bytes,
            None,
        )
        .context("run ordering pass")?;
        fs::create_dir_all(self.paths.run_dir(run_id)).context("create run dir")?;
        fs::write(
            &log_path,
            format!(
                "=== stdout ===\n{}\n=== stderr ===\n{}\n=== exit: {:?} ===\n",
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr),
                output.status.code()
            ),
        )
        .with_context(|| format!("write {}", log_path.display()))?;
        if !output.status.success() {
            bail!(
                "ordering pass failed with exit {:?} (see {})",
                output.status.code(),
                log_path.display()
            );
        }
        Ok(())
    }

    /// Merge runs as just another job-like process, fed the ordered list of
    /// this run's output artifact identifiers.
    fn run_merge<L: Launcher>(&self, launcher: &L, artifacts: &[String], run_id: &str) -> Result<()> {
        let mut command = self.config.merge.command.clone();
        command.extend(artifacts.iter().cloned());
        let spec = LaunchSpec {
            job: "merge".to_string(),
            package_dir: self.paths.root.clone(),
            command,
            force: false,
            skip_import: true,
            max_memory_mb: self.config.max_memory_mb,
            language: self.config.language.clone(),
            progress_at: self.config.progress_at,
            blocklist_path: None,
            log_path: self.paths.run_dir(run_id).join("merge.log"),
            output_limit_bytes: self.config.output_limit_bytes,
            stream: false,
        };
        let result = launcher.launch(&spec).context("run merge")?;
        if !result.success() {
            bail!(
                "merge failed with exit {:?} (see {})",
                result.exit_code,
                spec.log_path.display()
            );
        }
        Ok(())
    }

    fn finish_report(
        &self,
        run_id: String,
        stop: RunStop,
        results: Vec<JobResult>,
        failed: Vec<String>,
        merged: bool,
    ) -> RunReport {
        let report = RunReport {
            run_id,
            imported: self.imported,
            stop,
            results,
            failed,
            merged,
        };
        if let Err(err) = self.write_summary(&report) {
            warn!(err = %err, "failed to write run summary");
        }
        report
    }

    fn write_summary(&self, report: &RunReport) -> Result<()> {
        #[derive(Serialize)]
        struct Summary<'a> {
            run_id: &'a str,
            status: &'a str,
            failed: &'a [String],
            merged: bool,
        }
        let status = match &report.stop {
            RunStop::UpToDate => "up-to-date",
            RunStop::Completed => "completed",
            RunStop::Aborted { .. } => "aborted",
            RunStop::Cancelled => "cancelled",
        };
        let run_dir = self.paths.run_dir(&report.run_id);
        fs::create_dir_all(&run_dir)
            .with_context(|| format!("create run dir {}", run_dir.display()))?;
        let path = run_dir.join("summary.json");
        let mut buf = serde_json::to_string_pretty(&Summary {
            run_id: &report.run_id,
            status,
            failed: &report.failed,
            merged: report.merged,
        })
        .context("serialize run summary")?;
        buf.push('\n');
        fs::write(&path, buf).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }
}

fn allocate_run_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis())
        .unwrap_or(0);
    format!("run-{millis}")
}
