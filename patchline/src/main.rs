//! Incremental patcher-pipeline orchestrator CLI.
//!
//! Coordinates externally-authored patcher packages over a shared data
//! directory: discovers them, decides whether regeneration is needed at all,
//! runs each as an isolated process in load order, and optionally merges the
//! results.

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};

use patchline::exit_codes;
use patchline::io::config::load_config;
use patchline::io::launcher::ProcessLauncher;
use patchline::io::paths::WorkspacePaths;
use patchline::io::state::StateStore;
use patchline::policy::{AlwaysAbort, ConfirmPolicy, FailurePolicy};
use patchline::run::{RunContext, RunOptions, RunStop};
use patchline::worker::Worker;

#[derive(Parser)]
#[command(
    name = "patchline",
    version,
    about = "Incremental patcher pipeline orchestrator"
)]
struct Cli {
    /// Workspace root (defaults to the current directory).
    #[arg(long, global = true, value_name = "DIR")]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Decide whether regeneration is needed and drive the pipeline.
    Run {
        /// Force regeneration regardless of every other axis.
        #[arg(long)]
        force: bool,
        /// Patch-only mode: never prompt, abort on the first failed job.
        #[arg(long)]
        headless: bool,
        /// Preferred language passed through to every job.
        #[arg(long, value_name = "CODE")]
        lang: Option<String>,
        /// Progress-window coordinates passed through to every job.
        #[arg(long, value_name = "X,Y")]
        progress_at: Option<String>,
        /// Treat every enabled input as a dependency of every artifact.
        #[arg(long)]
        all_deps: bool,
        /// Disable streaming job output to the per-job log.
        #[arg(long)]
        no_stream: bool,
    },
    /// Run the import phase only.
    Import,
    /// List discovered, blocked, and skipped patcher packages.
    Jobs,
    /// Print persisted run state without mutating anything.
    Status,
    /// Enable a job by declared name.
    Enable { job: String },
    /// Disable a job by declared name.
    Disable { job: String },
    /// Print the effective configuration and exit.
    Settings,
}

fn main() {
    patchline::logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = match cli.root {
        Some(root) => root,
        None => std::env::current_dir().context("resolve current directory")?,
    };
    match cli.command {
        Command::Run {
            force,
            headless,
            lang,
            progress_at,
            all_deps,
            no_stream,
        } => {
            let progress_at = progress_at.map(|raw| parse_coords(&raw)).transpose()?;
            let options = RunOptions {
                force,
                all_deps,
                no_stream,
                language: lang,
                progress_at,
            };
            cmd_run(root, options, headless)
        }
        Command::Import => cmd_import(root),
        Command::Jobs => cmd_jobs(root),
        Command::Status => cmd_status(root),
        Command::Enable { job } => cmd_set_enabled(root, &job, true),
        Command::Disable { job } => cmd_set_enabled(root, &job, false),
        Command::Settings => cmd_settings(root),
    }
}

fn cmd_run(root: PathBuf, options: RunOptions, headless: bool) -> Result<i32> {
    let ctx = RunContext::prepare(&root, options)?;
    for blocked in &ctx.blocked {
        eprintln!("blocked: {} ({})", blocked.name, blocked.reason);
    }
    if headless {
        drive(root, ctx, AlwaysAbort)
    } else {
        drive(root, ctx, ConfirmPolicy)
    }
}

fn drive<P>(
    root: PathBuf,
    ctx: RunContext<patchline::io::catalog::FsCatalog>,
    policy: P,
) -> Result<i32>
where
    P: FailurePolicy + Send + 'static,
{
    let worker = Worker::spawn(ctx, ProcessLauncher, policy);
    worker.run_changes();
    let report = worker
        .shutdown()
        .ok_or_else(|| anyhow!("worker finished without producing a run report"))??;

    let runs_dir = WorkspacePaths::new(&root).run_dir(&report.run_id);
    match report.stop {
        RunStop::UpToDate => {
            println!("Everything up to date; no jobs run.");
            Ok(exit_codes::OK)
        }
        RunStop::Completed => {
            if report.failed.is_empty() {
                println!(
                    "Run {} completed: {} job(s){}.",
                    report.run_id,
                    report.results.len(),
                    if report.merged { ", merged" } else { "" }
                );
            } else {
                println!(
                    "Run {} finished with {} failed job(s): {}. Logs: {}",
                    report.run_id,
                    report.failed.len(),
                    report.failed.join(", "),
                    runs_dir.display()
                );
            }
            Ok(exit_codes::OK)
        }
        RunStop::Aborted { job } => {
            eprintln!(
                "Run aborted after job '{job}' failed. Logs: {}",
                runs_dir.display()
            );
            Ok(exit_codes::ABORTED)
        }
        RunStop::Cancelled => {
            eprintln!("Run cancelled at a job boundary.");
            Ok(exit_codes::ABORTED)
        }
    }
}

fn cmd_import(root: PathBuf) -> Result<i32> {
    let mut ctx = RunContext::prepare(&root, RunOptions::default())?;
    ctx.start_import()?;
    println!("Import complete.");
    Ok(exit_codes::OK)
}

fn cmd_jobs(root: PathBuf) -> Result<i32> {
    let ctx = RunContext::prepare(&root, RunOptions::default())?;
    if ctx.jobs.is_empty() && ctx.blocked.is_empty() && ctx.skipped.is_empty() {
        println!("No patcher packages found.");
        return Ok(exit_codes::OK);
    }
    if !ctx.jobs.is_empty() {
        println!("Jobs (in execution order):");
        for (index, job) in ctx.jobs.iter().enumerate() {
            let enabled = ctx.store.enabled(&job.name, job.enabled_at_start);
            println!(
                "  {}. {} -> {} (v{}){}",
                index + 1,
                job.name,
                job.artifact,
                job.version,
                if enabled { "" } else { " [disabled]" }
            );
        }
    }
    if !ctx.blocked.is_empty() {
        println!("Blocked (stale contract, not executed):");
        for blocked in &ctx.blocked {
            println!("  - {}: {}", blocked.name, blocked.reason);
        }
    }
    if !ctx.skipped.is_empty() {
        println!("Skipped packages:");
        for skipped in &ctx.skipped {
            println!("  - {}: {}", skipped.package_dir.display(), skipped.reason);
        }
    }
    Ok(exit_codes::OK)
}

fn cmd_status(root: PathBuf) -> Result<i32> {
    let paths = WorkspacePaths::new(&root);
    let store = StateStore::new(&paths.state_path, &paths.jobs_path);
    match store.load() {
        None => println!("No prior run state."),
        Some(state) => {
            println!("Last successful tool version: {}", state.tool_version);
            println!("Crash flag: {}", state.crashed);
            println!("Inputs recorded: {}", state.inputs.len());
            println!("Artifacts recorded: {}", state.masters.len());
        }
    }
    Ok(exit_codes::OK)
}

fn cmd_set_enabled(root: PathBuf, job: &str, enabled: bool) -> Result<i32> {
    let ctx = RunContext::prepare(&root, RunOptions::default())?;
    if !ctx
        .jobs
        .iter()
        .any(|known| known.name.eq_ignore_ascii_case(job))
    {
        eprintln!("warning: no discovered job named '{job}' (preference saved anyway)");
    }
    ctx.store.set_enabled(job, enabled)?;
    println!(
        "Job '{job}' {}.",
        if enabled { "enabled" } else { "disabled" }
    );
    Ok(exit_codes::OK)
}

fn cmd_settings(root: PathBuf) -> Result<i32> {
    let paths = WorkspacePaths::new(&root);
    let config = load_config(&paths.config_path)?;
    let rendered = toml::to_string_pretty(&config).context("render config")?;
    print!("{rendered}");
    Ok(exit_codes::OK)
}

/// Parse `X,Y` progress coordinates.
fn parse_coords(raw: &str) -> Result<(i64, i64)> {
    let (x, y) = raw
        .split_once(',')
        .ok_or_else(|| anyhow!("expected X,Y coordinates, got '{raw}'"))?;
    let x = x.trim().parse().with_context(|| format!("parse X in '{raw}'"))?;
    let y = y.trim().parse().with_context(|| format!("parse Y in '{raw}'"))?;
    Ok((x, y))
}
