//! End-to-end pipeline scenarios over a scripted launcher.

use std::sync::atomic::AtomicBool;

use patchline::core::types::Decision;
use patchline::run::{RunOptions, RunStop};
use patchline::test_support::{ScriptedLauncher, ScriptedPolicy, TestWorkspace, manifest};

fn no_cancel() -> AtomicBool {
    AtomicBool::new(false)
}

fn abort_policy() -> ScriptedPolicy {
    ScriptedPolicy::new(Decision::Abort)
}

/// First run: empty persisted state forces import and regeneration, every
/// job runs in load order, success commits a full snapshot. Second run with
/// zero changes: nothing runs.
#[test]
fn first_run_executes_everything_then_second_run_is_noop() {
    let ws = TestWorkspace::new().expect("workspace");
    ws.write_order(&["base.pack", "b.out", "a.out"]).expect("order");
    ws.write_input("base.pack", 1_000).expect("input");
    ws.write_package("alpha", &manifest("alpha", "a.out")).expect("alpha");
    ws.write_package("beta", &manifest("beta", "b.out")).expect("beta");

    let launcher = ScriptedLauncher::new();
    let policy = abort_policy();
    let mut ctx = ws.context(RunOptions::default()).expect("context");
    let report = ctx
        .run_changes(&launcher, &policy, &no_cancel(), |_| {})
        .expect("run");

    assert_eq!(report.stop, RunStop::Completed);
    // The load order puts b.out ahead of a.out.
    assert_eq!(launcher.launched(), vec!["beta", "alpha"]);
    // A fresh import means the jobs must not skip their own.
    assert!(launcher.specs().iter().all(|spec| !spec.skip_import));
    let state = ctx.store.load().expect("state committed");
    assert!(!state.crashed);
    assert_eq!(state.inputs.len(), 1);

    // Simulate the artifacts the jobs produced, then run again unchanged.
    ws.write_artifact("a.out").expect("artifact");
    ws.write_artifact("b.out").expect("artifact");

    let launcher = ScriptedLauncher::new();
    let mut ctx = ws.context(RunOptions::default()).expect("context");
    let report = ctx
        .run_changes(&launcher, &policy, &no_cancel(), |_| {})
        .expect("run");

    assert_eq!(report.stop, RunStop::UpToDate);
    assert!(launcher.launched().is_empty());
}

#[test]
fn changed_fingerprint_triggers_regeneration() {
    let ws = TestWorkspace::new().expect("workspace");
    ws.write_order(&["base.pack", "a.out"]).expect("order");
    ws.write_input("base.pack", 1_000).expect("input");
    ws.write_package("alpha", &manifest("alpha", "a.out")).expect("alpha");

    let policy = abort_policy();
    let mut ctx = ws.context(RunOptions::default()).expect("context");
    ctx.run_changes(&ScriptedLauncher::new(), &policy, &no_cancel(), |_| {})
        .expect("first run");
    ws.write_artifact("a.out").expect("artifact");

    // Same size and identity, newer fingerprint.
    ws.touch_input("base.pack", 2_000).expect("touch");

    let launcher = ScriptedLauncher::new();
    let mut ctx = ws.context(RunOptions::default()).expect("context");
    let report = ctx
        .run_changes(&launcher, &policy, &no_cancel(), |_| {})
        .expect("run");
    assert_eq!(report.stop, RunStop::Completed);
    assert_eq!(launcher.launched(), vec!["alpha"]);
}

#[test]
fn crash_flag_forces_regeneration_with_no_other_changes() {
    let ws = TestWorkspace::new().expect("workspace");
    ws.write_order(&["base.pack", "a.out"]).expect("order");
    ws.write_input("base.pack", 1_000).expect("input");
    ws.write_package("alpha", &manifest("alpha", "a.out")).expect("alpha");

    let policy = abort_policy();
    let mut ctx = ws.context(RunOptions::default()).expect("context");
    ctx.run_changes(&ScriptedLauncher::new(), &policy, &no_cancel(), |_| {})
        .expect("first run");
    ws.write_artifact("a.out").expect("artifact");

    // Simulate a prior abnormal termination.
    ctx.store.mark_crashed().expect("mark crashed");

    let launcher = ScriptedLauncher::new();
    let mut ctx = ws.context(RunOptions::default()).expect("context");
    let report = ctx
        .run_changes(&launcher, &policy, &no_cancel(), |_| {})
        .expect("run");
    assert_eq!(report.stop, RunStop::Completed);
    assert_eq!(launcher.launched(), vec!["alpha"]);
    assert!(!ctx.store.load().expect("state").crashed);
}

/// Three jobs, the second fails. Continue executes the third and records the
/// failure; abort never reaches the third and leaves the crash flag set.
#[test]
fn fail_continue_and_abort_policies() {
    let setup = || {
        let ws = TestWorkspace::new().expect("workspace");
        ws.write_order(&["base.pack", "a.out", "b.out", "c.out"])
            .expect("order");
        ws.write_input("base.pack", 1_000).expect("input");
        ws.write_package("alpha", &manifest("alpha", "a.out")).expect("alpha");
        ws.write_package("bravo", &manifest("bravo", "b.out")).expect("bravo");
        ws.write_package("charlie", &manifest("charlie", "c.out")).expect("charlie");
        ws
    };

    // Continue: job 3 still runs, job 2 is recorded as failed.
    let ws = setup();
    let launcher = ScriptedLauncher::new().with_exit("bravo", 1);
    let policy = ScriptedPolicy::new(Decision::Continue);
    let mut ctx = ws.context(RunOptions::default()).expect("context");
    let report = ctx
        .run_changes(&launcher, &policy, &no_cancel(), |_| {})
        .expect("run");
    assert_eq!(report.stop, RunStop::Completed);
    assert_eq!(launcher.launched(), vec!["alpha", "bravo", "charlie"]);
    assert_eq!(report.failed, vec!["bravo"]);
    assert_eq!(policy.asked(), vec!["bravo"]);
    // An accepted failure still leaves the pipeline incomplete.
    assert!(ctx.store.load().expect("state").crashed);

    // Abort: job 3 never launches and the crash flag stays set.
    let ws = setup();
    let launcher = ScriptedLauncher::new().with_exit("bravo", 1);
    let policy = abort_policy();
    let mut ctx = ws.context(RunOptions::default()).expect("context");
    let report = ctx
        .run_changes(&launcher, &policy, &no_cancel(), |_| {})
        .expect("run");
    assert_eq!(
        report.stop,
        RunStop::Aborted {
            job: "bravo".to_string()
        }
    );
    assert_eq!(launcher.launched(), vec!["alpha", "bravo"]);
    assert!(ctx.store.load().expect("state").crashed);
}

/// Enabling merge without the ordering pass is fatal before any job runs.
#[test]
fn merge_without_ordering_pass_fails_before_any_job() {
    let ws = TestWorkspace::new().expect("workspace");
    ws.write_order(&["base.pack", "a.out"]).expect("order");
    ws.write_input("base.pack", 1_000).expect("input");
    ws.write_package("alpha", &manifest("alpha", "a.out")).expect("alpha");
    ws.write_config(
        r#"
            [merge]
            enabled = true
            command = ["merge-tool"]
        "#,
    )
    .expect("config");

    let launcher = ScriptedLauncher::new();
    let policy = abort_policy();
    let mut ctx = ws.context(RunOptions::default()).expect("context");
    let err = ctx
        .run_changes(&launcher, &policy, &no_cancel(), |_| {})
        .expect_err("must fail");
    assert!(err.to_string().contains("ordering pass"));
    assert!(launcher.launched().is_empty());
    // Config-level precondition: no state was touched.
    assert!(ctx.store.load().is_none());
}

/// Merge executes as another job-like process, fed the ordered artifact
/// identifiers of this run.
#[test]
fn merge_receives_ordered_artifact_list() {
    let ws = TestWorkspace::new().expect("workspace");
    ws.write_order(&["base.pack", "b.out", "a.out"]).expect("order");
    ws.write_input("base.pack", 1_000).expect("input");
    ws.write_package("alpha", &manifest("alpha", "a.out")).expect("alpha");
    ws.write_package("beta", &manifest("beta", "b.out")).expect("beta");
    ws.write_config(
        r#"
            [sort]
            enabled = true
            command = ["sh", "-c", "exit 0"]

            [merge]
            enabled = true
            command = ["merge-tool", "--combine"]
        "#,
    )
    .expect("config");

    let launcher = ScriptedLauncher::new();
    let policy = abort_policy();
    let mut ctx = ws.context(RunOptions::default()).expect("context");
    let report = ctx
        .run_changes(&launcher, &policy, &no_cancel(), |_| {})
        .expect("run");

    assert_eq!(report.stop, RunStop::Completed);
    assert!(report.merged);
    let specs = launcher.specs();
    let merge = specs.last().expect("merge spec");
    assert_eq!(merge.job, "merge");
    assert_eq!(
        merge.command,
        vec!["merge-tool", "--combine", "b.out", "a.out"]
    );
}

#[test]
fn missing_required_input_is_fatal_and_marks_crashed() {
    let ws = TestWorkspace::new().expect("workspace");
    ws.write_order(&["base.pack", "a.out"]).expect("order");
    ws.write_input("base.pack", 1_000).expect("input");
    ws.write_package(
        "alpha",
        r#"
            name = "alpha"
            artifact = "a.out"
            version = "1.0.0"
            contract = 1
            capabilities = ["describe", "run"]
            requires = ["ghost.pack"]
            command = ["run.sh"]
        "#,
    )
    .expect("alpha");

    let launcher = ScriptedLauncher::new();
    let policy = abort_policy();
    let mut ctx = ws.context(RunOptions::default()).expect("context");
    let err = ctx
        .run_changes(&launcher, &policy, &no_cancel(), |_| {})
        .expect_err("must fail");
    assert!(err.to_string().contains("ghost.pack"));
    assert!(launcher.launched().is_empty());
    assert!(ctx.store.load().expect("state").crashed);
}

#[test]
fn disabled_jobs_are_skipped() {
    let ws = TestWorkspace::new().expect("workspace");
    ws.write_order(&["base.pack", "a.out", "b.out"]).expect("order");
    ws.write_input("base.pack", 1_000).expect("input");
    ws.write_package("alpha", &manifest("alpha", "a.out")).expect("alpha");
    ws.write_package("beta", &manifest("beta", "b.out")).expect("beta");

    let launcher = ScriptedLauncher::new();
    let policy = abort_policy();
    let mut ctx = ws.context(RunOptions::default()).expect("context");
    ctx.store.set_enabled("alpha", false).expect("disable");
    let report = ctx
        .run_changes(&launcher, &policy, &no_cancel(), |_| {})
        .expect("run");

    assert_eq!(report.stop, RunStop::Completed);
    assert_eq!(launcher.launched(), vec!["beta"]);
}

/// With every axis clean, a job's own predicate gets the last word.
#[test]
fn job_predicate_requests_regeneration() {
    let ws = TestWorkspace::new().expect("workspace");
    ws.write_order(&["base.pack", "a.out"]).expect("order");
    ws.write_input("base.pack", 1_000).expect("input");
    ws.write_package(
        "alpha",
        r#"
            name = "alpha"
            artifact = "a.out"
            version = "1.0.0"
            contract = 1
            capabilities = ["describe", "run"]
            command = ["run.sh"]
            probe_command = ["probe.sh"]
        "#,
    )
    .expect("alpha");

    let policy = abort_policy();
    let mut ctx = ws.context(RunOptions::default()).expect("context");
    ctx.run_changes(&ScriptedLauncher::new(), &policy, &no_cancel(), |_| {})
        .expect("first run");
    ws.write_artifact("a.out").expect("artifact");

    // Probe says no: nothing runs.
    let launcher = ScriptedLauncher::new().with_probe("alpha", false);
    let mut ctx = ws.context(RunOptions::default()).expect("context");
    let report = ctx
        .run_changes(&launcher, &policy, &no_cancel(), |_| {})
        .expect("run");
    assert_eq!(report.stop, RunStop::UpToDate);
    assert_eq!(launcher.probed(), vec!["alpha"]);
    assert!(launcher.launched().is_empty());

    // Probe says yes: the job runs even with every axis clean.
    let launcher = ScriptedLauncher::new().with_probe("alpha", true);
    let mut ctx = ws.context(RunOptions::default()).expect("context");
    let report = ctx
        .run_changes(&launcher, &policy, &no_cancel(), |_| {})
        .expect("run");
    assert_eq!(report.stop, RunStop::Completed);
    assert_eq!(launcher.launched(), vec!["alpha"]);
}

/// Lifecycle hooks run around the job and see the outcome; a failing hook
/// never aborts the run.
#[test]
fn lifecycle_hooks_run_around_the_job() {
    let ws = TestWorkspace::new().expect("workspace");
    ws.write_order(&["base.pack", "a.out"]).expect("order");
    ws.write_input("base.pack", 1_000).expect("input");
    ws.write_package(
        "alpha",
        r#"
            name = "alpha"
            artifact = "a.out"
            version = "1.0.0"
            contract = 1
            capabilities = ["describe", "run"]
            command = ["run.sh"]
            on_start_command = ["sh", "-c", "echo started > hook_start.txt"]
            on_exit_command = ["sh", "-c", "echo $1 > hook_exit.txt", "hook"]
        "#,
    )
    .expect("alpha");

    let launcher = ScriptedLauncher::new().with_exit("alpha", 1);
    let policy = ScriptedPolicy::new(Decision::Continue);
    let mut ctx = ws.context(RunOptions::default()).expect("context");
    let report = ctx
        .run_changes(&launcher, &policy, &no_cancel(), |_| {})
        .expect("run");
    assert_eq!(report.stop, RunStop::Completed);

    let package = ws.packages_dir().join("alpha");
    let started = std::fs::read_to_string(package.join("hook_start.txt")).expect("start marker");
    assert_eq!(started.trim(), "started");
    let exited = std::fs::read_to_string(package.join("hook_exit.txt")).expect("exit marker");
    assert_eq!(exited.trim(), "failure");
}

#[test]
fn cancel_is_honored_at_the_first_job_boundary() {
    let ws = TestWorkspace::new().expect("workspace");
    ws.write_order(&["base.pack", "a.out"]).expect("order");
    ws.write_input("base.pack", 1_000).expect("input");
    ws.write_package("alpha", &manifest("alpha", "a.out")).expect("alpha");

    let launcher = ScriptedLauncher::new();
    let policy = abort_policy();
    let mut ctx = ws.context(RunOptions::default()).expect("context");
    let cancel = AtomicBool::new(true);
    let report = ctx
        .run_changes(&launcher, &policy, &cancel, |_| {})
        .expect("run");

    assert_eq!(report.stop, RunStop::Cancelled);
    assert!(launcher.launched().is_empty());
    assert!(ctx.store.load().expect("state").crashed);
}

/// The launch contract flags reflect run options and config.
#[test]
fn launch_specs_carry_the_contract_flags() {
    let ws = TestWorkspace::new().expect("workspace");
    ws.write_order(&["base.pack", "a.out"]).expect("order");
    ws.write_input("base.pack", 1_000).expect("input");
    ws.write_package("alpha", &manifest("alpha", "a.out")).expect("alpha");

    let launcher = ScriptedLauncher::new();
    let policy = abort_policy();
    let options = RunOptions {
        force: true,
        no_stream: true,
        language: Some("de".to_string()),
        progress_at: Some((12, 34)),
        ..RunOptions::default()
    };
    let mut ctx = ws.context(options).expect("context");
    ctx.run_changes(&launcher, &policy, &no_cancel(), |_| {})
        .expect("run");

    let specs = launcher.specs();
    assert_eq!(specs.len(), 1);
    let spec = &specs[0];
    assert!(spec.force);
    assert!(!spec.stream);
    assert_eq!(spec.language, "de");
    assert_eq!(spec.progress_at, Some((12, 34)));
    assert_eq!(spec.max_memory_mb, 2048);
}
