//! Continue/abort decision port for failed jobs.
//!
//! The orchestrator never owns a dialog. When a job fails it invokes a
//! [`FailurePolicy`] synchronously; interactive front-ends prompt, headless
//! callers plug in a fixed policy.

use anyhow::{Context, Result};

use crate::core::types::{Decision, JobResult};

/// Synchronous decision point invoked after a job fails.
pub trait FailurePolicy {
    fn on_failure(&self, result: &JobResult) -> Result<Decision>;
}

/// Abort the run on the first failure. The default for headless runs.
pub struct AlwaysAbort;

impl FailurePolicy for AlwaysAbort {
    fn on_failure(&self, _result: &JobResult) -> Result<Decision> {
        Ok(Decision::Abort)
    }
}

/// Record failures and keep going.
pub struct AlwaysContinue;

impl FailurePolicy for AlwaysContinue {
    fn on_failure(&self, _result: &JobResult) -> Result<Decision> {
        Ok(Decision::Continue)
    }
}

/// Ask the user on the terminal.
pub struct ConfirmPolicy;

impl FailurePolicy for ConfirmPolicy {
    fn on_failure(&self, result: &JobResult) -> Result<Decision> {
        let detail = match result.exit_code {
            Some(code) => format!("exit code {code}"),
            None => "killed by signal".to_string(),
        };
        let confirmed = dialoguer::Confirm::new()
            .with_prompt(format!(
                "Job '{}' failed ({detail}). Continue with the remaining jobs?",
                result.job
            ))
            .default(false)
            .interact()
            .context("read continue/abort choice")?;
        Ok(if confirmed {
            Decision::Continue
        } else {
            Decision::Abort
        })
    }
}
