//! Shared deterministic types for pipeline core logic.
//!
//! These types define stable contracts between core components. They should
//! not depend on external state or I/O and must remain deterministic across
//! runs.

use serde::{Deserialize, Serialize};

/// Case-fold an identifier token.
///
/// Artifact, input, and job identifiers all compare case-insensitively
/// because the filesystems this targets are case-insensitive.
pub fn fold_id(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Case-insensitive identifier equality.
pub fn ids_equal(a: &str, b: &str) -> bool {
    fold_id(a) == fold_id(b)
}

/// Cheap change-detection signal for an input: last-modified time in whole
/// seconds. Not a content hash.
pub type Fingerprint = u64;

/// One enabled input with its fingerprint, in enabled-input order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputStamp {
    pub id: String,
    pub fingerprint: Fingerprint,
}

/// Ordered dependency ("master") list one output artifact declares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMasters {
    pub artifact: String,
    pub masters: Vec<String>,
}

/// Point-in-time view of the enabled input set and declared masters.
///
/// Produced fresh each run from the live input set; compared against the
/// persisted snapshot, never mutated in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub inputs: Vec<InputStamp>,
    pub masters: Vec<ArtifactMasters>,
}

impl Snapshot {
    /// Look up the master list declared for `artifact` (case-insensitive).
    pub fn masters_of(&self, artifact: &str) -> Option<&[String]> {
        self.masters
            .iter()
            .find(|m| ids_equal(&m.artifact, artifact))
            .map(|m| m.masters.as_slice())
    }
}

/// What the last fully successful run looked like.
///
/// Owned exclusively by the persisted state store; written only immediately
/// before a risky operation (`crashed = true`) and immediately after a fully
/// successful run (`crashed` cleared, everything else refreshed).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSnapshot {
    pub inputs: Vec<InputStamp>,
    pub masters: Vec<ArtifactMasters>,
    /// Normalized numeric encoding of the tool version (see `core::version`).
    pub tool_version: u32,
    /// Fingerprint over the settings that affect generated output.
    pub settings_fingerprint: u64,
    /// The only field allowed to be `true` entering a run that did not
    /// complete cleanly; sole signal of prior abnormal termination.
    pub crashed: bool,
}

impl PersistedSnapshot {
    /// Look up the persisted master list for `artifact` (case-insensitive).
    pub fn masters_of(&self, artifact: &str) -> Option<&[String]> {
        self.masters
            .iter()
            .find(|m| ids_equal(&m.artifact, artifact))
            .map(|m| m.masters.as_slice())
    }
}

/// Outcome of one job process execution. Ephemeral: produced per execution,
/// consumed immediately by the failure policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResult {
    pub job: String,
    /// Exit code of the job process; `None` when killed by a signal.
    pub exit_code: Option<i32>,
    /// Launch-level error detail (spawn failure, unreadable log path).
    pub error: Option<String>,
}

impl JobResult {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && self.error.is_none()
    }
}

/// Decision returned by a failure policy after a job fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Record the failure and proceed to the next job.
    Continue,
    /// Terminate the whole run immediately without writing success state.
    Abort,
}

/// Orchestrator phase, reported through read-only progress queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    Idle,
    Importing,
    Running,
    Merging,
    Done,
    Aborted,
}
