//! Conservative multi-axis invalidation decisions.
//!
//! Each axis is one independent criterion for forcing regeneration. Axes are
//! evaluated short-circuit in priority order; the first that fires decides
//! the verdict. The engine itself is pure: callers gather the inputs (live
//! snapshot, persisted state, settings fingerprint, interest categories) and
//! evaluate any per-job custom predicate only when no axis fired.

use std::collections::{BTreeMap, BTreeSet};

use crate::core::dependency::{drain, new_dependency_triggers};
use crate::core::types::{PersistedSnapshot, Snapshot, fold_id};

/// The axis that forced regeneration, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    /// Explicit force flag set by the caller.
    Forced,
    /// No prior output artifact exists.
    MissingArtifact,
    /// No persisted state from any prior run.
    NoHistory,
    /// Crash flag set by a previous incomplete run.
    CrashRecovery,
    /// Tool version changed since the last successful run.
    VersionChanged,
    /// A declared important setting changed.
    SettingsChanged,
    /// Input set size or identity differs from the persisted snapshot.
    InputSetChanged,
    /// An input's fingerprint changed relative to the persisted snapshot.
    FingerprintChanged,
    /// Dependency snapshot mismatch (deep, post-import check only).
    MastersChanged,
}

/// Everything the engine needs to reach a verdict.
#[derive(Debug, Clone)]
pub struct Probe<'a> {
    /// Explicit force request from the caller.
    pub force: bool,
    /// Every enabled job's prior output artifact exists on disk.
    pub artifacts_present: bool,
    /// State of the last fully successful run, if any survived.
    pub persisted: Option<&'a PersistedSnapshot>,
    /// Current tool version, already normalized (`core::version`).
    pub tool_version: u32,
    /// Current fingerprint over the settings that affect generated output.
    pub settings_fingerprint: u64,
    /// Fresh snapshot of the enabled inputs and declared masters.
    pub current: &'a Snapshot,
    /// Union of the enabled jobs' declared interest categories (case-folded).
    pub interest: &'a BTreeSet<String>,
    /// Case-folded input id -> content categories it provides.
    pub categories: &'a BTreeMap<String, BTreeSet<String>>,
    /// Treat every enabled input as a master of every artifact.
    pub all_deps: bool,
}

/// Verdict for the import phase: axes 1-8 minus the deep dependency check.
pub fn needs_import(probe: &Probe) -> bool {
    first_trigger(probe, false).is_some()
}

/// Verdict for the regeneration phase.
///
/// `imported` selects the deeper post-import dependency comparison;
/// `job_requested` is the pre-evaluated outcome of the jobs' own predicates
/// and is only consulted when no axis fires.
pub fn needs_patch(probe: &Probe, imported: bool, job_requested: bool) -> bool {
    first_trigger(probe, imported).is_some() || job_requested
}

/// Evaluate the axes in priority order; `deep` enables the dependency-drain
/// comparison that is only meaningful once import has populated the catalog.
pub fn first_trigger(probe: &Probe, deep: bool) -> Option<Axis> {
    if probe.force {
        return Some(Axis::Forced);
    }
    if !probe.artifacts_present {
        return Some(Axis::MissingArtifact);
    }
    let Some(persisted) = probe.persisted else {
        return Some(Axis::NoHistory);
    };
    if persisted.crashed {
        return Some(Axis::CrashRecovery);
    }
    if persisted.tool_version != probe.tool_version {
        return Some(Axis::VersionChanged);
    }
    if persisted.settings_fingerprint != probe.settings_fingerprint {
        return Some(Axis::SettingsChanged);
    }
    if input_set_differs(probe.current, persisted) {
        return Some(Axis::InputSetChanged);
    }
    if fingerprints_differ(probe.current, persisted) {
        return Some(Axis::FingerprintChanged);
    }
    if deep && masters_mismatch(probe, persisted) {
        return Some(Axis::MastersChanged);
    }
    None
}

/// Input ids (case-folded) that are new or carry a changed fingerprint
/// relative to the persisted snapshot.
pub fn changed_inputs(current: &Snapshot, persisted: &PersistedSnapshot) -> BTreeSet<String> {
    let stamped: BTreeMap<String, u64> = persisted
        .inputs
        .iter()
        .map(|stamp| (fold_id(&stamp.id), stamp.fingerprint))
        .collect();

    current
        .inputs
        .iter()
        .filter(|stamp| stamped.get(&fold_id(&stamp.id)) != Some(&stamp.fingerprint))
        .map(|stamp| fold_id(&stamp.id))
        .collect()
}

/// Position-by-position identity comparison in enabled-input order.
fn input_set_differs(current: &Snapshot, persisted: &PersistedSnapshot) -> bool {
    if current.inputs.len() != persisted.inputs.len() {
        return true;
    }
    current
        .inputs
        .iter()
        .zip(&persisted.inputs)
        .any(|(now, then)| fold_id(&now.id) != fold_id(&then.id))
}

/// Fingerprint comparison for inputs present in both snapshots.
fn fingerprints_differ(current: &Snapshot, persisted: &PersistedSnapshot) -> bool {
    let stamped: BTreeMap<String, u64> = persisted
        .inputs
        .iter()
        .map(|stamp| (fold_id(&stamp.id), stamp.fingerprint))
        .collect();

    current.inputs.iter().any(|stamp| {
        stamped
            .get(&fold_id(&stamp.id))
            .is_some_and(|&fingerprint| fingerprint != stamp.fingerprint)
    })
}

/// Deep dependency comparison over the union of persisted and current
/// artifacts. A persisted list that fails to drain forces regeneration;
/// leftover current masters force it only on interest-category overlap with
/// freshly-changed inputs.
fn masters_mismatch(probe: &Probe, persisted: &PersistedSnapshot) -> bool {
    let changed = changed_inputs(probe.current, persisted);
    let all_inputs: Vec<String> = probe
        .current
        .inputs
        .iter()
        .map(|stamp| stamp.id.clone())
        .collect();

    let mut seen: BTreeSet<String> = BTreeSet::new();
    for entry in &persisted.masters {
        seen.insert(fold_id(&entry.artifact));
        let current = match probe.current.masters_of(&entry.artifact) {
            Some(masters) if !probe.all_deps => masters,
            Some(_) => &all_inputs[..],
            // Artifact vanished from the current snapshot: nothing can drain
            // a non-empty persisted list.
            None if entry.masters.is_empty() => continue,
            None => return true,
        };
        let outcome = drain(&entry.masters, current);
        if !outcome.drained {
            return true;
        }
        if new_dependency_triggers(&outcome.unmatched, &changed, probe.interest, probe.categories) {
            return true;
        }
    }

    // Artifacts with no persisted counterpart: every declared master is new.
    for entry in &probe.current.masters {
        if seen.contains(&fold_id(&entry.artifact)) {
            continue;
        }
        let masters = if probe.all_deps {
            &all_inputs[..]
        } else {
            &entry.masters[..]
        };
        if new_dependency_triggers(masters, &changed, probe.interest, probe.categories) {
            return true;
        }
    }

    false
}
