//! Ordered dependency-drain comparison between persisted and current master
//! lists.
//!
//! An artifact's declared masters must keep their relative order across runs:
//! removing or reordering a persisted master invalidates the artifact, while
//! appending new masters is tolerated unless the new master is itself a
//! freshly-changed input the job cares about.

use std::collections::{BTreeMap, BTreeSet};

use crate::core::types::fold_id;

/// Result of draining a persisted master list against the current list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainOutcome {
    /// Every persisted entry was found in the current list in relative order.
    pub drained: bool,
    /// Current entries not matched against any persisted entry, in order.
    pub unmatched: Vec<String>,
}

/// Walk `current` once, consuming `persisted` entries in relative order.
///
/// Each persisted entry is matched at most once; a duplicate in the current
/// list behaves like a new dependency. Comparison is case-insensitive.
pub fn drain(persisted: &[String], current: &[String]) -> DrainOutcome {
    let mut next = 0usize;
    let mut unmatched = Vec::new();
    for dep in current {
        if next < persisted.len() && fold_id(dep) == fold_id(&persisted[next]) {
            next += 1;
        } else {
            unmatched.push(dep.clone());
        }
    }
    DrainOutcome {
        drained: next == persisted.len(),
        unmatched,
    }
}

/// Whether a leftover (new) dependency forces regeneration.
///
/// A new master matters only when it is itself a newly-changed input sharing
/// at least one declared-interest category with the jobs under consideration.
pub fn new_dependency_triggers(
    unmatched: &[String],
    changed_inputs: &BTreeSet<String>,
    interest: &BTreeSet<String>,
    categories: &BTreeMap<String, BTreeSet<String>>,
) -> bool {
    unmatched.iter().any(|dep| {
        let dep = fold_id(dep);
        if !changed_inputs.contains(&dep) {
            return false;
        }
        categories
            .get(&dep)
            .is_some_and(|cats| cats.iter().any(|c| interest.contains(c)))
    })
}
