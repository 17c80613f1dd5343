//! Stable job ordering against the external load order.
//!
//! The load order is an externally authoritative total order over artifact
//! identifiers. Jobs whose artifact appears in it sort by its position; jobs
//! absent from it are appended afterward in discovery order. The permutation
//! is stable and idempotent: an unchanged order list and job set always yield
//! the same sequence.

use std::collections::HashMap;

use crate::core::types::fold_id;

/// Compute the ordered permutation of `artifacts` against `load_order`.
///
/// Returns indices into `artifacts`: first the artifacts present in the load
/// order (by their position there), then the rest in their original order.
pub fn ordered_positions(artifacts: &[String], load_order: &[String]) -> Vec<usize> {
    let positions: HashMap<String, usize> = load_order
        .iter()
        .enumerate()
        .map(|(index, id)| (fold_id(id), index))
        .collect();

    let mut listed: Vec<(usize, usize)> = Vec::new();
    let mut unlisted: Vec<usize> = Vec::new();
    for (index, artifact) in artifacts.iter().enumerate() {
        match positions.get(&fold_id(artifact)) {
            Some(&position) => listed.push((position, index)),
            None => unlisted.push(index),
        }
    }

    // Stable by construction: discovery index breaks position ties, which can
    // only arise when the order list itself repeats an identifier.
    listed.sort_by_key(|&(position, index)| (position, index));

    listed
        .into_iter()
        .map(|(_, index)| index)
        .chain(unlisted)
        .collect()
}

/// Reorder `items` in place according to [`ordered_positions`].
pub fn apply_order<T>(items: Vec<T>, load_order: &[String], artifact_of: impl Fn(&T) -> &str) -> Vec<T> {
    let artifacts: Vec<String> = items
        .iter()
        .map(|item| artifact_of(item).to_string())
        .collect();
    let order = ordered_positions(&artifacts, load_order);

    let mut slots: Vec<Option<T>> = items.into_iter().map(Some).collect();
    order
        .into_iter()
        .filter_map(|index| slots[index].take())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn listed_artifacts_sort_by_load_order_position() {
        let order = ids(&["c.out", "a.out", "b.out"]);
        let artifacts = ids(&["a.out", "b.out", "c.out"]);
        assert_eq!(ordered_positions(&artifacts, &order), vec![2, 0, 1]);
    }

    #[test]
    fn unlisted_artifacts_append_in_discovery_order() {
        let order = ids(&["b.out"]);
        let artifacts = ids(&["x.out", "b.out", "y.out"]);
        assert_eq!(ordered_positions(&artifacts, &order), vec![1, 0, 2]);
    }

    #[test]
    fn matching_is_case_insensitive() {
        let order = ids(&["B.OUT", "a.out"]);
        let artifacts = ids(&["A.out", "b.out"]);
        assert_eq!(ordered_positions(&artifacts, &order), vec![1, 0]);
    }

    /// Ordering is stable under discovery permutations: for every input
    /// permutation the final artifact sequence is identical.
    #[test]
    fn final_sequence_is_invariant_under_discovery_permutations() {
        let order = ids(&["one", "two", "three"]);
        let permutations: &[&[&str]] = &[
            &["one", "two", "three"],
            &["three", "two", "one"],
            &["two", "three", "one"],
        ];
        for permutation in permutations {
            let got = apply_order(ids(permutation), &order, |a| a.as_str());
            assert_eq!(got, ids(&["one", "two", "three"]));
        }
    }

    #[test]
    fn apply_order_is_idempotent() {
        let order = ids(&["b", "a"]);
        let once = apply_order(ids(&["a", "b", "z"]), &order, |a| a.as_str());
        let twice = apply_order(once.clone(), &order, |a| a.as_str());
        assert_eq!(once, twice);
    }

    #[test]
    fn empty_load_order_preserves_discovery_order() {
        let got = apply_order(ids(&["b", "a"]), &[], |a| a.as_str());
        assert_eq!(got, ids(&["b", "a"]));
    }
}
