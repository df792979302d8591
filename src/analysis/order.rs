//! Dependency-aware ordering of one cycle's changes.
//!
//! Each change both makes a path exist (`added_path`) and clears one
//! (`vacated_path`), either side possibly absent. Inside a group the
//! following "x before y" edges hold:
//!
//! 1. `vacated(y)` nests under `added(x)`: content is in place before it leaves.
//! 2. `added(y) == vacated(x)`: the space is cleared before it is reused.
//! 3. `added(y)` nests under `added(x)`: a parent exists before its children.
//! 4. `vacated(x)` nests under `vacated(y)`: children leave before their parent.
//!
//! Wip changes form their own leading group. Ties break on the resulting path,
//! then the vacated path.

use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeSet, BinaryHeap, HashMap};
use std::path::Path;

use super::change::LocalChange;

fn base_order(a: &LocalChange, b: &LocalChange) -> Ordering {
    primary_path(a)
        .cmp(&primary_path(b))
        .then_with(|| a.vacated_path().cmp(&b.vacated_path()))
}

fn primary_path(change: &LocalChange) -> Option<&Path> {
    change.added_path().or_else(|| change.vacated_path())
}

/// Strict ancestors of `path`, the root excluded.
fn parents(path: &Path) -> impl Iterator<Item = &Path> {
    path.ancestors()
        .skip(1)
        .filter(|p| !p.as_os_str().is_empty())
}

/// Sort changes so they can be applied one after the other.
pub fn final_sort(changes: Vec<LocalChange>) -> Vec<LocalChange> {
    let (wip, ready): (Vec<_>, Vec<_>) = changes.into_iter().partition(LocalChange::is_wip);
    let mut sorted = sort_group(wip);
    sorted.extend(sort_group(ready));
    sorted
}

fn sort_group(mut changes: Vec<LocalChange>) -> Vec<LocalChange> {
    if changes.len() < 2 {
        return changes;
    }
    // Index == rank in base order from here on.
    changes.sort_by(base_order);
    let successors = dependencies(&changes);

    let mut indegree = vec![0usize; changes.len()];
    for targets in &successors {
        for &y in targets {
            indegree[y] += 1;
        }
    }

    let mut remaining: BTreeSet<usize> = (0..changes.len()).collect();
    let mut ready: BinaryHeap<Reverse<usize>> = indegree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(i, _)| Reverse(i))
        .collect();
    let mut order = Vec::with_capacity(changes.len());

    while let Some(&first) = remaining.first() {
        let next = loop {
            match ready.pop() {
                Some(Reverse(i)) if remaining.contains(&i) => break i,
                Some(_) => continue,
                None => {
                    tracing::warn!("[order] dependency cycle, releasing {}", changes[first]);
                    break first;
                }
            }
        };
        remaining.remove(&next);
        order.push(next);
        for &y in &successors[next] {
            indegree[y] = indegree[y].saturating_sub(1);
            if indegree[y] == 0 && remaining.contains(&y) {
                ready.push(Reverse(y));
            }
        }
    }

    let mut slots: Vec<Option<LocalChange>> = changes.into_iter().map(Some).collect();
    order.into_iter().filter_map(|i| slots[i].take()).collect()
}

/// Successor lists of the "must precede" graph.
fn dependencies(changes: &[LocalChange]) -> Vec<Vec<usize>> {
    let mut added: HashMap<&Path, Vec<usize>> = HashMap::new();
    let mut vacated: HashMap<&Path, Vec<usize>> = HashMap::new();
    for (i, change) in changes.iter().enumerate() {
        if let Some(path) = change.added_path() {
            added.entry(path).or_default().push(i);
        }
        if let Some(path) = change.vacated_path() {
            vacated.entry(path).or_default().push(i);
        }
    }

    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); changes.len()];
    let mut edge = |x: usize, y: usize| {
        if x != y {
            successors[x].push(y);
        }
    };

    for (y, change) in changes.iter().enumerate() {
        if let Some(gone) = change.vacated_path() {
            for parent in parents(gone) {
                for &x in added.get(parent).into_iter().flatten() {
                    edge(x, y);
                }
            }
            for parent in parents(gone) {
                for &z in vacated.get(parent).into_iter().flatten() {
                    edge(y, z);
                }
            }
        }
        if let Some(path) = change.added_path() {
            for &x in vacated.get(path).into_iter().flatten() {
                edge(x, y);
            }
            for parent in parents(path) {
                for &x in added.get(parent).into_iter().flatten() {
                    edge(x, y);
                }
            }
        }
    }
    successors
}
