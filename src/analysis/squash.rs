//! Collapses descendant moves implied by a parent directory move.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::change::{LocalChange, is_child_of};

/// Drop descendant moves a parent `DirMove` already accounts for.
///
/// Moves are visited by current path, so every ancestor is settled before its
/// descendants. A descendant that kept its relative position is dropped; one
/// that moved again inside the subtree gets its previous path rebased on the
/// ancestor's destination and is flagged `needs_refetch`. An ancestor inherits
/// the wip flag of whatever it subsumes.
pub fn squash_moves(mut changes: Vec<LocalChange>) -> Vec<LocalChange> {
    let mut moves: Vec<usize> = changes
        .iter()
        .enumerate()
        .filter(|(_, change)| change.is_move())
        .map(|(i, _)| i)
        .collect();
    if moves.len() < 2 {
        return changes;
    }
    moves.sort_by(|&x, &y| changes[x].path().cmp(changes[y].path()));

    let mut dropped = vec![false; changes.len()];
    let mut dir_moves: HashMap<PathBuf, usize> = HashMap::new();

    for &b in &moves {
        let parents: Vec<PathBuf> = changes[b]
            .path()
            .ancestors()
            .skip(1)
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .collect();

        // Outermost ancestor first.
        for parent in parents.iter().rev() {
            let Some(&a) = dir_moves.get(parent) else {
                continue;
            };
            let Some((a_path, a_previous)) = changes[a]
                .as_move()
                .map(|m| (m.path.clone(), m.previous.path.clone()))
            else {
                continue;
            };
            let Some(m) = changes[b].as_move_mut() else {
                continue;
            };
            if !is_child_of(&a_previous, &m.previous.path) {
                continue;
            }
            let (Ok(relative), Ok(relative_previous)) = (
                m.path.strip_prefix(&a_path),
                m.previous.path.strip_prefix(&a_previous),
            ) else {
                continue;
            };

            crate::debug_event!(
                "squash",
                "descendant move",
                "{} -> {}",
                m.previous.path.display(),
                m.path.display()
            );
            let implied = relative == relative_previous;
            if !implied {
                m.previous.path = a_path.join(relative_previous);
                m.needs_refetch = true;
            }
            let wip = m.wip;
            if wip {
                changes[a].set_wip(true);
            }
            if implied {
                dropped[b] = true;
                break;
            }
        }

        if !dropped[b] && matches!(changes[b], LocalChange::DirMove(_)) {
            dir_moves.insert(changes[b].path().to_path_buf(), b);
        }
    }

    changes
        .into_iter()
        .zip(dropped)
        .filter_map(|(change, dropped)| (!dropped).then_some(change))
        .collect()
}
