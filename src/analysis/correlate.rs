//! Pairs deletions and creations sharing an inode into moves.
//!
//! The watcher never reports a rename as such: it emits an `unlink` for the
//! old path and an `add` for the new one, in either order. The correlator
//! walks one cycle's candidates in arrival order and joins them on the inode,
//! keeping a second index by path for events that carry no inode.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::change::{Deletion, LocalChange, Move, Put};
use super::error::{AnalysisError, AnalysisResult};
use crate::metadata::DocType;

/// Correlation state for one cycle. Discarded once [`finish`](Self::finish)
/// has produced the flattened changes.
#[derive(Debug, Default)]
pub struct Correlator {
    /// Changes in registration order; `None` marks a slot merged away.
    slots: Vec<Option<LocalChange>>,
    by_inode: HashMap<u64, usize>,
    by_path: HashMap<PathBuf, usize>,
}

fn addition(doc_type: DocType, put: Put) -> LocalChange {
    match doc_type {
        DocType::File => LocalChange::FileAddition(put),
        DocType::Folder => LocalChange::DirAddition(put),
    }
}

fn deletion(doc_type: DocType, deletion: Deletion) -> LocalChange {
    match doc_type {
        DocType::File => LocalChange::FileDeletion(deletion),
        DocType::Folder => LocalChange::DirDeletion(deletion),
    }
}

/// A move back to its own source is no move at all.
fn settle_move(doc_type: DocType, m: Move) -> LocalChange {
    if m.path != m.previous.path {
        return match doc_type {
            DocType::File => LocalChange::FileMove(m),
            DocType::Folder => LocalChange::DirMove(m),
        };
    }
    let put = Put {
        path: m.path,
        ino: m.ino,
        stats: m.stats,
        checksum: m.checksum,
        wip: m.wip,
    };
    match doc_type {
        DocType::File => LocalChange::FileUpdate(put),
        DocType::Folder => LocalChange::DirAddition(put),
    }
}

/// Deletion of a move's source, used when its destination vanished.
fn abandon_move(doc_type: DocType, m: Move) -> LocalChange {
    deletion(
        doc_type,
        Deletion {
            path: m.previous.path.clone(),
            ino: m.ino,
            previous: Some(m.previous),
            wip: false,
        },
    )
}

fn doc_type_of(change: &LocalChange) -> DocType {
    if change.is_dir() {
        DocType::Folder
    } else {
        DocType::File
    }
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the previous cycle's deferred changes ahead of new events.
    pub fn prepend_pending(&mut self, pending: Vec<LocalChange>) {
        if pending.is_empty() {
            return;
        }
        tracing::warn!("[correlator] prepend {} pending change(s)", pending.len());
        for change in pending {
            self.found(change);
        }
    }

    /// Fold one candidate into the cycle, in arrival order.
    pub fn push(&mut self, change: LocalChange) -> AnalysisResult<()> {
        match change {
            LocalChange::FileAddition(put) => self.on_add(put, DocType::File),
            LocalChange::DirAddition(put) => self.on_add(put, DocType::Folder),
            LocalChange::FileUpdate(put) => self.on_update(put),
            LocalChange::FileDeletion(d) => self.on_unlink(d, DocType::File)?,
            LocalChange::DirDeletion(d) => self.on_unlink(d, DocType::Folder)?,
            moved @ (LocalChange::FileMove(_) | LocalChange::DirMove(_)) => self.found(moved),
        }
        Ok(())
    }

    fn on_add(&mut self, put: Put, doc_type: DocType) {
        let Some((idx, existing)) = self.take_by_inode(put.ino) else {
            self.found(addition(doc_type, put));
            return;
        };

        let old_path = existing.path().to_path_buf();
        let same_type = doc_type_of(&existing) == doc_type;
        let merged = match existing {
            LocalChange::FileMove(mut m) | LocalChange::DirMove(mut m) if same_type => {
                crate::debug_event!("correlator", "move destination", "{}", put.path.display());
                m.path = put.path;
                m.stats = put.stats.or(m.stats);
                m.checksum = put.checksum;
                m.wip = put.wip;
                settle_move(doc_type, m)
            }
            LocalChange::FileDeletion(d) | LocalChange::DirDeletion(d) if same_type => {
                match d.previous {
                    Some(previous) => {
                        crate::debug_event!(
                            "correlator",
                            "move",
                            "{} -> {}",
                            previous.path.display(),
                            put.path.display()
                        );
                        settle_move(doc_type, Move::between(previous, put))
                    }
                    // Nothing was recorded at the old path, so nothing moves.
                    None => addition(doc_type, put),
                }
            }
            LocalChange::FileAddition(_) | LocalChange::DirAddition(_) if same_type => {
                addition(doc_type, put)
            }
            other => {
                self.slots[idx] = Some(other);
                self.found(addition(doc_type, put));
                return;
            }
        };
        self.replace(idx, &old_path, merged);
    }

    fn on_update(&mut self, put: Put) {
        if let Some(idx) = self.path_slot(&put.path) {
            if matches!(self.slots[idx], Some(LocalChange::FileDeletion(_))) {
                // Removed then written again: the record just changes content.
                crate::debug_event!("correlator", "replaced", "{}", put.path.display());
                let path = put.path.clone();
                self.replace(idx, &path, LocalChange::FileUpdate(put));
                return;
            }
            match self.slots[idx].as_mut() {
                Some(LocalChange::FileAddition(current) | LocalChange::FileUpdate(current)) => {
                    current.checksum = put.checksum;
                    current.stats = put.stats.or(current.stats.take());
                    current.ino = put.ino.or(current.ino);
                    current.wip = put.wip;
                    return;
                }
                Some(LocalChange::FileMove(m)) => {
                    m.checksum = put.checksum;
                    m.stats = put.stats.or(m.stats.take());
                    m.wip = put.wip;
                    return;
                }
                _ => {}
            }
        }
        self.found_by_path(LocalChange::FileUpdate(put));
    }

    fn on_unlink(&mut self, gone: Deletion, doc_type: DocType) -> AnalysisResult<()> {
        if let Some((idx, existing)) = self.take_by_inode(gone.ino) {
            let old_path = existing.path().to_path_buf();
            let existing_type = doc_type_of(&existing);
            match existing {
                LocalChange::FileMove(m) | LocalChange::DirMove(m) => {
                    if gone.path == m.previous.path {
                        crate::debug_event!(
                            "correlator",
                            "duplicate unlink",
                            "{}",
                            gone.path.display()
                        );
                        self.slots[idx] = Some(settle_move(existing_type, m));
                        return Ok(());
                    }
                    if gone.path == m.path {
                        self.replace(idx, &old_path, abandon_move(existing_type, m));
                        return Ok(());
                    }
                    let error = AnalysisError::IncompatibleChanges {
                        event: deletion_event_name(doc_type).to_string(),
                        path: gone.path.clone(),
                        ino: m.ino.or(gone.ino).unwrap_or_default(),
                        existing: format!(
                            "{} -> {}",
                            m.previous.path.display(),
                            m.path.display()
                        ),
                    };
                    tracing::error!("[correlator] {error}");
                    self.slots[idx] = Some(settle_move(existing_type, m));
                    return Err(error);
                }
                LocalChange::FileAddition(put) | LocalChange::DirAddition(put)
                    if existing_type == doc_type =>
                {
                    let upgraded = match gone.previous {
                        Some(previous) => {
                            crate::debug_event!(
                                "correlator",
                                "move",
                                "{} -> {}",
                                previous.path.display(),
                                put.path.display()
                            );
                            settle_move(doc_type, Move::between(previous, put))
                        }
                        None => addition(doc_type, put),
                    };
                    self.replace(idx, &old_path, upgraded);
                    return Ok(());
                }
                LocalChange::FileDeletion(mut d) | LocalChange::DirDeletion(mut d)
                    if existing_type == doc_type && d.path == gone.path =>
                {
                    crate::debug_event!(
                        "correlator",
                        "duplicate unlink",
                        "{}",
                        gone.path.display()
                    );
                    d.previous = d.previous.or(gone.previous);
                    self.slots[idx] = Some(deletion(doc_type, d));
                    return Ok(());
                }
                other => self.slots[idx] = Some(other),
            }
        }

        if gone.ino.is_some() {
            self.drop_superseded_update(&gone.path);
            self.found(deletion(doc_type, gone));
            return Ok(());
        }

        let Some(idx) = self.path_slot(&gone.path) else {
            crate::debug_event!(
                "correlator",
                "skip unlink",
                "{} matches no change",
                gone.path.display()
            );
            return Ok(());
        };
        let Some(existing) = self.slots[idx].take() else {
            return Ok(());
        };

        match existing {
            LocalChange::FileMove(m) if doc_type == DocType::File && m.checksum.is_none() => {
                crate::debug_event!(
                    "correlator",
                    "move destination vanished",
                    "{}",
                    gone.path.display()
                );
                self.replace(idx, &gone.path, abandon_move(DocType::File, m));
            }
            LocalChange::DirMove(m) if doc_type == DocType::Folder => {
                crate::debug_event!(
                    "correlator",
                    "move destination vanished",
                    "{}",
                    gone.path.display()
                );
                self.replace(idx, &gone.path, abandon_move(DocType::Folder, m));
            }
            LocalChange::FileAddition(put) | LocalChange::FileUpdate(put)
                if doc_type == DocType::File && put.checksum.is_none() =>
            {
                crate::debug_event!(
                    "correlator",
                    "created then removed",
                    "{}",
                    gone.path.display()
                );
                self.forget(idx, &put.path, put.ino);
            }
            other => {
                crate::debug_event!(
                    "correlator",
                    "skip unlink",
                    "{} already accounted for",
                    gone.path.display()
                );
                self.slots[idx] = Some(other);
            }
        }
        Ok(())
    }

    /// Flatten the cycle into its list of changes.
    ///
    /// A deletion and a same-kind addition at one path collapse into a single
    /// change: an update for files, the addition for directories.
    pub fn finish(self) -> Vec<LocalChange> {
        let mut changes: Vec<Option<LocalChange>> =
            self.slots.into_iter().flatten().map(Some).collect();

        let mut deletions: HashMap<(PathBuf, bool), usize> = HashMap::new();
        for (i, change) in changes.iter().enumerate() {
            if let Some(change) = change {
                if let Some(path) = change.vacated_path().filter(|_| !change.is_move()) {
                    deletions.insert((path.to_path_buf(), change.is_dir()), i);
                }
            }
        }

        for i in 0..changes.len() {
            let key = match &changes[i] {
                Some(LocalChange::FileAddition(put)) if !put.wip => (put.path.clone(), false),
                Some(LocalChange::DirAddition(put)) => (put.path.clone(), true),
                _ => continue,
            };
            let Some(j) = deletions.remove(&key) else {
                continue;
            };
            changes[j] = None;
            changes[i] = match changes[i].take() {
                Some(LocalChange::FileAddition(put)) => {
                    crate::debug_event!("correlator", "replaced", "{}", put.path.display());
                    Some(LocalChange::FileUpdate(put))
                }
                other => other,
            };
        }

        // One change per resulting path: the latest wins.
        let mut latest: HashMap<PathBuf, usize> = HashMap::new();
        for (i, change) in changes.iter().enumerate() {
            if let Some(path) = change.as_ref().and_then(LocalChange::added_path) {
                latest.insert(path.to_path_buf(), i);
            }
        }
        changes
            .into_iter()
            .enumerate()
            .filter_map(|(i, change)| {
                let change = change?;
                match change.added_path() {
                    Some(path) if latest.get(path) != Some(&i) => {
                        tracing::warn!("[correlator] dropping superseded {change}");
                        None
                    }
                    _ => Some(change),
                }
            })
            .collect()
    }

    /// Take the live change registered for `ino` out of its slot.
    fn take_by_inode(&mut self, ino: Option<u64>) -> Option<(usize, LocalChange)> {
        let idx = *self.by_inode.get(&ino?)?;
        let change = self.slots[idx].take()?;
        Some((idx, change))
    }

    fn path_slot(&self, path: &Path) -> Option<usize> {
        let idx = *self.by_path.get(path)?;
        self.slots[idx].is_some().then_some(idx)
    }

    fn found(&mut self, change: LocalChange) {
        let ino = change.ino();
        let idx = self.found_by_path(change);
        if let Some(ino) = ino {
            self.by_inode.insert(ino, idx);
        }
    }

    fn found_by_path(&mut self, change: LocalChange) -> usize {
        let idx = self.slots.len();
        self.by_path.insert(change.path().to_path_buf(), idx);
        self.slots.push(Some(change));
        idx
    }

    /// Put `change` in slot `idx`, which was registered under `old_path`.
    ///
    /// A change landing on a path another live slot produces overwrites it.
    fn replace(&mut self, idx: usize, old_path: &Path, change: LocalChange) {
        if self.by_path.get(old_path) == Some(&idx) {
            self.by_path.remove(old_path);
        }
        if let Some(path) = change.added_path() {
            if let Some(other) = self.path_slot(path).filter(|&other| other != idx) {
                self.overwrite(other);
            }
        }
        self.by_path.insert(change.path().to_path_buf(), idx);
        if let Some(ino) = change.ino() {
            self.by_inode.insert(ino, idx);
        }
        self.slots[idx] = Some(change);
    }

    /// Settle the change in slot `idx` whose resulting path was just taken
    /// over by another change.
    fn overwrite(&mut self, idx: usize) {
        let Some(existing) = self.slots[idx].take() else {
            return;
        };
        crate::debug_event!("correlator", "overwritten", "{existing}");
        let doc_type = doc_type_of(&existing);
        match existing {
            // Created during the cycle, nothing recorded to clear.
            LocalChange::FileAddition(put) | LocalChange::DirAddition(put) => {
                self.forget(idx, &put.path, put.ino);
            }
            // The recorded file at that path is gone.
            LocalChange::FileUpdate(put) => {
                self.slots[idx] = Some(LocalChange::FileDeletion(Deletion {
                    path: put.path,
                    ino: put.ino,
                    previous: None,
                    wip: false,
                }));
            }
            LocalChange::FileMove(m) | LocalChange::DirMove(m) => {
                let destination = m.path.clone();
                if self.by_path.get(&destination) == Some(&idx) {
                    self.by_path.remove(&destination);
                }
                let abandoned = abandon_move(doc_type, m);
                self.by_path
                    .entry(abandoned.path().to_path_buf())
                    .or_insert(idx);
                self.slots[idx] = Some(abandoned);
            }
            other => self.slots[idx] = Some(other),
        }
    }

    fn forget(&mut self, idx: usize, path: &Path, ino: Option<u64>) {
        self.slots[idx] = None;
        if self.by_path.get(path) == Some(&idx) {
            self.by_path.remove(path);
        }
        if let Some(ino) = ino {
            if self.by_inode.get(&ino) == Some(&idx) {
                self.by_inode.remove(&ino);
            }
        }
    }

    /// A deleted file has no content left to update.
    fn drop_superseded_update(&mut self, path: &Path) {
        let Some(idx) = self.path_slot(path) else {
            return;
        };
        if let Some(LocalChange::FileUpdate(put)) = &self.slots[idx] {
            let ino = put.ino;
            self.forget(idx, path, ino);
        }
    }
}

fn deletion_event_name(doc_type: DocType) -> &'static str {
    match doc_type {
        DocType::File => "unlink",
        DocType::Folder => "unlinkDir",
    }
}

/// Run correlation over one cycle: pending changes first, then candidates.
pub fn correlate(
    candidates: Vec<LocalChange>,
    pending: Vec<LocalChange>,
) -> AnalysisResult<Vec<LocalChange>> {
    let mut correlator = Correlator::new();
    correlator.prepend_pending(pending);
    for change in candidates {
        correlator.push(change)?;
    }
    Ok(correlator.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::event::Stats;
    use crate::metadata::Metadata;

    fn put(path: &str, ino: u64) -> Put {
        Put {
            path: PathBuf::from(path),
            ino: Some(ino),
            stats: Some(Stats::new(ino, 1)),
            checksum: Some(format!("sum-{ino}")),
            wip: false,
        }
    }

    fn known_file(path: &str, ino: u64) -> Deletion {
        let mut doc = Metadata::file(path, None, Some(format!("sum-{ino}")));
        doc.ino = Some(ino);
        Deletion {
            path: PathBuf::from(path),
            ino: Some(ino),
            previous: Some(doc),
            wip: false,
        }
    }

    fn unknown(path: &str) -> Deletion {
        Deletion {
            path: PathBuf::from(path),
            ino: None,
            previous: None,
            wip: false,
        }
    }

    #[test]
    fn test_unlink_then_add_is_move() {
        let changes = correlate(
            vec![
                LocalChange::FileDeletion(known_file("a", 1)),
                LocalChange::FileAddition(put("b", 1)),
            ],
            vec![],
        )
        .unwrap();

        assert_eq!(changes.len(), 1);
        let m = changes[0].as_move().unwrap();
        assert_eq!(m.previous.path, PathBuf::from("a"));
        assert_eq!(m.path, PathBuf::from("b"));
    }

    #[test]
    fn test_repeated_unlink_then_add_is_one_move() {
        let changes = correlate(
            vec![
                LocalChange::FileDeletion(known_file("a", 1)),
                LocalChange::FileDeletion(known_file("a", 1)),
                LocalChange::FileAddition(put("b", 1)),
            ],
            vec![],
        )
        .unwrap();

        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].to_string(), "FileMove a -> b");
    }

    #[test]
    fn test_add_then_unlink_is_move() {
        let changes = correlate(
            vec![
                LocalChange::FileAddition(put("b", 1)),
                LocalChange::FileDeletion(known_file("a", 1)),
            ],
            vec![],
        )
        .unwrap();

        assert_eq!(changes.len(), 1);
        assert!(matches!(changes[0], LocalChange::FileMove(_)));
        assert_eq!(changes[0].path(), Path::new("b"));
    }

    #[test]
    fn test_chained_moves_fold_into_one() {
        let changes = correlate(
            vec![
                LocalChange::FileDeletion(known_file("a", 1)),
                LocalChange::FileAddition(put("b", 1)),
                LocalChange::FileAddition(put("c", 1)),
            ],
            vec![],
        )
        .unwrap();

        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].to_string(), "FileMove a -> c");
    }

    #[test]
    fn test_move_back_to_source_is_update() {
        let changes = correlate(
            vec![
                LocalChange::FileDeletion(known_file("a", 1)),
                LocalChange::FileAddition(put("a", 1)),
            ],
            vec![],
        )
        .unwrap();

        assert_eq!(changes.len(), 1);
        assert!(matches!(changes[0], LocalChange::FileUpdate(_)));
    }

    #[test]
    fn test_unlink_without_inode_downgrades_contentless_move() {
        let mut wip = put("b", 1);
        wip.checksum = None;
        wip.wip = true;

        let changes = correlate(
            vec![
                LocalChange::FileDeletion(known_file("a", 1)),
                LocalChange::FileAddition(wip),
                LocalChange::FileDeletion(unknown("b")),
            ],
            vec![],
        )
        .unwrap();

        assert_eq!(changes.len(), 1);
        assert!(matches!(changes[0], LocalChange::FileDeletion(_)));
        assert_eq!(changes[0].path(), Path::new("a"));
        assert!(!changes[0].is_wip());
    }

    #[test]
    fn test_duplicate_unlink_is_absorbed() {
        let changes = correlate(
            vec![
                LocalChange::FileDeletion(known_file("a", 1)),
                LocalChange::FileAddition(put("b", 1)),
                LocalChange::FileDeletion(unknown("b")),
                LocalChange::FileDeletion(known_file("a", 1)),
            ],
            vec![],
        )
        .unwrap();

        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].to_string(), "FileMove a -> b");
    }

    #[test]
    fn test_unrelated_unlink_of_moved_inode_is_fatal() {
        let result = correlate(
            vec![
                LocalChange::FileDeletion(known_file("a", 1)),
                LocalChange::FileAddition(put("b", 1)),
                LocalChange::FileDeletion(known_file("elsewhere", 1)),
            ],
            vec![],
        );

        assert!(matches!(
            result,
            Err(AnalysisError::IncompatibleChanges { ino: 1, .. })
        ));
    }

    #[test]
    fn test_update_is_path_keyed_and_folds() {
        let changes = correlate(
            vec![
                LocalChange::FileAddition(put("a", 1)),
                LocalChange::FileUpdate(put("a", 1)),
                LocalChange::FileUpdate(put("z", 9)),
            ],
            vec![],
        )
        .unwrap();

        assert_eq!(changes.len(), 2);
        assert!(matches!(changes[0], LocalChange::FileAddition(_)));
        assert!(matches!(changes[1], LocalChange::FileUpdate(_)));
    }

    #[test]
    fn test_replaced_file_becomes_update() {
        let changes = correlate(
            vec![
                LocalChange::FileDeletion(known_file("doc.txt", 1)),
                LocalChange::FileAddition(put("doc.txt", 2)),
            ],
            vec![],
        )
        .unwrap();

        assert_eq!(changes.len(), 1);
        match &changes[0] {
            LocalChange::FileUpdate(update) => assert_eq!(update.ino, Some(2)),
            other => panic!("unexpected change {other}"),
        }
    }

    #[test]
    fn test_move_onto_path_created_in_cycle_wins() {
        // mv a b; touch c; mv b c
        let changes = correlate(
            vec![
                LocalChange::FileDeletion(known_file("a", 1)),
                LocalChange::FileAddition(put("b", 1)),
                LocalChange::FileAddition(put("c", 2)),
                LocalChange::FileDeletion(unknown("b")),
                LocalChange::FileAddition(put("c", 1)),
            ],
            vec![],
        )
        .unwrap();

        let names: Vec<String> = changes.iter().map(ToString::to_string).collect();
        assert_eq!(names, vec!["FileMove a -> c"]);
    }

    #[test]
    fn test_move_onto_recorded_file_clears_it() {
        let changes = correlate(
            vec![
                LocalChange::FileUpdate(put("c", 2)),
                LocalChange::FileDeletion(known_file("a", 1)),
                LocalChange::FileAddition(put("c", 1)),
            ],
            vec![],
        )
        .unwrap();

        let names: Vec<String> = changes.iter().map(ToString::to_string).collect();
        assert_eq!(names, vec!["FileDeletion c", "FileMove a -> c"]);
    }

    #[test]
    fn test_update_after_deletion_is_update() {
        let changes = correlate(
            vec![
                LocalChange::FileDeletion(known_file("x", 1)),
                LocalChange::FileUpdate(put("x", 1)),
            ],
            vec![],
        )
        .unwrap();

        assert_eq!(changes.len(), 1);
        match &changes[0] {
            LocalChange::FileUpdate(update) => {
                assert_eq!(update.path, PathBuf::from("x"));
                assert_eq!(update.checksum.as_deref(), Some("sum-1"));
            }
            other => panic!("unexpected change {other}"),
        }
    }

    #[test]
    fn test_deletion_without_record_cannot_move() {
        let changes = correlate(
            vec![
                LocalChange::FileDeletion(Deletion {
                    previous: None,
                    ..known_file("a", 1)
                }),
                LocalChange::FileAddition(put("b", 1)),
            ],
            vec![],
        )
        .unwrap();

        assert_eq!(changes.len(), 1);
        assert!(matches!(changes[0], LocalChange::FileAddition(_)));
    }

    #[test]
    fn test_pending_is_correlated_with_new_events() {
        let mut pending = put("b", 1);
        pending.checksum = None;
        pending.wip = true;

        let changes = correlate(
            vec![LocalChange::FileAddition(put("b", 1))],
            vec![LocalChange::FileAddition(pending)],
        )
        .unwrap();

        assert_eq!(changes.len(), 1);
        assert!(!changes[0].is_wip());
    }
}
