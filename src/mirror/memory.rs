//! In-memory mirror that also applies submitted changes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, bail};
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{MirrorStore, StoreError, StoreResult};
use crate::metadata::{DocType, Metadata};
use crate::watcher::{Side, Synchronizer};

/// Mirror kept in a sorted map, keyed by path.
///
/// Implements both [`MirrorStore`] and [`Synchronizer`], so changes submitted
/// by the watcher are applied straight to the records. Moves and trashes of a
/// folder carry its descendants along.
#[derive(Debug, Default)]
pub struct InMemoryMirror {
    records: RwLock<BTreeMap<PathBuf, Metadata>>,
    seq: AtomicU64,
}

impl InMemoryMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = Metadata>) -> Self {
        let records = records
            .into_iter()
            .map(|doc| (doc.path.clone(), doc))
            .collect();
        Self {
            records: RwLock::new(records),
            seq: AtomicU64::new(0),
        }
    }

    /// Load records from a JSON array of [`Metadata`].
    pub fn from_json(json: &str) -> StoreResult<Self> {
        let docs: Vec<Metadata> =
            serde_json::from_str(json).map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(Self::with_records(docs))
    }

    pub async fn insert(&self, doc: Metadata) {
        self.records.write().await.insert(doc.path.clone(), doc);
        self.bump();
    }

    /// All records sorted by path.
    pub async fn snapshot(&self) -> Vec<Metadata> {
        self.records.read().await.values().cloned().collect()
    }

    /// Paths of all records, folders suffixed with `/`.
    pub async fn tree(&self) -> Vec<String> {
        self.records
            .read()
            .await
            .values()
            .map(|doc| {
                let path = doc.path.display().to_string();
                match doc.doc_type {
                    DocType::Folder => format!("{path}/"),
                    DocType::File => path,
                }
            })
            .collect()
    }

    fn bump(&self) {
        self.seq.fetch_add(1, Ordering::SeqCst);
    }

    async fn relocate(
        &self,
        doc: Metadata,
        old: &Metadata,
        expected: DocType,
    ) -> anyhow::Result<()> {
        let mut records = self.records.write().await;
        match records.get(&old.path) {
            Some(existing) if existing.doc_type == expected => {}
            Some(_) => bail!("{} is not a {:?}", old.path.display(), expected),
            None => bail!("cannot move unknown {}", old.path.display()),
        }
        if let Some(target) = records.get(&doc.path) {
            if !target.trashed {
                bail!("{} already exists", doc.path.display());
            }
        }

        let moved: Vec<PathBuf> = records
            .keys()
            .filter(|p| p.starts_with(&old.path) && **p != old.path)
            .cloned()
            .collect();
        records.remove(&old.path);
        for child in moved {
            if let Some(record) = records.remove(&child) {
                let relative = child
                    .strip_prefix(&old.path)
                    .context("descendant outside moved folder")?;
                let target = doc.path.join(relative);
                records.insert(target.clone(), record.moved_to(&target));
            }
        }
        records.insert(doc.path.clone(), doc);
        drop(records);
        self.bump();
        Ok(())
    }

    async fn remove_tree(&self, path: &Path) -> anyhow::Result<()> {
        let mut records = self.records.write().await;
        if records.remove(path).is_none() {
            bail!("cannot trash unknown {}", path.display());
        }
        records.retain(|p, _| !p.starts_with(path));
        drop(records);
        self.bump();
        Ok(())
    }
}

#[async_trait]
impl MirrorStore for InMemoryMirror {
    async fn get(&self, path: &Path) -> StoreResult<Option<Metadata>> {
        Ok(self.records.read().await.get(path).cloned())
    }

    async fn list_recursive(&self, prefix: &Path) -> StoreResult<Vec<Metadata>> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|doc| doc.path.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn last_seq(&self) -> StoreResult<u64> {
        Ok(self.seq.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl Synchronizer for InMemoryMirror {
    async fn add_file(&self, _side: Side, doc: Metadata) -> anyhow::Result<()> {
        self.insert(doc).await;
        Ok(())
    }

    async fn update_file(&self, _side: Side, doc: Metadata) -> anyhow::Result<()> {
        if !self.records.read().await.contains_key(&doc.path) {
            bail!("cannot update unknown file {}", doc.path.display());
        }
        self.insert(doc).await;
        Ok(())
    }

    async fn move_file(&self, _side: Side, doc: Metadata, old: Metadata) -> anyhow::Result<()> {
        self.relocate(doc, &old, DocType::File).await
    }

    async fn put_directory(&self, _side: Side, doc: Metadata) -> anyhow::Result<()> {
        self.insert(doc).await;
        Ok(())
    }

    async fn move_directory(
        &self,
        _side: Side,
        doc: Metadata,
        old: Metadata,
    ) -> anyhow::Result<()> {
        self.relocate(doc, &old, DocType::Folder).await
    }

    async fn trash_file(&self, _side: Side, doc: Metadata) -> anyhow::Result<()> {
        self.remove_tree(&doc.path).await
    }

    async fn trash_directory(&self, _side: Side, doc: Metadata) -> anyhow::Result<()> {
        self.remove_tree(&doc.path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_move_directory_carries_children() {
        let mirror = InMemoryMirror::with_records([
            Metadata::folder("src", None),
            Metadata::file("src/a", None, None),
            Metadata::folder("src/sub", None),
            Metadata::file("src/sub/b", None, None),
            Metadata::file("srcfile", None, None),
        ]);

        let old = mirror.get(Path::new("src")).await.unwrap().unwrap();
        mirror
            .move_directory(Side::Local, Metadata::folder("dst", None), old)
            .await
            .unwrap();

        assert_eq!(
            mirror.tree().await,
            vec!["dst/", "dst/a", "dst/sub/", "dst/sub/b", "srcfile"]
        );
        assert_eq!(mirror.last_seq().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_trash_unknown_fails() {
        let mirror = InMemoryMirror::new();
        let result = mirror
            .trash_file(Side::Local, Metadata::file("nope", None, None))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_list_recursive_prefix() {
        let mirror = InMemoryMirror::with_records([
            Metadata::folder("a", None),
            Metadata::file("a/x", None, None),
            Metadata::file("b", None, None),
        ]);

        let under_a = mirror.list_recursive(Path::new("a")).await.unwrap();
        assert_eq!(under_a.len(), 2);
        let all = mirror.list_recursive(Path::new("")).await.unwrap();
        assert_eq!(all.len(), 3);
    }
}
