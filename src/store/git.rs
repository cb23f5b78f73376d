//! libgit2-backed object store

use bytes::Bytes;
use git2::{BranchType, Oid, Repository, TreeEntry};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{
    BlobObject, BranchCursor, FileMode, ObjectKind, ObjectStore, RefTarget, TreeItem, TreeObject,
};
use crate::error::{Error, Result};

/// Object store over an on-disk git repository.
///
/// `git2::Repository` is not `Sync`; access is serialized here so that the
/// projection layer can call in from any host thread without its own lock.
pub struct GitStore {
    repo: Mutex<Repository>,
    path: PathBuf,
}

impl GitStore {
    /// Open the repository at `path` (bare or with a work tree)
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path: PathBuf = path.into();
        let repo = Repository::open(&path).map_err(|e| {
            Error::from_git(e, &path.display().to_string())
        })?;
        debug!("opened repository at {:?}", path);

        Ok(Self {
            repo: Mutex::new(repo),
            path,
        })
    }

    /// Path the repository was opened from
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TreeItem {
    fn from_entry(entry: &TreeEntry<'_>) -> Self {
        Self {
            name: OsStr::from_bytes(entry.name_bytes()).to_os_string(),
            id: entry.id(),
            kind: ObjectKind::from(entry.kind()),
            mode: FileMode(entry.filemode() as u32),
        }
    }
}

impl ObjectStore for GitStore {
    fn resolve_ref(&self, name: &str) -> Result<RefTarget> {
        let repo = self.repo.lock();
        let object = repo
            .revparse_single(name)
            .map_err(|e| Error::from_git(e, name))?;

        Ok(match object.kind() {
            Some(git2::ObjectType::Commit) => RefTarget::Commit(object.id()),
            Some(git2::ObjectType::Tree) => RefTarget::Tree(object.id()),
            other => RefTarget::Other(ObjectKind::from(other)),
        })
    }

    fn commit_tree(&self, commit: Oid) -> Result<Oid> {
        let repo = self.repo.lock();
        let commit = repo
            .find_commit(commit)
            .map_err(|e| Error::from_git(e, &commit.to_string()))?;
        Ok(commit.tree_id())
    }

    fn entry_by_path(&self, tree: Oid, path: &Path) -> Result<TreeItem> {
        let repo = self.repo.lock();
        let tree = repo
            .find_tree(tree)
            .map_err(|e| Error::from_git(e, &tree.to_string()))?;
        let entry = tree
            .get_path(path)
            .map_err(|e| Error::from_git(e, &path.display().to_string()))?;
        Ok(TreeItem::from_entry(&entry))
    }

    fn tree(&self, id: Oid) -> Result<TreeObject> {
        let repo = self.repo.lock();
        let tree = repo
            .find_tree(id)
            .map_err(|e| Error::from_git(e, &id.to_string()))?;
        let entries = tree.iter().map(|entry| TreeItem::from_entry(&entry)).collect();
        Ok(TreeObject { id, entries })
    }

    fn blob(&self, id: Oid) -> Result<BlobObject> {
        let repo = self.repo.lock();
        let blob = repo
            .find_blob(id)
            .map_err(|e| Error::from_git(e, &id.to_string()))?;

        let raw = blob.content();
        let mut content = Vec::new();
        content
            .try_reserve_exact(raw.len())
            .map_err(|_| Error::OutOfMemory(format!("blob {} ({} bytes)", id, raw.len())))?;
        content.extend_from_slice(raw);

        Ok(BlobObject {
            id,
            content: Bytes::from(content),
        })
    }

    fn branches(&self) -> Result<Box<dyn BranchCursor>> {
        let repo = self.repo.lock();
        let branches = repo
            .branches(Some(BranchType::Local))
            .map_err(|e| Error::from_git(e, "local branches"))?;

        // git2's iterator borrows the repository, so the names are taken
        // under the lock. Per-item errors keep their position.
        let names = branches
            .map(|item| -> std::result::Result<OsString, git2::Error> {
                let (branch, _) = item?;
                Ok(OsStr::from_bytes(branch.name_bytes()?).to_os_string())
            })
            .collect();

        Ok(Box::new(GitBranchCursor { names }))
    }
}

/// Snapshot of the local branches taken when the cursor was created
struct GitBranchCursor {
    names: VecDeque<std::result::Result<OsString, git2::Error>>,
}

impl BranchCursor for GitBranchCursor {
    fn next_branch(&mut self) -> Result<Option<OsString>> {
        match self.names.pop_front() {
            None => Ok(None),
            Some(Ok(name)) => Ok(Some(name)),
            Some(Err(e)) => Err(Error::Git(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::Fixture;

    #[test]
    fn test_resolve_branch_to_commit() {
        let fx = Fixture::standard();
        let store = GitStore::open(fx.repo_path()).unwrap();

        match store.resolve_ref("main").unwrap() {
            RefTarget::Commit(oid) => {
                let tree = store.commit_tree(oid).unwrap();
                assert_eq!(tree, fx.root_tree("main"));
            }
            other => panic!("unexpected target: {:?}", other),
        }
    }

    #[test]
    fn test_resolve_tree_and_other_kinds() {
        let fx = Fixture::standard();
        let store = GitStore::open(fx.repo_path()).unwrap();

        assert_eq!(
            store.resolve_ref("main^{tree}").unwrap(),
            RefTarget::Tree(fx.root_tree("main"))
        );
        assert_eq!(
            store.resolve_ref("v1").unwrap(),
            RefTarget::Other(ObjectKind::Tag)
        );
        assert_eq!(
            store.resolve_ref("main:docs/readme.md").unwrap(),
            RefTarget::Other(ObjectKind::Blob)
        );
        assert!(store.resolve_ref("no-such-branch").unwrap_err().is_not_found());
    }

    #[test]
    fn test_entry_by_path_and_blob() {
        let fx = Fixture::standard();
        let store = GitStore::open(fx.repo_path()).unwrap();
        let root = fx.root_tree("main");

        let item = store
            .entry_by_path(root, Path::new("docs/readme.md"))
            .unwrap();
        assert_eq!(item.name, OsString::from("readme.md"));
        assert_eq!(item.kind, ObjectKind::Blob);
        assert!(item.mode.is_regular());

        let blob = store.blob(item.id).unwrap();
        assert_eq!(blob.size(), 120);

        let missing = store.entry_by_path(root, Path::new("docs/nope.md"));
        assert!(missing.unwrap_err().is_not_found());
    }

    #[test]
    fn test_tree_entries_are_indexed() {
        let fx = Fixture::standard();
        let store = GitStore::open(fx.repo_path()).unwrap();

        let tree = store.tree(fx.root_tree("main")).unwrap();
        let names: Vec<_> = tree.entries.iter().map(|e| e.name.clone()).collect();
        // libgit2 keeps tree entries sorted by name
        assert_eq!(
            names,
            vec!["bin", "docs", "link", "src", "vendor"]
                .into_iter()
                .map(OsString::from)
                .collect::<Vec<_>>()
        );
        assert_eq!(tree.get(1).unwrap().kind, ObjectKind::Tree);
        assert_eq!(tree.get(4).unwrap().kind, ObjectKind::Commit);
    }

    #[test]
    fn test_branch_cursor_exhausts() {
        let fx = Fixture::standard();
        let store = GitStore::open(fx.repo_path()).unwrap();

        let mut cursor = store.branches().unwrap();
        let mut names = Vec::new();
        while let Some(name) = cursor.next_branch().unwrap() {
            names.push(name);
        }
        names.sort();
        assert_eq!(names, fx.branch_names());
        assert!(cursor.next_branch().unwrap().is_none());
    }

    #[test]
    fn test_open_missing_repository() {
        let dir = tempfile::tempdir().unwrap();
        let err = GitStore::open(dir.path().join("absent")).err().unwrap();
        assert!(err.is_not_found());
    }
}
