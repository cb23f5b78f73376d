//! Path resolution
//!
//! Turns a virtual path `/branch[/sub/path...]` into an [`Entry`].

use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use super::entry::{BranchListing, Entry};
use crate::error::{Error, Result};
use crate::store::{ObjectKind, ObjectStore, RefTarget};

/// Split a virtual path into its branch segment and the remaining sub-path.
///
/// The root yields `None`. Anything but plain name segments is rejected.
fn split_path(path: &Path) -> Result<Option<(&OsStr, PathBuf)>> {
    let mut segments = Vec::new();
    for component in path.components() {
        match component {
            Component::RootDir | Component::CurDir => {}
            Component::Normal(name) => segments.push(name),
            Component::ParentDir | Component::Prefix(_) => {
                return Err(Error::NotFound(path.display().to_string()))
            }
        }
    }

    let Some((branch, rest)) = segments.split_first() else {
        return Ok(None);
    };
    Ok(Some((*branch, rest.iter().collect())))
}

/// Resolve `path` against the object store.
///
/// Store objects acquired along the way are owned values, so an early return
/// releases them.
pub fn resolve(store: &dyn ObjectStore, path: &Path) -> Result<Entry> {
    let Some((branch, sub_path)) = split_path(path)? else {
        return Ok(Entry::BranchRoot(BranchListing::new()));
    };

    let branch = branch
        .to_str()
        .ok_or_else(|| Error::NotFound(path.display().to_string()))?;

    let root = match store.resolve_ref(branch) {
        Ok(RefTarget::Commit(commit)) => store
            .commit_tree(commit)
            .map_err(|_| Error::NotFound(format!("branch {}", branch)))?,
        Ok(RefTarget::Tree(tree)) => tree,
        Ok(RefTarget::Other(kind)) => {
            debug!("{} resolves to a {:?}, not a commit or tree", branch, kind);
            return Err(Error::NotFound(format!("branch {}", branch)));
        }
        Err(e) => {
            debug!("cannot find branch {}: {}", branch, e);
            return Err(Error::NotFound(format!("branch {}", branch)));
        }
    };

    if sub_path.as_os_str().is_empty() {
        return Ok(Entry::Directory(store.tree(root)?));
    }

    let item = store.entry_by_path(root, &sub_path).map_err(|e| {
        debug!("cannot find {:?} in {}: {}", sub_path, branch, e);
        Error::NotFound(path.display().to_string())
    })?;

    match item.kind {
        ObjectKind::Tree => Ok(Entry::Directory(store.tree(item.id)?)),
        ObjectKind::Blob => {
            let blob = store.blob(item.id)?;
            Ok(Entry::File {
                blob,
                mode: item.mode,
                item,
            })
        }
        ObjectKind::Commit => {
            debug!("ignoring submodule entry: {:?}", path);
            Err(Error::NotFound(path.display().to_string()))
        }
        ObjectKind::Tag | ObjectKind::Unknown => {
            debug!("ignoring unknown entry: {:?}", path);
            Err(Error::NotFound(path.display().to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::Fixture;

    #[test]
    fn test_root_is_branch_root_without_cursor() {
        let fx = Fixture::standard();
        let store = fx.store();

        for path in ["/", ""] {
            match &resolve(&*store, Path::new(path)).unwrap() {
                Entry::BranchRoot(listing) => {
                    assert!(!listing.has_cursor());
                    assert!(listing.pending().is_none());
                }
                other => panic!("unexpected entry: {:?}", other),
            }
        }
    }

    #[test]
    fn test_branch_is_root_tree() {
        let fx = Fixture::standard();
        let store = fx.store();

        match &resolve(&*store, Path::new("/main")).unwrap() {
            Entry::Directory(tree) => {
                assert_eq!(tree.id, fx.root_tree("main"));
                assert_eq!(tree.len(), 5);
            }
            other => panic!("unexpected entry: {:?}", other),
        }
    }

    #[test]
    fn test_tree_revision_is_used_directly() {
        let fx = Fixture::standard();
        let store = fx.store();

        let entry = resolve(&*store, Path::new("/main^{tree}/docs")).unwrap();
        assert!(matches!(entry, Entry::Directory(_)));
    }

    #[test]
    fn test_nested_file() {
        let fx = Fixture::standard();
        let store = fx.store();

        match &resolve(&*store, Path::new("/main/docs/readme.md")).unwrap() {
            Entry::File { blob, mode, item } => {
                assert_eq!(blob.size(), 120);
                assert!(mode.is_regular());
                assert_eq!(item.name, "readme.md");
            }
            other => panic!("unexpected entry: {:?}", other),
        }

        match &resolve(&*store, Path::new("/main/link")).unwrap() {
            Entry::File { mode, .. } => assert!(mode.is_symlink()),
            other => panic!("unexpected entry: {:?}", other),
        }
    }

    #[test]
    fn test_missing_and_ignored_paths() {
        let fx = Fixture::standard();
        let store = fx.store();

        for path in [
            "/nope",
            "/nope/docs",
            "/main/missing",
            "/main/docs/readme.md/below",
            // submodule link
            "/main/vendor",
            // annotated tag and blob revisions are neither commit nor tree
            "/v1",
            "/main:link",
            "/main/../dev",
        ] {
            let err = resolve(&*store, Path::new(path)).unwrap_err();
            assert!(err.is_not_found(), "{} gave {:?}", path, err);
        }
    }

    #[test]
    fn test_split_path() {
        assert!(split_path(Path::new("/")).unwrap().is_none());

        let (branch, rest) = split_path(Path::new("/main/docs/readme.md")).unwrap().unwrap();
        assert_eq!(branch, "main");
        assert_eq!(rest, Path::new("docs/readme.md"));

        let (branch, rest) = split_path(Path::new("/dev")).unwrap().unwrap();
        assert_eq!(branch, "dev");
        assert!(rest.as_os_str().is_empty());
    }
}
