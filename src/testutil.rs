//! Scratch repositories and overlays for unit tests

use git2::{Oid, Repository, Signature};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

use crate::fs::{OverlayStore, RepoView};
use crate::store::GitStore;

pub const BLOB: i32 = 0o100644;
pub const EXEC: i32 = 0o100755;
pub const LINK: i32 = 0o120000;
const TREE: i32 = 0o040000;
const GITLINK: i32 = 0o160000;

/// 120 bytes
pub fn readme() -> String {
    let mut content = String::from("# readme\n");
    while content.len() < 120 {
        content.push('.');
    }
    content
}

/// A repository and an overlay root living in one temporary directory
pub struct Fixture {
    dir: TempDir,
    repo: Repository,
}

impl Fixture {
    /// Empty repository without any branch
    pub fn empty() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init_bare(dir.path().join("repo.git")).unwrap();
        Self { dir, repo }
    }

    /// Repository with branches `main`, `dev` and `feature-x` and tag `v1`.
    ///
    /// `main` holds bin/run.sh (executable), docs/guide.md, docs/readme.md
    /// (120 bytes), link (symlink to docs/readme.md), src/lib.rs and vendor
    /// (a submodule link).
    pub fn standard() -> Self {
        let fx = Self::empty();

        let dev = fx.commit(
            "dev",
            &[("notes.txt", "dev notes\n", BLOB)],
        );

        let readme = readme();
        let tree = fx.build_tree(&[
            ("bin/run.sh", "#!/bin/sh\necho run\n", EXEC),
            ("docs/readme.md", readme.as_str(), BLOB),
            ("docs/guide.md", "guide\n", BLOB),
            ("link", "docs/readme.md", LINK),
            ("src/lib.rs", "pub fn answer() -> u32 { 42 }\n", BLOB),
        ]);
        let tree = fx.with_gitlink(tree, "vendor", dev);
        let main = fx.commit_tree("main", tree);
        fx.commit("feature-x", &[("x.txt", "x\n", BLOB)]);

        {
            let sig = signature();
            let target = fx.repo.find_object(main, None).unwrap();
            fx.repo.tag("v1", &target, &sig, "release", false).unwrap();
        }

        fx
    }

    pub fn repo_path(&self) -> PathBuf {
        self.dir.path().join("repo.git")
    }

    pub fn overlay_path(&self) -> PathBuf {
        self.dir.path().join("overlay")
    }

    pub fn overlay(&self) -> OverlayStore {
        OverlayStore::open(self.overlay_path()).unwrap()
    }

    pub fn store(&self) -> Arc<GitStore> {
        Arc::new(GitStore::open(self.repo_path()).unwrap())
    }

    pub fn view(&self) -> RepoView {
        RepoView::new(self.store(), self.overlay(), Default::default())
    }

    /// Local branch names in sorted order
    pub fn branch_names(&self) -> Vec<OsString> {
        let mut names: Vec<OsString> = self
            .repo
            .branches(Some(git2::BranchType::Local))
            .unwrap()
            .map(|b| OsString::from(b.unwrap().0.name().unwrap().unwrap()))
            .collect();
        names.sort();
        names
    }

    pub fn root_tree(&self, branch: &str) -> Oid {
        self.repo
            .revparse_single(branch)
            .unwrap()
            .peel_to_commit()
            .unwrap()
            .tree_id()
    }

    /// Commit `files` as the only commit of `branch`
    pub fn commit(&self, branch: &str, files: &[(&str, &str, i32)]) -> Oid {
        let tree = self.build_tree(files);
        self.commit_tree(branch, tree)
    }

    fn commit_tree(&self, branch: &str, tree: Oid) -> Oid {
        let sig = signature();
        let tree = self.repo.find_tree(tree).unwrap();
        self.repo
            .commit(
                Some(&format!("refs/heads/{}", branch)),
                &sig,
                &sig,
                "fixture",
                &tree,
                &[],
            )
            .unwrap()
    }

    fn build_tree(&self, files: &[(&str, &str, i32)]) -> Oid {
        let mut builder = self.repo.treebuilder(None).unwrap();
        let mut subdirs: BTreeMap<&str, Vec<(&str, &str, i32)>> = BTreeMap::new();

        for &(path, data, mode) in files {
            match path.split_once('/') {
                Some((dir, rest)) => subdirs.entry(dir).or_default().push((rest, data, mode)),
                None => {
                    let blob = self.repo.blob(data.as_bytes()).unwrap();
                    builder.insert(path, blob, mode).unwrap();
                }
            }
        }

        for (dir, children) in subdirs {
            let tree = self.build_tree(&children);
            builder.insert(dir, tree, TREE).unwrap();
        }

        builder.write().unwrap()
    }

    fn with_gitlink(&self, tree: Oid, name: &str, commit: Oid) -> Oid {
        let base = self.repo.find_tree(tree).unwrap();
        let mut builder = self.repo.treebuilder(Some(&base)).unwrap();
        builder.insert(name, commit, GITLINK).unwrap();
        builder.write().unwrap()
    }

    /// Place a tombstone at a virtual path
    pub fn tombstone(&self, path: &str) {
        self.overlay().tombstone(Path::new(path)).unwrap();
    }

    /// Shadow a virtual path with a regular overlay file
    pub fn shadow_file(&self, path: &str, content: &[u8]) {
        let real = self.overlay_path().join(path.trim_start_matches('/'));
        std::fs::create_dir_all(real.parent().unwrap()).unwrap();
        std::fs::write(real, content).unwrap();
    }
}

fn signature() -> Signature<'static> {
    Signature::now("fixture", "fixture@example.com").unwrap()
}
