//! Inode numbering
//!
//! The host addresses nodes by inode number while [`RepoView`] works on
//! virtual paths. A number is bound to its path while the kernel holds a
//! lookup reference to it and dropped once the kernel forgets it.
//!
//! [`RepoView`]: super::RepoView

use dashmap::DashMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Inode number of the virtual root
pub const ROOT_INO: u64 = 1;

/// `d_ino` for listed names the kernel has not looked up yet
pub const UNBOUND_INO: u64 = u64::MAX;

/// A bound path and the kernel's lookup count on it
struct Node {
    path: PathBuf,
    lookups: u64,
}

/// Bidirectional inode <-> virtual path map
pub struct InodeTable {
    /// Next inode number
    next_ino: AtomicU64,
    nodes: DashMap<u64, Node>,
    inos: DashMap<PathBuf, u64>,
}

impl InodeTable {
    pub fn new() -> Self {
        let table = Self {
            next_ino: AtomicU64::new(ROOT_INO + 1),
            nodes: DashMap::new(),
            inos: DashMap::new(),
        };
        table.nodes.insert(
            ROOT_INO,
            Node {
                path: PathBuf::from("/"),
                lookups: 1,
            },
        );
        table.inos.insert(PathBuf::from("/"), ROOT_INO);
        table
    }

    /// Virtual path of an inode
    pub fn path(&self, ino: u64) -> Option<PathBuf> {
        self.nodes.get(&ino).map(|node| node.path.clone())
    }

    /// Path of `name` inside directory `parent`
    pub fn child_path(&self, parent: u64, name: &OsStr) -> Option<PathBuf> {
        self.path(parent).map(|p| p.join(name))
    }

    /// Inode number bound to `path`, if any
    pub fn peek(&self, path: &Path) -> Option<u64> {
        self.inos.get(path).map(|ino| *ino)
    }

    /// Bind `path` for one more kernel reference, allocating a number on
    /// first sight
    pub fn lookup(&self, path: &Path) -> u64 {
        // The entry API keeps two racing lookups from binding different numbers
        let ino = *self
            .inos
            .entry(path.to_path_buf())
            .or_insert_with(|| self.next_ino.fetch_add(1, Ordering::SeqCst));

        self.nodes
            .entry(ino)
            .or_insert_with(|| Node {
                path: path.to_path_buf(),
                lookups: 0,
            })
            .lookups += 1;
        ino
    }

    /// Drop `count` kernel references; the binding goes away with the last.
    /// Returns whether the inode was unbound.
    pub fn forget(&self, ino: u64, count: u64) -> bool {
        if ino == ROOT_INO {
            return false;
        }

        let removed = self
            .nodes
            .remove_if_mut(&ino, |_, node| {
                node.lookups = node.lookups.saturating_sub(count);
                node.lookups == 0
            });

        match removed {
            Some((_, node)) => {
                self.inos.remove_if(&node.path, |_, bound| *bound == ino);
                true
            }
            None => false,
        }
    }

    /// Number of bound inodes, root included
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_root_is_preassigned() {
        let table = InodeTable::new();
        assert_eq!(table.path(ROOT_INO), Some(PathBuf::from("/")));
        assert_eq!(table.peek(Path::new("/")), Some(ROOT_INO));
        assert!(!table.forget(ROOT_INO, 10));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_numbers_are_stable() {
        let table = InodeTable::new();

        let main = table.lookup(Path::new("/main"));
        let docs = table.lookup(Path::new("/main/docs"));
        assert_ne!(main, ROOT_INO);
        assert_ne!(main, docs);
        assert_eq!(table.lookup(Path::new("/main")), main);
        assert_eq!(table.peek(Path::new("/main")), Some(main));
        assert!(table.peek(Path::new("/dev")).is_none());

        assert_eq!(
            table.child_path(main, OsStr::new("docs")),
            Some(PathBuf::from("/main/docs"))
        );
        assert_eq!(
            table.child_path(ROOT_INO, OsStr::new("dev")),
            Some(PathBuf::from("/dev"))
        );
        assert!(table.child_path(999, OsStr::new("x")).is_none());
    }

    #[test]
    fn test_forget_unbinds_after_last_reference() {
        let table = InodeTable::new();
        let main = table.lookup(Path::new("/main"));
        table.lookup(Path::new("/main"));
        assert_eq!(table.len(), 2);

        assert!(!table.forget(main, 1));
        assert_eq!(table.path(main), Some(PathBuf::from("/main")));

        assert!(table.forget(main, 1));
        assert!(table.path(main).is_none());
        assert!(table.peek(Path::new("/main")).is_none());
        assert_eq!(table.len(), 1);

        // A later lookup binds a fresh number
        let again = table.lookup(Path::new("/main"));
        assert_ne!(again, main);
        assert!(!table.forget(main, 1));
    }

    #[test]
    fn test_concurrent_lookups_agree() {
        let table = Arc::new(InodeTable::new());

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let table = table.clone();
                std::thread::spawn(move || {
                    (0..50)
                        .map(|i| table.lookup(Path::new(&format!("/main/f{}", i))))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let results: Vec<_> = workers.into_iter().map(|w| w.join().unwrap()).collect();
        for other in &results[1..] {
            assert_eq!(other, &results[0]);
        }
        assert_eq!(table.len(), 51);

        let first = results[0][0];
        assert!(!table.forget(first, 7));
        assert!(table.forget(first, 1));
    }
}
