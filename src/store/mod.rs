//! Object store interface
//!
//! The projection layer only talks to the repository through [`ObjectStore`].
//! Every object handed out is owned by the caller, so an open handle can keep
//! it for as long as the handle lives without borrowing the repository.

mod git;

pub use git::GitStore;

use bytes::Bytes;
use git2::Oid;
use std::ffi::OsString;
use std::path::Path;

use crate::error::Result;

/// Mask selecting the object type bits of a git file mode
const MODE_TYPE_MASK: u32 = 0o170000;
const MODE_TREE: u32 = 0o040000;
const MODE_BLOB: u32 = 0o100000;
const MODE_LINK: u32 = 0o120000;
const MODE_GITLINK: u32 = 0o160000;

/// Kind of a repository object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Commit,
    Tree,
    Blob,
    Tag,
    Unknown,
}

impl From<Option<git2::ObjectType>> for ObjectKind {
    fn from(kind: Option<git2::ObjectType>) -> Self {
        match kind {
            Some(git2::ObjectType::Commit) => ObjectKind::Commit,
            Some(git2::ObjectType::Tree) => ObjectKind::Tree,
            Some(git2::ObjectType::Blob) => ObjectKind::Blob,
            Some(git2::ObjectType::Tag) => ObjectKind::Tag,
            _ => ObjectKind::Unknown,
        }
    }
}

/// Mode recorded for a tree entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMode(pub u32);

impl FileMode {
    pub fn is_tree(&self) -> bool {
        self.0 & MODE_TYPE_MASK == MODE_TREE
    }

    pub fn is_regular(&self) -> bool {
        self.0 & MODE_TYPE_MASK == MODE_BLOB
    }

    pub fn is_symlink(&self) -> bool {
        self.0 & MODE_TYPE_MASK == MODE_LINK
    }

    pub fn is_gitlink(&self) -> bool {
        self.0 & MODE_TYPE_MASK == MODE_GITLINK
    }

    /// Permission bits as stored (0644 or 0755 for blobs)
    pub fn permissions(&self) -> u16 {
        (self.0 & 0o7777) as u16
    }
}

/// What a revision name resolved to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefTarget {
    Commit(Oid),
    Tree(Oid),
    /// Anything else (annotated tag, blob, ...)
    Other(ObjectKind),
}

/// One entry of a tree object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeItem {
    pub name: OsString,
    pub id: Oid,
    pub kind: ObjectKind,
    pub mode: FileMode,
}

/// An owned tree object; entries are addressable by index
#[derive(Debug, Clone)]
pub struct TreeObject {
    pub id: Oid,
    pub entries: Vec<TreeItem>,
}

impl TreeObject {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&TreeItem> {
        self.entries.get(index)
    }
}

/// An owned blob object
#[derive(Debug, Clone)]
pub struct BlobObject {
    pub id: Oid,
    pub content: Bytes,
}

impl BlobObject {
    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }
}

/// Forward-only cursor over local branch short names
pub trait BranchCursor: Send {
    /// Advance the cursor. `Ok(None)` marks the end of iteration.
    fn next_branch(&mut self) -> Result<Option<OsString>>;
}

/// Read-only access to the repository object graph.
///
/// Implementations must be safe for concurrent use from several host threads.
pub trait ObjectStore: Send + Sync {
    /// Resolve a branch (or any revision expression) to a commit or tree
    fn resolve_ref(&self, name: &str) -> Result<RefTarget>;

    /// Root tree of a commit
    fn commit_tree(&self, commit: Oid) -> Result<Oid>;

    /// Locate the entry at `path` below `tree`
    fn entry_by_path(&self, tree: Oid, path: &Path) -> Result<TreeItem>;

    /// Materialize a tree
    fn tree(&self, id: Oid) -> Result<TreeObject>;

    /// Materialize a blob with its raw content
    fn blob(&self, id: Oid) -> Result<BlobObject>;

    /// Start iterating over local branches
    fn branches(&self) -> Result<Box<dyn BranchCursor>>;
}
