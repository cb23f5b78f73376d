//! Filesystem projection
//!
//! Presents every local branch of a repository as a top-level directory, with
//! a local overlay tree able to shadow or hide repository paths.

mod attr;
mod entry;
mod filesystem;
mod handle;
mod inode;
mod overlay;
mod readdir;
mod resolver;
mod view;

pub use attr::{AttrTemplate, Attributes, NodeKind};
pub use entry::{BranchListing, Entry, ObjectIdText};
pub use filesystem::GitBranchFs;
pub use handle::{HandleTable, OpenEntry};
pub use inode::{InodeTable, ROOT_INO, UNBOUND_INO};
pub use overlay::{OverlayChild, OverlayState, OverlayStore};
pub use resolver::resolve;
pub use view::{RepoView, RepositoryHandle};
