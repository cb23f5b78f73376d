//! Directory enumeration
//!
//! The host calls readdir repeatedly with a bounded buffer. `emit` hands one
//! name to the host together with the offset that resumes after it, and
//! returns `true` when the buffer is full and the name was not taken.
//!
//! Branch listings cannot be addressed by position, so they resume from
//! state kept in [`BranchListing`]. Tree listings are indexed and resume from
//! the offset alone.

use std::ffi::OsStr;
use std::path::Path;
use tracing::trace;

use super::attr::NodeKind;
use super::entry::{BranchListing, Entry};
use super::overlay::OverlayStore;
use crate::error::{Error, Result};
use crate::store::{ObjectKind, ObjectStore, TreeItem, TreeObject};

impl TreeItem {
    /// Kind reported to the host for a listed tree entry
    pub fn node_kind(&self) -> NodeKind {
        match self.kind {
            ObjectKind::Tree => NodeKind::Directory,
            _ if self.mode.is_symlink() => NodeKind::Symlink,
            _ => NodeKind::RegularFile,
        }
    }
}

impl BranchListing {
    /// Emit branch names until the cursor is exhausted or the host is full.
    ///
    /// Returns the number of names the host accepted so far. The host may
    /// come back at an earlier offset than the one returned, after dropping
    /// names it was given; the listing is then replayed from a fresh cursor
    /// up to `offset`. An offset of 0 on a started listing rewinds it.
    pub fn fill<F>(&mut self, store: &dyn ObjectStore, offset: i64, mut emit: F) -> Result<i64>
    where
        F: FnMut(&OsStr, NodeKind, i64) -> bool,
    {
        let offset = offset.max(0);
        if offset != self.position || (offset == 0 && self.is_started()) {
            trace!("repositioning branch listing from {} to {}", self.position, offset);
            self.reset();
            self.skip(store, offset)?;
        }

        if let Some(name) = self.pending.take() {
            if emit(&name, NodeKind::Directory, self.position + 1) {
                self.pending = Some(name);
                return Ok(self.position);
            }
            self.position += 1;
        }

        if self.exhausted {
            return Ok(self.position);
        }
        if self.cursor.is_none() {
            self.cursor = Some(store.branches()?);
        }

        while let Some(cursor) = self.cursor.as_mut() {
            match cursor.next_branch()? {
                None => {
                    // Natural end: the cursor is released here, not at release
                    self.cursor = None;
                    self.exhausted = true;
                }
                Some(name) => {
                    if emit(&name, NodeKind::Directory, self.position + 1) {
                        self.pending = Some(name);
                        break;
                    }
                    self.position += 1;
                }
            }
        }

        Ok(self.position)
    }

    /// Advance a fresh cursor past the first `count` names
    fn skip(&mut self, store: &dyn ObjectStore, count: i64) -> Result<()> {
        if count == 0 {
            return Ok(());
        }

        let mut cursor = store.branches()?;
        while self.position < count {
            if cursor.next_branch()?.is_none() {
                self.exhausted = true;
                return Ok(());
            }
            self.position += 1;
        }
        self.cursor = Some(cursor);
        Ok(())
    }
}

/// Emit the entries of `tree`, the directory at virtual path `dir`, from
/// `offset` on.
///
/// Entries the overlay hides or shadows are skipped, as are submodule links.
/// After the tree's own entries come the visible overlay children of `dir`,
/// at offsets past the tree's entry count. Returns the offset to resume from.
pub fn fill_tree<F>(
    tree: &TreeObject,
    dir: &Path,
    overlay: &OverlayStore,
    offset: i64,
    mut emit: F,
) -> Result<i64>
where
    F: FnMut(&OsStr, NodeKind, i64) -> bool,
{
    let count = tree.len() as i64;
    let mut index = offset.max(0);

    while index < count {
        let item = &tree.entries[index as usize];
        let child = dir.join(&item.name);

        if item.kind == ObjectKind::Commit {
            trace!("skipping submodule entry {:?}", child);
        } else if overlay.query(&child)?.is_absent() {
            if emit(&item.name, item.node_kind(), index + 1) {
                return Ok(index);
            }
        } else {
            trace!("overlay governs {:?}", child);
        }
        index += 1;
    }

    fill_overlay(dir, overlay, count, index, emit)
}

/// Emit the visible overlay children of `dir`. Child `i` sits at offset
/// `base + i`; enumeration starts at `offset`.
fn fill_overlay<F>(dir: &Path, overlay: &OverlayStore, base: i64, offset: i64, mut emit: F) -> Result<i64>
where
    F: FnMut(&OsStr, NodeKind, i64) -> bool,
{
    let children = overlay.children(dir)?;
    let mut index = offset.max(base);

    while let Some(child) = children.get((index - base) as usize) {
        if emit(&child.name, child.kind, index + 1) {
            return Ok(index);
        }
        index += 1;
    }

    Ok(index)
}

/// Enumerate an open directory entry
pub fn fill<F>(
    entry: &mut Entry,
    dir: &Path,
    store: &dyn ObjectStore,
    overlay: &OverlayStore,
    offset: i64,
    emit: F,
) -> Result<i64>
where
    F: FnMut(&OsStr, NodeKind, i64) -> bool,
{
    match entry {
        Entry::BranchRoot(listing) => listing.fill(store, offset, emit),
        Entry::Directory(tree) => fill_tree(tree, dir, overlay, offset, emit),
        Entry::OverlayDirectory(_) => fill_overlay(dir, overlay, 0, offset, emit),
        Entry::File { .. } | Entry::ObjectIdText(_) | Entry::OverlayFile { .. } => {
            Err(Error::NotADirectory(dir.display().to_string()))
        }
    }
}
