//! Overlay store
//!
//! A real directory tree mirroring virtual paths 1:1. Any object found at the
//! mirrored path shadows the repository object, except named pipes: git trees
//! can never contain a FIFO, so the overlay reserves that kind as a tombstone
//! meaning "this path and everything below it is absent". Nothing else may
//! create FIFOs under the overlay root.

use nix::sys::stat::Mode;
use std::ffi::OsString;
use std::fs::{self, DirBuilder, Metadata};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{DirBuilderExt, FileTypeExt};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, trace, warn};

use super::attr::NodeKind;
use crate::error::{Error, Result};

/// Longest overlay path handed to the host OS, terminator included
const PATH_MAX: usize = libc::PATH_MAX as usize;

/// Mode for ancestors created on the way to a requested directory
const ANCESTOR_MODE: u32 = 0o755;

/// Mode for tombstone markers
const TOMBSTONE_MODE: u32 = 0o600;

/// What the overlay holds at a virtual path
#[derive(Debug)]
pub enum OverlayState {
    Absent,
    /// The path is hidden, by a tombstone on it or an ancestor, or because
    /// an ancestor is shadowed by something that is not a directory
    Tombstone,
    /// The overlay object shadows the repository
    Present(Metadata),
}

impl OverlayState {
    pub fn is_absent(&self) -> bool {
        matches!(self, OverlayState::Absent)
    }
}

/// A visible child of an overlay directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayChild {
    pub name: OsString,
    pub kind: NodeKind,
}

/// Local overlay rooted at a configured directory
#[derive(Debug, Clone)]
pub struct OverlayStore {
    root: PathBuf,
}

fn is_tombstone(meta: &Metadata) -> bool {
    meta.file_type().is_fifo()
}

/// `lstat` that reports a missing object as `None`
fn lstat(path: &Path) -> Result<Option<Metadata>> {
    match fs::symlink_metadata(path) {
        Ok(meta) => Ok(Some(meta)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        // An ancestor is a regular file; nothing can exist below it
        Err(e) if e.raw_os_error() == Some(libc::ENOTDIR) => Ok(None),
        Err(e) => Err(Error::from_io(e, path)),
    }
}

impl OverlayStore {
    /// Open the overlay, creating its root directory if needed
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root: PathBuf = root.into();
        DirBuilder::new()
            .recursive(true)
            .mode(ANCESTOR_MODE)
            .create(&root)
            .map_err(|e| Error::from_io(e, &root))?;
        Ok(Self { root })
    }

    /// Get the root path
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Plain name segments of a virtual path
    fn segments<'a>(&self, path: &'a Path) -> Result<Vec<&'a std::ffi::OsStr>> {
        path.components()
            .filter_map(|c| match c {
                Component::RootDir | Component::CurDir => None,
                Component::Normal(name) => Some(Ok(name)),
                Component::ParentDir | Component::Prefix(_) => {
                    Some(Err(Error::NotFound(path.display().to_string())))
                }
            })
            .collect()
    }

    /// Mirrored overlay path for a virtual path
    pub fn resolve(&self, path: &Path) -> Result<PathBuf> {
        let mut resolved = self.root.clone();
        for segment in self.segments(path)? {
            resolved.push(segment);
        }
        if resolved.as_os_str().as_bytes().len() >= PATH_MAX {
            return Err(Error::NameTooLong(path.display().to_string()));
        }
        Ok(resolved)
    }

    /// Look up the overlay state of a virtual path.
    ///
    /// Ancestors are checked from the root down. A tombstoned ancestor hides
    /// the whole subtree, and so does one shadowed by a non-directory. A
    /// missing ancestor means nothing below exists in the overlay.
    pub fn query(&self, path: &Path) -> Result<OverlayState> {
        let segments = self.segments(path)?;
        let full = self.resolve(path)?;

        let Some((_, ancestors)) = segments.split_last() else {
            // The virtual root is never shadowed
            return Ok(OverlayState::Absent);
        };

        let mut current = self.root.clone();
        for segment in ancestors {
            current.push(segment);
            match lstat(&current)? {
                None => return Ok(OverlayState::Absent),
                Some(meta) if is_tombstone(&meta) => return Ok(OverlayState::Tombstone),
                Some(meta) if !meta.is_dir() => {
                    trace!("{:?} is shadowed by a non-directory", current);
                    return Ok(OverlayState::Tombstone);
                }
                Some(_) => {}
            }
        }

        Ok(match lstat(&full)? {
            None => OverlayState::Absent,
            Some(meta) if is_tombstone(&meta) => OverlayState::Tombstone,
            Some(meta) => OverlayState::Present(meta),
        })
    }

    /// Create the directory at `path` and every missing ancestor.
    ///
    /// Existing directories are not an error, including ones created by a
    /// concurrent call. A tombstone at the leaf is replaced, so re-creating a
    /// hidden directory brings it back.
    pub fn ensure_directory(&self, path: &Path, mode: u32) -> Result<()> {
        let full = self.resolve(path)?;
        if full == self.root {
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            if matches!(self.query(parent)?, OverlayState::Tombstone) {
                return Err(Error::NotFound(parent.display().to_string()));
            }
        }

        if let Some(parent) = full.parent() {
            DirBuilder::new()
                .recursive(true)
                .mode(ANCESTOR_MODE)
                .create(parent)
                .map_err(|e| Error::from_io(e, parent))?;
        }

        if let Some(meta) = lstat(&full)? {
            if is_tombstone(&meta) {
                debug!("replacing tombstone at {:?}", path);
                fs::remove_file(&full).map_err(|e| Error::from_io(e, &full))?;
            }
        }

        match DirBuilder::new().mode(mode & 0o7777).create(&full) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                if full.is_dir() {
                    Ok(())
                } else {
                    Err(Error::Io(e))
                }
            }
            Err(e) => Err(Error::from_io(e, &full)),
        }
    }

    /// Visible (non-tombstone) children of an overlay directory, sorted by
    /// name. Empty when the directory is absent or hidden.
    pub fn children(&self, path: &Path) -> Result<Vec<OverlayChild>> {
        let meta = match self.query(path)? {
            OverlayState::Present(meta) => meta,
            OverlayState::Absent if path.parent().is_none() => {
                // The virtual root maps onto the overlay root itself
                match lstat(&self.root)? {
                    Some(meta) => meta,
                    None => return Ok(Vec::new()),
                }
            }
            _ => return Ok(Vec::new()),
        };
        if !meta.is_dir() {
            return Ok(Vec::new());
        }

        let full = self.resolve(path)?;
        let mut children = Vec::new();
        for entry in fs::read_dir(&full).map_err(|e| Error::from_io(e, &full))? {
            let entry = entry.map_err(|e| Error::from_io(e, &full))?;
            let file_type = entry.file_type().map_err(|e| Error::from_io(e, &full))?;
            if file_type.is_fifo() {
                continue;
            }
            children.push(OverlayChild {
                name: entry.file_name(),
                kind: NodeKind::from(file_type),
            });
        }

        children.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));
        Ok(children)
    }

    /// Hide `path` and everything below it
    pub fn tombstone(&self, path: &Path) -> Result<()> {
        let full = self.resolve(path)?;
        if full == self.root {
            return Err(Error::InvalidConfig(
                "the overlay root cannot be hidden".to_string(),
            ));
        }

        if let Some(parent) = full.parent() {
            DirBuilder::new()
                .recursive(true)
                .mode(ANCESTOR_MODE)
                .create(parent)
                .map_err(|e| Error::from_io(e, parent))?;
        }

        match lstat(&full)? {
            Some(meta) if is_tombstone(&meta) => return Ok(()),
            Some(meta) if meta.is_dir() => {
                warn!("removing shadowing directory {:?} to hide it", full);
                fs::remove_dir_all(&full).map_err(|e| Error::from_io(e, &full))?;
            }
            Some(_) => fs::remove_file(&full).map_err(|e| Error::from_io(e, &full))?,
            None => {}
        }

        nix::unistd::mkfifo(full.as_path(), Mode::from_bits_truncate(TOMBSTONE_MODE as _))
            .map_err(|errno| Error::from_io(io::Error::from(errno), &full))?;
        debug!("tombstoned {:?}", path);
        Ok(())
    }

    /// Remove a tombstone at `path`. Returns whether one was removed.
    pub fn clear(&self, path: &Path) -> Result<bool> {
        let full = self.resolve(path)?;
        match lstat(&full)? {
            Some(meta) if is_tombstone(&meta) => {
                fs::remove_file(&full).map_err(|e| Error::from_io(e, &full))?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
