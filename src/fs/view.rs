//! Path-based filesystem operations
//!
//! [`RepoView`] is what the host adapter calls into. It never caches
//! resolved entries between calls; each open owns its own.

use bytes::Bytes;
use std::ffi::OsStr;
use std::fs::{File, Metadata};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use super::attr::{AttrTemplate, Attributes, NodeKind};
use super::entry::Entry;
use super::handle::HandleTable;
use super::overlay::{OverlayState, OverlayStore};
use super::{readdir, resolver};
use crate::config::LoggingConfig;
use crate::error::{Error, Result};
use crate::store::ObjectStore;

/// The mounted repository: object store plus overlay. One per mount.
#[derive(Clone)]
pub struct RepositoryHandle {
    pub store: Arc<dyn ObjectStore>,
    pub overlay: OverlayStore,
}

/// Host-facing operations over one mounted repository
pub struct RepoView {
    repo: RepositoryHandle,
    handles: HandleTable,
    template: AttrTemplate,
    logging: LoggingConfig,
}

impl RepoView {
    pub fn new(store: Arc<dyn ObjectStore>, overlay: OverlayStore, logging: LoggingConfig) -> Self {
        Self::with_template(store, overlay, logging, AttrTemplate::default())
    }

    pub fn with_template(
        store: Arc<dyn ObjectStore>,
        overlay: OverlayStore,
        logging: LoggingConfig,
        template: AttrTemplate,
    ) -> Self {
        Self {
            repo: RepositoryHandle { store, overlay },
            handles: HandleTable::new(),
            template,
            logging,
        }
    }

    pub fn repository(&self) -> &RepositoryHandle {
        &self.repo
    }

    pub fn overlay(&self) -> &OverlayStore {
        &self.repo.overlay
    }

    /// Number of currently open handles
    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    fn trace_op(&self, op: &str, detail: std::fmt::Arguments<'_>) {
        if self.logging.trace_operations {
            debug!("{}({})", op, detail);
        }
    }

    fn resolve(&self, path: &Path) -> Result<Entry> {
        resolver::resolve(self.repo.store.as_ref(), path)
    }

    /// Attributes of a virtual path; the overlay takes precedence
    pub fn getattr(&self, path: &Path) -> Result<Attributes> {
        self.trace_op("getattr", format_args!("{:?}", path));

        match self.repo.overlay.query(path)? {
            OverlayState::Tombstone => Err(Error::NotFound(path.display().to_string())),
            OverlayState::Present(meta) => Ok(Attributes::from_metadata(&meta)),
            OverlayState::Absent => {
                let entry = self.resolve(path)?;
                Ok(Attributes::for_entry(&entry, &self.template))
            }
        }
    }

    /// Resolve `path` and register the entry under a new token
    pub fn open(&self, path: &Path) -> Result<u64> {
        self.trace_op("open", format_args!("{:?}", path));

        let entry = match self.repo.overlay.query(path)? {
            OverlayState::Tombstone => return Err(Error::NotFound(path.display().to_string())),
            OverlayState::Present(meta) => self.open_overlay(path, meta)?,
            OverlayState::Absent => self.resolve(path)?,
        };
        let fh = self.handles.insert(path.to_path_buf(), entry);
        Ok(fh)
    }

    /// Entry for a path the overlay shadows.
    ///
    /// An overlay directory over a repository directory keeps the repository
    /// tree, since tree listings already merge in the overlay children.
    /// Anything else is served from the overlay alone.
    fn open_overlay(&self, path: &Path, meta: Metadata) -> Result<Entry> {
        if meta.is_dir() {
            return match self.resolve(path) {
                Ok(entry) if matches!(entry, Entry::Directory(_)) => Ok(entry),
                Ok(_) => Ok(Entry::OverlayDirectory(meta)),
                Err(e) if e.is_not_found() => Ok(Entry::OverlayDirectory(meta)),
                Err(e) => Err(e),
            };
        }

        if !meta.is_file() {
            return Err(Error::NotAFile(path.display().to_string()));
        }

        let real = self.repo.overlay.resolve(path)?;
        let file = File::open(&real).map_err(|e| Error::from_io(e, &real))?;
        Ok(Entry::OverlayFile { file, meta })
    }

    pub fn opendir(&self, path: &Path) -> Result<u64> {
        self.open(path)
    }

    /// Drop the entry behind `fh`. Unknown tokens are ignored, so this is
    /// safe from every cleanup path. Returns whether an entry was removed.
    pub fn release(&self, fh: u64) -> bool {
        self.trace_op("release", format_args!("{}", fh));

        let released = self.handles.remove(fh).is_some();
        if !released {
            debug!("release of unknown handle {}", fh);
        }
        released
    }

    /// Read from an open file
    pub fn read(&self, fh: u64, offset: u64, size: u32) -> Result<Bytes> {
        self.trace_op("read", format_args!("{}, {}, {}", fh, offset, size));

        let open = self.handles.get(fh)?;
        let open = open.lock();
        open.entry.read_at(offset, size)
    }

    /// Enumerate an open directory from `offset`.
    ///
    /// `emit(name, kind, next_offset)` returns `true` when the host buffer is
    /// full. Returns the offset to resume from.
    pub fn readdir<F>(&self, fh: u64, offset: i64, emit: F) -> Result<i64>
    where
        F: FnMut(&OsStr, NodeKind, i64) -> bool,
    {
        self.trace_op("readdir", format_args!("{}, {}", fh, offset));

        let open = self.handles.get(fh)?;
        let mut open = open.lock();
        let open = &mut *open;
        readdir::fill(
            &mut open.entry,
            &open.path,
            self.repo.store.as_ref(),
            &self.repo.overlay,
            offset,
            emit,
        )
    }

    /// Create a directory in the overlay
    pub fn mkdir(&self, path: &Path, mode: u32) -> Result<()> {
        self.trace_op("mkdir", format_args!("{:?}, {:o}", path, mode));
        self.repo.overlay.ensure_directory(path, mode)
    }

    /// Target of a symlink
    pub fn readlink(&self, path: &Path) -> Result<Bytes> {
        self.trace_op("readlink", format_args!("{:?}", path));

        match self.repo.overlay.query(path)? {
            OverlayState::Tombstone => return Err(Error::NotFound(path.display().to_string())),
            OverlayState::Present(meta) => {
                if !meta.file_type().is_symlink() {
                    return Err(Error::NotASymlink(path.display().to_string()));
                }
                let real = self.repo.overlay.resolve(path)?;
                let target = std::fs::read_link(&real).map_err(|e| Error::from_io(e, &real))?;
                return Ok(Bytes::copy_from_slice(target.as_os_str().as_bytes()));
            }
            OverlayState::Absent => {}
        }

        match &self.resolve(path)? {
            Entry::File { blob, mode, .. } if mode.is_symlink() => Ok(blob.content.clone()),
            _ => Err(Error::NotASymlink(path.display().to_string())),
        }
    }
}
