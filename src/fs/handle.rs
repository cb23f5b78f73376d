//! Open handle management
//!
//! Each open/opendir gets an opaque token. The entry behind it is looked up
//! on every read/readdir and removed exactly at release.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::entry::Entry;
use crate::error::{Error, Result};

/// An entry together with the virtual path it was opened at
#[derive(Debug)]
pub struct OpenEntry {
    pub path: PathBuf,
    pub entry: Entry,
}

/// Shared reference to an open entry.
///
/// A read that already holds one keeps the entry alive even if release
/// removes it from the table meanwhile.
pub type EntryRef = Arc<Mutex<OpenEntry>>;

/// Manages open handles
pub struct HandleTable {
    /// Next handle ID
    next_fh: AtomicU64,
    /// Open handles
    handles: RwLock<HashMap<u64, EntryRef>>,
}

impl HandleTable {
    /// Create a new handle table
    pub fn new() -> Self {
        HandleTable {
            next_fh: AtomicU64::new(1),
            handles: RwLock::new(HashMap::new()),
        }
    }

    /// Register an entry and return its token
    pub fn insert(&self, path: PathBuf, entry: Entry) -> u64 {
        let fh = self.next_fh.fetch_add(1, Ordering::SeqCst);
        let open = Arc::new(Mutex::new(OpenEntry { path, entry }));
        self.handles.write().insert(fh, open);
        fh
    }

    /// Look up the entry behind a token
    pub fn get(&self, fh: u64) -> Result<EntryRef> {
        self.handles
            .read()
            .get(&fh)
            .cloned()
            .ok_or(Error::InvalidHandle(fh))
    }

    /// Remove a token; the entry is dropped once no call uses it anymore
    pub fn remove(&self, fh: u64) -> Option<EntryRef> {
        self.handles.write().remove(&fh)
    }

    /// Check if a token is open
    pub fn is_valid(&self, fh: u64) -> bool {
        self.handles.read().contains_key(&fh)
    }

    /// Number of open handles
    pub fn len(&self) -> usize {
        self.handles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.read().is_empty()
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}
