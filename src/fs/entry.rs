//! Per-open entries
//!
//! An [`Entry`] is what a path resolves to. It owns every store object it
//! needs, so dropping it is the release: each variant tears down exactly what
//! it holds, once.

use bytes::Bytes;
use git2::Oid;
use std::ffi::OsString;
use std::fs::{File, Metadata};
use std::io;
use std::os::unix::fs::FileExt;
use tracing::trace;

use super::attr::OID_TEXT_LEN;
use crate::error::{Error, Result};
use crate::store::{BlobObject, BranchCursor, FileMode, TreeItem, TreeObject};

/// Resumable enumeration state of the virtual root.
///
/// Branch iteration is forward-only, so a name the host could not accept is
/// parked in `pending` and emitted first on the next call.
pub struct BranchListing {
    /// Created on the first enumeration call
    pub(crate) cursor: Option<Box<dyn BranchCursor>>,
    pub(crate) pending: Option<OsString>,
    pub(crate) exhausted: bool,
    /// Number of names the host accepted so far
    pub(crate) position: i64,
}

impl BranchListing {
    pub fn new() -> Self {
        Self {
            cursor: None,
            pending: None,
            exhausted: false,
            position: 0,
        }
    }

    pub fn has_cursor(&self) -> bool {
        self.cursor.is_some()
    }

    pub fn pending(&self) -> Option<&OsString> {
        self.pending.as_ref()
    }

    pub fn is_started(&self) -> bool {
        self.cursor.is_some() || self.exhausted || self.pending.is_some()
    }

    /// Forget all progress; the next call starts a fresh cursor
    pub fn reset(&mut self) {
        self.cursor = None;
        self.pending = None;
        self.exhausted = false;
        self.position = 0;
    }
}

impl Default for BranchListing {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BranchListing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BranchListing")
            .field("cursor", &self.cursor.is_some())
            .field("pending", &self.pending)
            .field("exhausted", &self.exhausted)
            .field("position", &self.position)
            .finish()
    }
}

/// Object id rendered as fixed-width hexadecimal text
#[derive(Debug, Clone)]
pub struct ObjectIdText {
    pub id: Oid,
    text: Bytes,
}

impl ObjectIdText {
    pub fn new(id: Oid) -> Self {
        let text = Bytes::from(format!("{}\n", id));
        debug_assert_eq!(text.len() as u64, OID_TEXT_LEN);
        Self { id, text }
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.text
    }
}

/// What a virtual path resolved to
#[derive(Debug)]
pub enum Entry {
    /// The virtual root listing branches
    BranchRoot(BranchListing),
    Directory(TreeObject),
    File {
        blob: BlobObject,
        mode: FileMode,
        /// Tree entry the blob was reached through
        item: TreeItem,
    },
    ObjectIdText(ObjectIdText),
    /// Regular overlay file shadowing the repository
    OverlayFile {
        file: File,
        meta: Metadata,
    },
    /// Overlay directory with no repository directory beneath it
    OverlayDirectory(Metadata),
}

impl Entry {
    pub fn object_id(id: Oid) -> Self {
        Entry::ObjectIdText(ObjectIdText::new(id))
    }

    pub fn is_dir(&self) -> bool {
        matches!(
            self,
            Entry::BranchRoot(_) | Entry::Directory(_) | Entry::OverlayDirectory(_)
        )
    }

    /// Short variant name for diagnostics
    pub fn variant(&self) -> &'static str {
        match self {
            Entry::BranchRoot(_) => "branch-root",
            Entry::Directory(_) => "directory",
            Entry::File { .. } => "file",
            Entry::ObjectIdText(_) => "object-id",
            Entry::OverlayFile { .. } => "overlay-file",
            Entry::OverlayDirectory(_) => "overlay-directory",
        }
    }

    /// Read up to `size` bytes at `offset`.
    ///
    /// Reads at or past the end return nothing; reads crossing the end return
    /// only the available tail.
    pub fn read_at(&self, offset: u64, size: u32) -> Result<Bytes> {
        let content = match self {
            Entry::File { blob, mode, .. } if mode.is_regular() => &blob.content,
            Entry::ObjectIdText(text) => text.as_bytes(),
            Entry::OverlayFile { file, .. } => return read_file_at(file, offset, size),
            Entry::File { item, .. } => {
                return Err(Error::NotAFile(item.name.to_string_lossy().into_owned()))
            }
            Entry::BranchRoot(_) | Entry::Directory(_) | Entry::OverlayDirectory(_) => {
                return Err(Error::NotAFile(self.variant().to_string()))
            }
        };

        let len = content.len() as u64;
        if offset >= len {
            return Ok(Bytes::new());
        }
        let end = offset.saturating_add(size as u64).min(len);
        Ok(content.slice(offset as usize..end as usize))
    }
}

/// Positional read from an overlay file; the file may change underneath
fn read_file_at(file: &File, offset: u64, size: u32) -> Result<Bytes> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(size as usize)
        .map_err(|_| Error::OutOfMemory(format!("read of {} bytes", size)))?;
    buf.resize(size as usize, 0);

    let mut filled = 0;
    while filled < buf.len() {
        match file.read_at(&mut buf[filled..], offset + filled as u64) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(Error::Io(e)),
        }
    }
    buf.truncate(filled);
    Ok(Bytes::from(buf))
}

impl Drop for Entry {
    fn drop(&mut self) {
        match self {
            Entry::BranchRoot(listing) => {
                if listing.cursor.take().is_some() {
                    trace!("released branch cursor");
                }
            }
            Entry::Directory(tree) => trace!("released tree {}", tree.id),
            Entry::File { blob, item, .. } => {
                trace!("released blob {} ({:?})", blob.id, item.name)
            }
            Entry::ObjectIdText(_) => {}
            Entry::OverlayFile { .. } => trace!("closed overlay file"),
            Entry::OverlayDirectory(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ObjectKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn blob_entry(mode: u32, content: &'static [u8]) -> Entry {
        let id = Oid::hash_object(git2::ObjectType::Blob, content).unwrap();
        Entry::File {
            blob: BlobObject { id, content: Bytes::from_static(content) },
            mode: FileMode(mode),
            item: TreeItem {
                name: "readme.md".into(),
                id,
                kind: ObjectKind::Blob,
                mode: FileMode(mode),
            },
        }
    }

    struct CountingCursor(Arc<AtomicUsize>);

    impl BranchCursor for CountingCursor {
        fn next_branch(&mut self) -> Result<Option<OsString>> {
            Ok(None)
        }
    }

    impl Drop for CountingCursor {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_read_clamps_at_end() {
        let entry = blob_entry(0o100644, b"0123456789");

        assert_eq!(entry.read_at(0, 4).unwrap().as_ref(), b"0123");
        assert_eq!(entry.read_at(6, 100).unwrap().as_ref(), b"6789");
        assert!(entry.read_at(10, 5).unwrap().is_empty());
        assert!(entry.read_at(u64::MAX, u32::MAX).unwrap().is_empty());
    }

    #[test]
    fn test_read_rejects_non_files() {
        let link = blob_entry(0o120000, b"target");
        assert!(matches!(link.read_at(0, 10), Err(Error::NotAFile(_))));

        let root = Entry::BranchRoot(BranchListing::new());
        assert!(matches!(root.read_at(0, 10), Err(Error::NotAFile(_))));
    }

    #[test]
    fn test_object_id_text() {
        let id = Oid::hash_object(git2::ObjectType::Blob, b"hello").unwrap();
        let entry = Entry::object_id(id);

        let text = entry.read_at(0, 100).unwrap();
        assert_eq!(text.len() as u64, OID_TEXT_LEN);
        assert_eq!(&text[..40], id.to_string().as_bytes());
        assert_eq!(text[40], b'\n');
        assert_eq!(entry.read_at(38, 10).unwrap().len(), 3);
    }

    #[test]
    fn test_overlay_file_reads_local_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"shadowed").unwrap();
        let entry = Entry::OverlayFile {
            file: File::open(&path).unwrap(),
            meta: std::fs::metadata(&path).unwrap(),
        };

        assert_eq!(entry.read_at(0, 100).unwrap().as_ref(), b"shadowed");
        assert_eq!(entry.read_at(6, 100).unwrap().as_ref(), b"ed");
        assert!(entry.read_at(8, 10).unwrap().is_empty());

        let listing = Entry::OverlayDirectory(std::fs::metadata(dir.path()).unwrap());
        assert!(listing.is_dir());
        assert!(matches!(listing.read_at(0, 1), Err(Error::NotAFile(_))));
    }

    #[test]
    fn test_drop_releases_cursor_once() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut listing = BranchListing::new();
        listing.cursor = Some(Box::new(CountingCursor(drops.clone())));

        let entry = Entry::BranchRoot(listing);
        drop(entry);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reset_forgets_progress() {
        let mut listing = BranchListing::new();
        assert!(!listing.is_started());

        listing.pending = Some("main".into());
        listing.position = 3;
        assert!(listing.is_started());

        listing.reset();
        assert!(!listing.is_started());
        assert_eq!(listing.position, 0);
    }
}
