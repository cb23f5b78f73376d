//! Attribute synthesis
//!
//! Maps repository objects onto POSIX-like attributes. Overlay objects keep
//! the attributes of the local file that shadows them.

use std::os::unix::fs::FileTypeExt;
use std::time::{Duration, SystemTime};

use super::entry::Entry;

/// Size reported for every repository directory
pub const DIR_SIZE: u64 = 4096;
pub const DIR_NLINK: u32 = 2;
pub const DIR_PERM: u16 = 0o755;
pub const FILE_NLINK: u32 = 1;
/// Stored permission bits are meaningless for symlinks
pub const SYMLINK_PERM: u16 = 0o777;
/// 40 hex digits and a newline
pub const OID_TEXT_LEN: u64 = 41;

const BLOCK_SIZE: u32 = 4096;

/// File type of a node as seen by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    RegularFile,
    Directory,
    Symlink,
    NamedPipe,
    CharDevice,
    BlockDevice,
    Socket,
}

impl From<std::fs::FileType> for NodeKind {
    fn from(ft: std::fs::FileType) -> Self {
        if ft.is_dir() {
            NodeKind::Directory
        } else if ft.is_symlink() {
            NodeKind::Symlink
        } else if ft.is_fifo() {
            NodeKind::NamedPipe
        } else if ft.is_char_device() {
            NodeKind::CharDevice
        } else if ft.is_block_device() {
            NodeKind::BlockDevice
        } else if ft.is_socket() {
            NodeKind::Socket
        } else {
            NodeKind::RegularFile
        }
    }
}

impl NodeKind {
    pub fn to_fuser_type(&self) -> fuser::FileType {
        match self {
            NodeKind::RegularFile => fuser::FileType::RegularFile,
            NodeKind::Directory => fuser::FileType::Directory,
            NodeKind::Symlink => fuser::FileType::Symlink,
            NodeKind::NamedPipe => fuser::FileType::NamedPipe,
            NodeKind::CharDevice => fuser::FileType::CharDevice,
            NodeKind::BlockDevice => fuser::FileType::BlockDevice,
            NodeKind::Socket => fuser::FileType::Socket,
        }
    }
}

/// Owner and timestamps stamped on synthesized attributes
#[derive(Debug, Clone, Copy)]
pub struct AttrTemplate {
    pub uid: u32,
    pub gid: u32,
    /// Repository objects are immutable, so every one reports the mount time
    pub time: SystemTime,
}

impl Default for AttrTemplate {
    fn default() -> Self {
        Self {
            uid: nix::unistd::getuid().as_raw(),
            gid: nix::unistd::getgid().as_raw(),
            time: SystemTime::now(),
        }
    }
}

/// Attributes of a virtual path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attributes {
    pub kind: NodeKind,
    pub perm: u16,
    pub size: u64,
    pub blocks: u64,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u32,
    pub blksize: u32,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
}

impl Attributes {
    fn synthesized(kind: NodeKind, perm: u16, size: u64, nlink: u32, template: &AttrTemplate) -> Self {
        Self {
            kind,
            perm,
            size,
            blocks: size.div_ceil(512),
            nlink,
            uid: template.uid,
            gid: template.gid,
            rdev: 0,
            blksize: BLOCK_SIZE,
            atime: template.time,
            mtime: template.time,
            ctime: template.time,
        }
    }

    pub fn directory(template: &AttrTemplate) -> Self {
        Self::synthesized(NodeKind::Directory, DIR_PERM, DIR_SIZE, DIR_NLINK, template)
    }

    /// Attributes of an overlay object, taken verbatim
    pub fn from_metadata(meta: &std::fs::Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            kind: NodeKind::from(meta.file_type()),
            perm: (meta.mode() & 0o7777) as u16,
            size: meta.len(),
            blocks: meta.blocks(),
            nlink: meta.nlink() as u32,
            uid: meta.uid(),
            gid: meta.gid(),
            rdev: meta.rdev() as u32,
            blksize: meta.blksize() as u32,
            atime: meta.accessed().unwrap_or(SystemTime::UNIX_EPOCH),
            mtime: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            ctime: SystemTime::UNIX_EPOCH + Duration::from_secs(meta.ctime().max(0) as u64),
        }
    }

    /// Attributes of a resolved entry
    pub fn for_entry(entry: &Entry, template: &AttrTemplate) -> Self {
        match entry {
            Entry::BranchRoot(_) | Entry::Directory(_) => Self::directory(template),
            Entry::File { blob, mode, .. } => {
                if mode.is_symlink() {
                    Self::synthesized(NodeKind::Symlink, SYMLINK_PERM, blob.size(), FILE_NLINK, template)
                } else {
                    Self::synthesized(
                        NodeKind::RegularFile,
                        mode.permissions(),
                        blob.size(),
                        FILE_NLINK,
                        template,
                    )
                }
            }
            Entry::ObjectIdText(_) => Self::synthesized(
                NodeKind::RegularFile,
                0o444,
                OID_TEXT_LEN,
                FILE_NLINK,
                template,
            ),
            Entry::OverlayFile { meta, .. } | Entry::OverlayDirectory(meta) => {
                Self::from_metadata(meta)
            }
        }
    }

    /// Convert to fuser FileAttr
    pub fn to_fuser_attr(&self, ino: u64) -> fuser::FileAttr {
        fuser::FileAttr {
            ino,
            size: self.size,
            blocks: self.blocks,
            atime: self.atime,
            mtime: self.mtime,
            ctime: self.ctime,
            crtime: self.ctime,
            kind: self.kind.to_fuser_type(),
            perm: self.perm,
            nlink: self.nlink,
            uid: self.uid,
            gid: self.gid,
            rdev: self.rdev,
            blksize: self.blksize,
            flags: 0,
        }
    }
}
