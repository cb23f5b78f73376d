//! FUSE filesystem implementation
//!
//! Translates fuser's inode-based callbacks into path-based [`RepoView`]
//! calls and errors into errnos.

use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyOpen, ReplyStatfs, Request,
};
use libc::{c_int, EINVAL, ENOENT, EROFS};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, Level};

use super::attr::NodeKind;
use super::inode::{InodeTable, ROOT_INO, UNBOUND_INO};
use super::view::RepoView;
use crate::config::Config;
use crate::error::Error;

/// Longest name the host may pass in a lookup
const NAME_MAX: u32 = 255;

/// "." and ".." precede every listing
const DOT_ENTRIES: i64 = 2;

/// Per-callback logging, enabled by `trace_operations`
macro_rules! trace_op {
    ($self:ident, $($arg:tt)*) => {
        if $self.trace_operations {
            debug!($($arg)*);
        }
    };
}

/// Git branches FUSE filesystem
pub struct GitBranchFs {
    view: RepoView,
    inodes: InodeTable,
    /// Kernel cache timeout for attributes and entries
    ttl: Duration,
    trace_operations: bool,
}

impl GitBranchFs {
    pub fn new(view: RepoView, config: &Config) -> Self {
        Self {
            view,
            inodes: InodeTable::new(),
            ttl: Duration::from_secs(config.mount.attr_ttl_secs),
            trace_operations: config.logging.trace_operations,
        }
    }

    pub fn view(&self) -> &RepoView {
        &self.view
    }

    fn path(&self, ino: u64) -> Result<PathBuf, c_int> {
        self.inodes.path(ino).ok_or(ENOENT)
    }

    fn child_path(&self, parent: u64, name: &OsStr) -> Result<PathBuf, c_int> {
        self.inodes.child_path(parent, name).ok_or(ENOENT)
    }

    /// Attributes of `path` reported under `ino`
    fn file_attr(&self, path: &Path, ino: u64) -> Result<FileAttr, c_int> {
        let attr = self.view.getattr(path).map_err(|e| errno(e, "getattr", path))?;
        Ok(attr.to_fuser_attr(ino))
    }

    /// Attributes of `path`, taking a kernel reference on its inode
    fn entry_attr(&self, path: &Path) -> Result<FileAttr, c_int> {
        let attr = self.view.getattr(path).map_err(|e| errno(e, "lookup", path))?;
        Ok(attr.to_fuser_attr(self.inodes.lookup(path)))
    }

    /// Fill a directory listing for the host.
    ///
    /// Host offsets 0 and 1 stand for "." and ".."; everything past them is
    /// the listing of the open directory shifted by two. `add` follows
    /// `ReplyDirectory::add` and returns `true` when the buffer is full.
    fn fill_dir<F>(&self, ino: u64, fh: u64, offset: i64, mut add: F) -> Result<(), c_int>
    where
        F: FnMut(u64, i64, FileType, &OsStr) -> bool,
    {
        let dir = self.path(ino)?;
        let parent = match dir.parent() {
            Some(parent) => self.inodes.peek(parent).unwrap_or(UNBOUND_INO),
            None => ROOT_INO,
        };

        let dots = [(ino, "."), (parent, "..")];
        for (index, (dot_ino, name)) in dots.iter().enumerate().skip(offset.max(0) as usize) {
            if add(*dot_ino, index as i64 + 1, FileType::Directory, OsStr::new(name)) {
                return Ok(());
            }
        }

        let inodes = &self.inodes;
        self.view
            .readdir(fh, (offset - DOT_ENTRIES).max(0), |name: &OsStr, kind: NodeKind, next: i64| {
                let child = inodes.peek(&dir.join(name)).unwrap_or(UNBOUND_INO);
                add(child, next + DOT_ENTRIES, kind.to_fuser_type(), name)
            })
            .map(|_| ())
            .map_err(|e| errno(e, "readdir", &dir))
    }
}

/// Log a failed operation and map it to an errno
fn errno(err: Error, op: &str, path: &Path) -> c_int {
    match &err {
        Error::NotFound(_) => {}
        Error::Io(_) | Error::Git(_) | Error::Internal(_) => {
            error!("{} {:?} failed: {}", op, path, err)
        }
        _ => debug!("{} {:?}: {}", op, path, err),
    }
    err.to_errno()
}

/// Command line of the calling process, for diagnostics
fn process_name(pid: u32) -> String {
    match std::fs::read(format!("/proc/{}/cmdline", pid)) {
        Ok(raw) => {
            let args: Vec<_> = raw
                .split(|b| *b == 0)
                .filter(|arg| !arg.is_empty())
                .map(String::from_utf8_lossy)
                .collect();
            if args.is_empty() {
                format!("pid {}", pid)
            } else {
                args.join(" ")
            }
        }
        Err(_) => format!("pid {}", pid),
    }
}

impl Filesystem for GitBranchFs {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), c_int> {
        info!("Filesystem ready, overlay at {:?}", self.view.overlay().root());
        Ok(())
    }

    fn destroy(&mut self) {
        info!(
            "Unmounting, {} handle(s) still open",
            self.view.open_handles()
        );
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        trace_op!(self, "lookup(parent={}, name={:?})", parent, name);

        let result = self
            .child_path(parent, name)
            .and_then(|path| self.entry_attr(&path));
        match result {
            Ok(attr) => reply.entry(&self.ttl, &attr, 0),
            Err(errno) => reply.error(errno),
        }
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        trace_op!(self, "forget(ino={}, nlookup={})", ino, nlookup);
        self.inodes.forget(ino, nlookup);
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        trace_op!(self, "getattr(ino={})", ino);

        match self.path(ino).and_then(|path| self.file_attr(&path, ino)) {
            Ok(attr) => reply.attr(&self.ttl, &attr),
            Err(errno) => reply.error(errno),
        }
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        trace_op!(self, "readlink(ino={})", ino);

        let result = self.path(ino).and_then(|path| {
            self.view
                .readlink(&path)
                .map_err(|e| errno(e, "readlink", &path))
        });
        match result {
            Ok(target) => reply.data(&target),
            Err(errno) => reply.error(errno),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        reply: ReplyEntry,
    ) {
        trace_op!(self, "mkdir(parent={}, name={:?}, mode={:o})", parent, name, mode);

        let result = self.child_path(parent, name).and_then(|path| {
            self.view
                .mkdir(&path, mode & !umask)
                .map_err(|e| errno(e, "mkdir", &path))?;
            self.entry_attr(&path)
        });
        match result {
            Ok(attr) => reply.entry(&self.ttl, &attr, 0),
            Err(errno) => reply.error(errno),
        }
    }

    fn open(&mut self, req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        trace_op!(self, "open(ino={}, flags={:#x})", ino, flags);

        let accmode = flags & libc::O_ACCMODE;
        if accmode == libc::O_WRONLY || accmode == libc::O_RDWR {
            reply.error(EROFS);
            return;
        }

        let path = match self.path(ino) {
            Ok(path) => path,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };

        if tracing::enabled!(Level::DEBUG) {
            debug!("{} opened {:?}", process_name(req.pid()), path);
        }

        match self.view.open(&path) {
            Ok(fh) => reply.opened(fh, 0),
            Err(e) => reply.error(errno(e, "open", &path)),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        trace_op!(self, "read(ino={}, fh={}, offset={}, size={})", ino, fh, offset, size);

        if offset < 0 {
            reply.error(EINVAL);
            return;
        }

        match self.view.read(fh, offset as u64, size) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(errno(e, "read", Path::new(""))),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        trace_op!(self, "release(ino={}, fh={})", ino, fh);
        self.view.release(fh);
        reply.ok();
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        trace_op!(self, "opendir(ino={}, flags={:#x})", ino, flags);

        let result = self.path(ino).and_then(|path| {
            self.view
                .opendir(&path)
                .map_err(|e| errno(e, "opendir", &path))
        });
        match result {
            Ok(fh) => reply.opened(fh, 0),
            Err(errno) => reply.error(errno),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        trace_op!(self, "readdir(ino={}, fh={}, offset={})", ino, fh, offset);

        let result = self.fill_dir(ino, fh, offset, |child, next, kind, name| {
            reply.add(child, next, kind, name)
        });
        match result {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    fn releasedir(&mut self, _req: &Request<'_>, ino: u64, fh: u64, _flags: i32, reply: ReplyEmpty) {
        trace_op!(self, "releasedir(ino={}, fh={})", ino, fh);
        self.view.release(fh);
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        // Nothing is allocated on this filesystem
        reply.statfs(0, 0, 0, self.inodes.len() as u64, 0, 4096, NAME_MAX, 4096);
    }
}
