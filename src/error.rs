//! Error types for gitbranchfs

use std::io;
use std::path::Path;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the projection layer and its adapters
#[derive(Debug, Error)]
pub enum Error {
    /// Path does not resolve to a repository or overlay object
    #[error("not found: {0}")]
    NotFound(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("not a file: {0}")]
    NotAFile(String),

    #[error("not a symlink: {0}")]
    NotASymlink(String),

    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// A constructed overlay path exceeds PATH_MAX
    #[error("name too long: {0}")]
    NameTooLong(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("invalid file handle: {0}")]
    InvalidHandle(u64),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Classify a local filesystem error by its OS errno.
    ///
    /// Errors without a dedicated variant stay `Io` so the host still sees
    /// the original errno (e.g. `EACCES`).
    pub fn from_io(err: io::Error, path: &Path) -> Self {
        let name = path.display().to_string();
        match err.raw_os_error() {
            Some(libc::ENOENT) => Error::NotFound(name),
            Some(libc::ENOTDIR) => Error::NotADirectory(name),
            Some(libc::ENAMETOOLONG) => Error::NameTooLong(name),
            Some(libc::ENOMEM) => Error::OutOfMemory(name),
            _ => Error::Io(err),
        }
    }

    /// Classify a libgit2 error raised while looking up `what`
    pub fn from_git(err: git2::Error, what: &str) -> Self {
        match err.code() {
            git2::ErrorCode::NotFound
            | git2::ErrorCode::InvalidSpec
            | git2::ErrorCode::Ambiguous => Error::NotFound(what.to_string()),
            _ if err.class() == git2::ErrorClass::Os => {
                Error::Io(io::Error::other(err.message().to_string()))
            }
            _ => Error::Git(err),
        }
    }

    /// Map to the errno reported to the filesystem host
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Error::NotFound(_) => libc::ENOENT,
            Error::NotADirectory(_) => libc::ENOTDIR,
            Error::NotAFile(_) => libc::EISDIR,
            Error::NotASymlink(_) => libc::EINVAL,
            Error::OutOfMemory(_) => libc::ENOMEM,
            Error::NameTooLong(_) => libc::ENAMETOOLONG,
            Error::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            Error::InvalidHandle(_) => libc::EBADF,
            Error::Git(_) | Error::Config(_) | Error::InvalidConfig(_) | Error::Internal(_) => {
                libc::EIO
            }
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_classification() {
        let path = Path::new("/main/docs");

        let err = Error::from_io(io::Error::from_raw_os_error(libc::ENOENT), path);
        assert!(err.is_not_found());

        let err = Error::from_io(io::Error::from_raw_os_error(libc::ENOTDIR), path);
        assert!(matches!(err, Error::NotADirectory(_)));

        let err = Error::from_io(io::Error::from_raw_os_error(libc::ENAMETOOLONG), path);
        assert!(matches!(err, Error::NameTooLong(_)));

        // Permission problems keep their own errno
        let err = Error::from_io(io::Error::from_raw_os_error(libc::EACCES), path);
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(err.to_errno(), libc::EACCES);
    }

    #[test]
    fn test_errno_mapping() {
        assert_eq!(Error::NotFound("x".into()).to_errno(), libc::ENOENT);
        assert_eq!(Error::NotADirectory("x".into()).to_errno(), libc::ENOTDIR);
        assert_eq!(Error::NotAFile("x".into()).to_errno(), libc::EISDIR);
        assert_eq!(Error::OutOfMemory("x".into()).to_errno(), libc::ENOMEM);
        assert_eq!(Error::NameTooLong("x".into()).to_errno(), libc::ENAMETOOLONG);
        assert_eq!(Error::InvalidHandle(7).to_errno(), libc::EBADF);
        assert_eq!(
            Error::Io(io::Error::new(io::ErrorKind::Other, "boom")).to_errno(),
            libc::EIO
        );
    }

    #[test]
    fn test_git_classification() {
        let err = git2::Error::new(
            git2::ErrorCode::NotFound,
            git2::ErrorClass::Reference,
            "no such ref",
        );
        assert!(Error::from_git(err, "main").is_not_found());

        let err = git2::Error::new(
            git2::ErrorCode::GenericError,
            git2::ErrorClass::Odb,
            "corrupt",
        );
        assert!(matches!(Error::from_git(err, "main"), Error::Git(_)));
    }
}
