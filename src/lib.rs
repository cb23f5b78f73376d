//! gitbranchfs - Git branches as a read-mostly FUSE filesystem
//!
//! Every local branch of a repository appears as a top-level directory
//! holding that branch's tree. A local overlay directory can shadow paths
//! with real files or hide them with tombstones.

pub mod config;
pub mod error;
pub mod fs;
pub mod store;

#[cfg(test)]
mod testutil;

pub use config::Config;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::fs::{GitBranchFs, OverlayStore, RepoView};
    pub use crate::store::{GitStore, ObjectStore};
}
