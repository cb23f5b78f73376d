//! Configuration management for gitbranchfs

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directory name of the default overlay, created next to the repository
pub const DEFAULT_OVERLAY_DIR: &str = "gitbranchfs-overlay";

/// Default attribute/entry cache TTL handed to the kernel
pub const DEFAULT_ATTR_TTL_SECS: u64 = 1;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path of the git repository to project
    pub repository: PathBuf,

    /// Overlay configuration
    pub overlay: OverlayConfig,

    /// Mount configuration
    pub mount: MountConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Overlay configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Overlay root; defaults to a directory next to the repository
    pub root: Option<PathBuf>,
}

/// Mount configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    /// Mount point path
    pub mount_point: PathBuf,

    /// Allow other users to access the mount
    pub allow_other: bool,

    /// Allow root to access the mount
    pub allow_root: bool,

    /// Seconds the kernel may cache attributes and lookups
    pub attr_ttl_secs: u64,

    /// UID for synthesized attributes
    pub uid: u32,

    /// GID for synthesized attributes
    pub gid: u32,

    /// Filesystem name shown in the mount table
    pub fs_name: String,
}

/// Logging configuration, passed to the filesystem at construction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,

    /// Log every host callback at debug level
    pub trace_operations: bool,
}

impl Default for MountConfig {
    fn default() -> Self {
        MountConfig {
            mount_point: PathBuf::from("/mnt/gitbranchfs"),
            allow_other: false,
            allow_root: false,
            attr_ttl_secs: DEFAULT_ATTR_TTL_SECS,
            uid: nix::unistd::getuid().as_raw(),
            gid: nix::unistd::getgid().as_raw(),
            fs_name: "gitbranchfs".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            trace_operations: false,
        }
    }
}

impl Config {
    /// Default location of the config file
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("gitbranchfs")
            .join("config.json")
    }

    /// Load configuration from a file, with environment variable overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!("Failed to read config file: {}", e))
        })?;

        let mut config: Config = serde_json::from_str(&content).map_err(|e| {
            Error::Config(format!("Failed to parse config file: {}", e))
        })?;

        config.apply_env_overrides();
        Ok(config)
    }

    /// Load the file at `path` if it exists, otherwise start from defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            let mut config = Config::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(repository) = std::env::var("GITBRANCHFS_REPOSITORY") {
            let repository = repository.trim();
            if !repository.is_empty() {
                self.repository = PathBuf::from(repository);
            }
        }

        if let Ok(overlay) = std::env::var("GITBRANCHFS_OVERLAY") {
            let overlay = overlay.trim();
            if !overlay.is_empty() {
                self.overlay.root = Some(PathBuf::from(overlay));
            }
        }

        if let Ok(level) = std::env::var("GITBRANCHFS_LOG") {
            let level = level.trim();
            if !level.is_empty() {
                self.logging.level = level.to_string();
            }
        }
    }

    /// Effective overlay root
    pub fn overlay_root(&self) -> PathBuf {
        match &self.overlay.root {
            Some(root) => root.clone(),
            None => self.repository.join(DEFAULT_OVERLAY_DIR),
        }
    }

    /// Save configuration to a file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self).map_err(|e| {
            Error::Config(format!("Failed to serialize config: {}", e))
        })?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path.as_ref(), content).map_err(|e| {
            Error::Config(format!("Failed to write config file: {}", e))
        })?;

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.repository.as_os_str().is_empty() {
            return Err(Error::InvalidConfig(
                "Repository path is required".to_string(),
            ));
        }

        let overlay = self.overlay_root();
        if overlay == self.repository {
            return Err(Error::InvalidConfig(
                "Overlay root must differ from the repository".to_string(),
            ));
        }

        if !self.mount.mount_point.as_os_str().is_empty() && overlay.starts_with(&self.mount.mount_point) {
            return Err(Error::InvalidConfig(
                "Overlay root must not live inside the mount point".to_string(),
            ));
        }

        if self.mount.fs_name.is_empty() {
            return Err(Error::InvalidConfig(
                "Filesystem name must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Ensure all required directories exist
    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(self.overlay_root())?;
        std::fs::create_dir_all(&self.mount.mount_point)?;
        Ok(())
    }
}
