//! gitbranchfs - Git branches as a FUSE filesystem
//!
//! Usage:
//!   gitbranchfs mount <repository> <mount_point>  - Mount the filesystem
//!   gitbranchfs unmount <mount_point>             - Unmount it
//!   gitbranchfs branches <repository>             - List the branch directories
//!   gitbranchfs hide <repository> <path>          - Hide a path via the overlay
//!   gitbranchfs unhide <repository> <path>        - Remove a hiding tombstone
//!   gitbranchfs init-config                       - Write a default config file

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use gitbranchfs::{
    config::Config,
    fs::{AttrTemplate, GitBranchFs, OverlayStore, RepoView},
    store::{GitStore, ObjectStore},
    Error, Result,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "gitbranchfs")]
#[command(version = "0.1.0")]
#[command(about = "Mount the branches of a git repository as directories")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "~/.config/gitbranchfs/config.json")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mount the filesystem
    Mount {
        /// Git repository to project
        repository: PathBuf,

        /// Mount point directory
        mount_point: PathBuf,

        /// Overlay directory (default: next to the repository)
        #[arg(long)]
        overlay: Option<PathBuf>,

        /// Allow other users to access the mount
        #[arg(long)]
        allow_other: bool,

        /// Log every filesystem callback
        #[arg(long)]
        trace_operations: bool,
    },

    /// Unmount the filesystem
    Unmount {
        /// Mount point to unmount
        mount_point: PathBuf,
    },

    /// List the branches that appear at the mount root
    Branches {
        /// Git repository
        repository: PathBuf,
    },

    /// Hide a virtual path and everything below it
    Hide {
        /// Git repository
        repository: PathBuf,

        /// Virtual path, e.g. /main/docs
        path: PathBuf,

        /// Overlay directory (default: next to the repository)
        #[arg(long)]
        overlay: Option<PathBuf>,
    },

    /// Make a hidden path visible again
    Unhide {
        /// Git repository
        repository: PathBuf,

        /// Virtual path, e.g. /main/docs
        path: PathBuf,

        /// Overlay directory (default: next to the repository)
        #[arg(long)]
        overlay: Option<PathBuf>,
    },

    /// Write a default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    // Expand ~ in config path
    let config_path = expand_tilde(&cli.config);

    let config = match Config::load_or_default(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    // Setup logging; RUST_LOG wins over the configured level
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.logging.level))
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");

    if let Err(e) = run_command(cli.command, config, &config_path) {
        error!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run_command(command: Commands, config: Config, config_path: &Path) -> Result<()> {
    match command {
        Commands::Mount {
            repository,
            mount_point,
            overlay,
            allow_other,
            trace_operations,
        } => {
            let mut config = with_repository(config, repository, overlay);
            config.mount.mount_point = mount_point;
            config.mount.allow_other |= allow_other;
            config.logging.trace_operations |= trace_operations;
            cmd_mount(config)
        }

        Commands::Unmount { mount_point } => cmd_unmount(&mount_point),

        Commands::Branches { repository } => {
            cmd_branches(&with_repository(config, repository, None))
        }

        Commands::Hide {
            repository,
            path,
            overlay,
        } => cmd_hide(&with_repository(config, repository, overlay), &path),

        Commands::Unhide {
            repository,
            path,
            overlay,
        } => cmd_unhide(&with_repository(config, repository, overlay), &path),

        Commands::InitConfig { force } => cmd_init_config(config_path, force),
    }
}

/// Command-line repository and overlay override the config file
fn with_repository(mut config: Config, repository: PathBuf, overlay: Option<PathBuf>) -> Config {
    config.repository = expand_tilde(&repository);
    if let Some(overlay) = overlay {
        config.overlay.root = Some(expand_tilde(&overlay));
    }
    config
}

fn cmd_mount(config: Config) -> Result<()> {
    config.validate()?;
    config.ensure_directories()?;

    info!("Opening repository {:?}", config.repository);
    let store = GitStore::open(&config.repository)?;
    let overlay = OverlayStore::open(config.overlay_root())?;

    let template = AttrTemplate {
        uid: config.mount.uid,
        gid: config.mount.gid,
        time: SystemTime::now(),
    };
    let view = RepoView::with_template(
        Arc::new(store),
        overlay,
        config.logging.clone(),
        template,
    );
    let fs = GitBranchFs::new(view, &config);

    let mount_point = &config.mount.mount_point;
    info!("Mounting at {:?}", mount_point);

    // Build mount options
    let mut options = vec![
        fuser::MountOption::FSName(config.mount.fs_name.clone()),
        fuser::MountOption::Subtype("gitbranchfs".to_string()),
        fuser::MountOption::DefaultPermissions,
    ];

    // fusermount only honours auto_unmount together with allow_other or allow_root
    if config.mount.allow_other {
        options.push(fuser::MountOption::AllowOther);
        options.push(fuser::MountOption::AutoUnmount);
    } else if config.mount.allow_root {
        options.push(fuser::MountOption::AllowRoot);
        options.push(fuser::MountOption::AutoUnmount);
    }

    fuser::mount2(fs, mount_point, &options).map_err(|e| Error::Internal(e.to_string()))?;
    info!("Unmounted {:?}", mount_point);

    Ok(())
}

fn cmd_unmount(mount_point: &Path) -> Result<()> {
    info!("Unmounting {:?}...", mount_point);

    // Use fusermount/umount
    #[cfg(target_os = "linux")]
    let output = std::process::Command::new("fusermount")
        .arg("-u")
        .arg(mount_point)
        .output()?;

    #[cfg(not(target_os = "linux"))]
    let output = std::process::Command::new("umount")
        .arg(mount_point)
        .output()?;

    if output.status.success() {
        info!("Unmounted successfully");
        Ok(())
    } else {
        Err(Error::Internal(format!(
            "Failed to unmount: {}",
            String::from_utf8_lossy(&output.stderr)
        )))
    }
}

fn cmd_branches(config: &Config) -> Result<()> {
    let store = GitStore::open(&config.repository)?;
    let mut cursor = store.branches()?;

    let mut names = Vec::new();
    while let Some(name) = cursor.next_branch()? {
        names.push(name);
    }
    names.sort();

    for name in names {
        println!("{}", name.to_string_lossy());
    }
    Ok(())
}

fn cmd_hide(config: &Config, path: &Path) -> Result<()> {
    let overlay = OverlayStore::open(config.overlay_root())?;
    overlay.tombstone(&virtual_path(path))?;
    println!("Hidden: {}", virtual_path(path).display());
    Ok(())
}

fn cmd_unhide(config: &Config, path: &Path) -> Result<()> {
    let overlay = OverlayStore::open(config.overlay_root())?;
    if overlay.clear(&virtual_path(path))? {
        println!("Visible again: {}", virtual_path(path).display());
    } else {
        println!("Not hidden: {}", virtual_path(path).display());
    }
    Ok(())
}

fn cmd_init_config(config_path: &Path, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        return Err(Error::Config(format!(
            "{:?} already exists (use --force to overwrite)",
            config_path
        )));
    }

    Config::default().save(config_path)?;
    println!("Configuration written to {:?}", config_path);
    Ok(())
}

/// Virtual paths are always absolute
fn virtual_path(path: &Path) -> PathBuf {
    Path::new("/").join(path)
}

/// Expand ~ to home directory
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
