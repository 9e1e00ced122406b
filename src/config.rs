//! Store configuration
//!
//! Holds the process-wide base directory that relative binding paths resolve
//! against, plus the defaults used when declaring new bindings.

use directories::ProjectDirs;
use std::path::PathBuf;
use std::time::Duration;

/// Idle delay for declared stashes that do not pick their own
pub const DEFAULT_WRITE_DELAY: Duration = Duration::from_secs(5);

/// Configuration for a [`crate::Store`]
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory that relative binding files resolve against
    pub base_dir: PathBuf,
    /// Idle delay used by `declare` when the caller does not pick one
    pub default_delay: Duration,
    /// Create missing parent directories before writing a backing file
    pub create_missing_dirs: bool,
}

impl StoreConfig {
    /// Creates a config rooted at the XDG-compliant data directory
    ///
    /// Uses `~/.local/share/stash/` on Linux, or the equivalent per-user
    /// application data directory on other platforms.
    /// Returns `None` if the directory cannot be determined (e.g., no home directory).
    pub fn new() -> Option<Self> {
        let project_dirs = ProjectDirs::from("", "", "stash")?;
        Some(Self::with_dir(project_dirs.data_dir().to_path_buf()))
    }

    /// Creates a config rooted at a custom directory
    ///
    /// Useful for testing or when a specific location is needed.
    pub fn with_dir(base_dir: PathBuf) -> Self {
        Self {
            base_dir,
            ..Default::default()
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            default_delay: DEFAULT_WRITE_DELAY,
            create_missing_dirs: false,
        }
    }
}
