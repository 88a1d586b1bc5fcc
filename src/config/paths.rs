//! Path resolution for outbound configuration and data files.
//!
//! All outbound data is stored in `~/.outbound/` unless `OUTBOUND_HOME`
//! points elsewhere:
//! - `config.yaml` - Main configuration file
//! - `outbound.db` - SQLite database holding the queue and eviction log

use std::path::PathBuf;

use crate::error::OutboundError;

/// Environment variable that overrides the data directory.
pub const HOME_ENV: &str = "OUTBOUND_HOME";

/// Paths to outbound configuration and data files.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Root directory: `~/.outbound/`
    pub root: PathBuf,
    /// Config file: `~/.outbound/config.yaml`
    pub config_file: PathBuf,
    /// Database file: `~/.outbound/outbound.db`
    pub database: PathBuf,
}

impl Paths {
    /// Resolve paths from `OUTBOUND_HOME` or the user's home directory.
    ///
    /// # Errors
    ///
    /// Returns an error if neither location can be determined.
    pub fn new() -> Result<Self, OutboundError> {
        if let Ok(root) = std::env::var(HOME_ENV) {
            if !root.is_empty() {
                return Ok(Self::with_root(PathBuf::from(root)));
            }
        }

        let home = std::env::var("HOME").map_err(|_| {
            OutboundError::Config("Could not determine home directory".to_string())
        })?;

        Ok(Self::with_root(PathBuf::from(home).join(".outbound")))
    }

    /// Create paths with a custom root directory.
    #[must_use]
    pub fn with_root(root: PathBuf) -> Self {
        Self {
            config_file: root.join("config.yaml"),
            database: root.join("outbound.db"),
            root,
        }
    }

    /// Ensure the root directory exists.
    ///
    /// # Errors
    ///
    /// Returns an error if directory creation fails.
    pub fn ensure_dirs(&self) -> Result<(), OutboundError> {
        if !self.root.exists() {
            std::fs::create_dir_all(&self.root).map_err(|e| {
                OutboundError::Config(format!(
                    "Failed to create directory {}: {e}",
                    self.root.display()
                ))
            })?;
        }

        Ok(())
    }
}
