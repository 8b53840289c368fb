//! Config schema types (scan, database, watcher, identity).
use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

/// Root configuration for rootline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RootlineConfig {
    pub scan: ScanConfig,
    pub database: DatabaseConfig,
    pub watcher: WatcherConfig,
    pub identity: IdentityConfig,
}

/// Where and how deep to look for projects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Directory scanned when no root is given on the command line.
    pub root: Option<PathBuf>,
    /// Maximum directory depth below the root. Defaults to 2.
    pub max_depth: usize,
    /// Directories inspected in parallel. Defaults to 8.
    pub concurrency: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            root: None,
            max_depth: 2,
            concurrency: 8,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file. Defaults to `rootline.db` in the data directory.
    pub path: Option<PathBuf>,
}

/// Removal watcher used by `rootline watch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Quiet period after the last removal before a sync runs.
    pub debounce_ms: u64,
    /// Pending removal events kept before new ones are dropped.
    pub channel_capacity: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 2_000,
            channel_capacity: 256,
        }
    }
}

impl WatcherConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Fall back to a `.rootline-id` stamp file for directories without a
    /// git remote. Off by default: rootline never writes into projects.
    pub stamp_files: bool,
}
