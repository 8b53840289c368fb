//! Configuration loading and env substitution.
//!
//! Config files: `rootline.toml`, `rootline.yaml`, `rootline.yml` or
//! `rootline.json`. Searched in `./` then `~/.config/rootline/`.
//!
//! Supports `${ENV_VAR}` substitution in the raw file, and the
//! `ROOTLINE_SCAN_ROOT` / `ROOTLINE_DB` overrides.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;

pub use {
    error::{Error, Result},
    loader::{
        apply_env_overrides, config_dir, data_dir, database_path, discover_and_load,
        load_config, set_config_dir,
    },
    schema::{DatabaseConfig, IdentityConfig, RootlineConfig, ScanConfig, WatcherConfig},
};
