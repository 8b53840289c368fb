use std::{
    path::{Path, PathBuf},
    sync::RwLock,
};

use tracing::{debug, warn};

use crate::{
    env_subst::substitute_env,
    error::{Error, Result},
    schema::RootlineConfig,
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "rootline.toml",
    "rootline.yaml",
    "rootline.yml",
    "rootline.json",
];

const DB_FILENAME: &str = "rootline.db";

static CONFIG_DIR_OVERRIDE: RwLock<Option<PathBuf>> = RwLock::new(None);

/// Use `dir` instead of the user-global config directory.
pub fn set_config_dir(dir: PathBuf) {
    *CONFIG_DIR_OVERRIDE
        .write()
        .unwrap_or_else(|e| e.into_inner()) = Some(dir);
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", "rootline")
}

/// Returns the config directory: the override if set, else
/// `~/.config/rootline/`.
pub fn config_dir() -> Option<PathBuf> {
    if let Some(dir) = CONFIG_DIR_OVERRIDE
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .clone()
    {
        return Some(dir);
    }
    project_dirs().map(|d| d.config_dir().to_path_buf())
}

/// Returns the platform data dir (`~/.local/share/rootline/`), else the
/// current directory.
pub fn data_dir() -> PathBuf {
    project_dirs()
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// The registry database: `[database] path` if set, else `rootline.db` in
/// [`data_dir`].
pub fn database_path(config: &RootlineConfig) -> PathBuf {
    config
        .database
        .path
        .clone()
        .unwrap_or_else(|| data_dir().join(DB_FILENAME))
}

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> Result<RootlineConfig> {
    let raw = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations, then apply
/// environment overrides.
///
/// Search order:
/// 1. `./rootline.{toml,yaml,yml,json}` (project-local)
/// 2. `<config dir>/rootline.{toml,yaml,yml,json}` (user-global)
///
/// Falls back to `RootlineConfig::default()` if no file is found or the file
/// fails to load.
pub fn discover_and_load() -> RootlineConfig {
    let mut search = vec![PathBuf::from(".")];
    search.extend(config_dir());

    let config = match find_config_file(&search) {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            load_config(&path).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                RootlineConfig::default()
            })
        },
        None => {
            debug!("no config file found, using defaults");
            RootlineConfig::default()
        },
    };
    apply_env_overrides(config)
}

/// First existing config file across `dirs`, in order.
fn find_config_file(dirs: &[PathBuf]) -> Option<PathBuf> {
    dirs.iter()
        .flat_map(|dir| CONFIG_FILENAMES.iter().map(move |name| dir.join(name)))
        .find(|p| p.is_file())
}

/// Apply `ROOTLINE_SCAN_ROOT` and `ROOTLINE_DB` on top of `config`.
pub fn apply_env_overrides(config: RootlineConfig) -> RootlineConfig {
    apply_env_overrides_with(config, |name| std::env::var(name).ok())
}

fn apply_env_overrides_with(
    mut config: RootlineConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> RootlineConfig {
    if let Some(root) = lookup("ROOTLINE_SCAN_ROOT").filter(|v| !v.is_empty()) {
        config.scan.root = Some(PathBuf::from(root));
    }
    if let Some(db) = lookup("ROOTLINE_DB").filter(|v| !v.is_empty()) {
        config.database.path = Some(PathBuf::from(db));
    }
    config
}

fn parse_config(raw: &str, path: &Path) -> Result<RootlineConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => toml::from_str(raw).map_err(|e| Error::parse(path, e)),
        "yaml" | "yml" => serde_yaml::from_str(raw).map_err(|e| Error::parse(path, e)),
        "json" => serde_json::from_str(raw).map_err(|e| Error::parse(path, e)),
        _ => Err(Error::UnsupportedFormat { ext: ext.into() }),
    }
}
