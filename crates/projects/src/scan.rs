//! Default directory scanner.
//!
//! Walks a root directory looking for project markers and turns each hit into
//! a [`Candidate`]. Per-directory inspection runs on a bounded pool of
//! blocking tasks; nothing here touches the registry.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use {
    async_trait::async_trait,
    futures::{StreamExt, stream},
    tracing::{debug, warn},
    walkdir::{DirEntry, WalkDir},
};

use crate::{
    error::{Error, Result},
    identity::IdentityDeriver,
    types::{Candidate, ScanReport, ScanWarning},
};

/// Files or directories whose presence marks a project, with the tag each
/// one contributes.
const MARKERS: &[(&str, &str)] = &[
    (".git", "git"),
    ("Cargo.toml", "rust"),
    ("package.json", "node"),
    ("pyproject.toml", "python"),
    ("go.mod", "go"),
];

/// Directory names never descended into, besides hidden ones such as `.git`
/// and `.cargo`.
const IGNORED_DIRS: &[&str] = &["node_modules", "target"];

pub const DEFAULT_MAX_DEPTH: usize = 2;
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Produces project candidates for a root directory.
///
/// Implementations omit unreadable directories (reporting them as warnings)
/// and fail only when the root itself cannot be read.
#[async_trait]
pub trait DirectoryScanner: Send + Sync {
    async fn scan(&self, root: &Path) -> Result<ScanReport>;
}

/// Filesystem scanner driven by [`MARKERS`].
#[derive(Debug, Clone)]
pub struct FsScanner {
    max_depth: usize,
    concurrency: usize,
    deriver: IdentityDeriver,
}

impl Default for FsScanner {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH, DEFAULT_CONCURRENCY, IdentityDeriver::default())
    }
}

impl FsScanner {
    #[must_use]
    pub fn new(max_depth: usize, concurrency: usize, deriver: IdentityDeriver) -> Self {
        Self {
            max_depth: max_depth.max(1),
            concurrency: concurrency.max(1),
            deriver,
        }
    }
}

#[async_trait]
impl DirectoryScanner for FsScanner {
    async fn scan(&self, root: &Path) -> Result<ScanReport> {
        let root = root.to_path_buf();
        let max_depth = self.max_depth;
        let (dirs, mut warnings) =
            tokio::task::spawn_blocking(move || find_project_dirs(&root, max_depth)).await??;

        let deriver = self.deriver;
        let inspected: Vec<_> = stream::iter(dirs)
            .map(|dir| {
                tokio::task::spawn_blocking(move || {
                    inspect_dir(&dir, &deriver).map_err(|e| (dir, e))
                })
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut candidates = Vec::with_capacity(inspected.len());
        for result in inspected {
            match result? {
                Ok(candidate) => candidates.push(candidate),
                Err((path, e)) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable project directory");
                    warnings.push(ScanWarning {
                        path,
                        message: e.to_string(),
                    });
                },
            }
        }

        candidates.sort_by(|a, b| a.path.cmp(&b.path));
        warnings.sort_by(|a, b| a.path.cmp(&b.path));
        debug!(
            candidates = candidates.len(),
            warnings = warnings.len(),
            "scan complete"
        );
        Ok(ScanReport {
            candidates,
            warnings,
        })
    }
}

fn is_ignored(entry: &DirEntry) -> bool {
    if entry.depth() == 0 {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || IGNORED_DIRS.contains(&name.as_ref())
}

fn has_marker(dir: &Path) -> bool {
    MARKERS.iter().any(|(marker, _)| dir.join(marker).exists())
}

/// Walk `root` and collect directories carrying a project marker.
fn find_project_dirs(root: &Path, max_depth: usize) -> Result<(Vec<PathBuf>, Vec<ScanWarning>)> {
    let meta = fs::metadata(root)
        .map_err(|e| Error::io(format!("cannot read scan root {}", root.display()), e))?;
    if !meta.is_dir() {
        return Err(Error::io(
            format!("scan root {} is not a directory", root.display()),
            io::Error::new(io::ErrorKind::NotADirectory, "not a directory"),
        ));
    }

    let mut dirs = Vec::new();
    let mut warnings = Vec::new();
    let walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(max_depth)
        .into_iter()
        .filter_entry(|e| !is_ignored(e));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.into());
                if e.depth() == 0 {
                    let source = e
                        .into_io_error()
                        .unwrap_or_else(|| io::Error::other("filesystem loop at scan root"));
                    return Err(Error::io(
                        format!("cannot read scan root {}", root.display()),
                        source,
                    ));
                }
                warnings.push(ScanWarning {
                    path,
                    message: e.to_string(),
                });
                continue;
            },
        };
        if !entry.file_type().is_dir() || !has_marker(entry.path()) {
            continue;
        }
        if entry.path().to_str().is_none() {
            warn!(path = %entry.path().display(), "skipping project with non-UTF-8 path");
            warnings.push(ScanWarning {
                path: entry.into_path(),
                message: "path is not valid UTF-8".into(),
            });
            continue;
        }
        dirs.push(entry.into_path());
    }
    Ok((dirs, warnings))
}

fn inspect_dir(dir: &Path, deriver: &IdentityDeriver) -> io::Result<Candidate> {
    // Fails on permission problems before we derive anything from the contents.
    fs::read_dir(dir)?;

    let tags = MARKERS
        .iter()
        .filter(|(marker, _)| dir.join(marker).exists())
        .map(|(_, tag)| (*tag).to_string())
        .collect();

    Ok(Candidate {
        path: dir.to_path_buf(),
        name: derive_name(dir),
        tags,
        color: None,
        identity_key: deriver.derive(dir),
    })
}

/// Derive a human-friendly project name.
///
/// Resolution order:
/// 1. `Cargo.toml` package name
/// 2. `package.json` name
/// 3. Directory name
pub fn derive_name(dir: &Path) -> String {
    if let Some(name) = cargo_name(dir) {
        return name;
    }
    if let Some(name) = package_json_name(dir) {
        return name;
    }
    dir.file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string()
}

fn cargo_name(dir: &Path) -> Option<String> {
    let content = fs::read_to_string(dir.join("Cargo.toml")).ok()?;
    let table: toml::Table = toml::from_str(&content).ok()?;
    table
        .get("package")?
        .get("name")?
        .as_str()
        .map(String::from)
}

fn package_json_name(dir: &Path) -> Option<String> {
    let content = fs::read_to_string(dir.join("package.json")).ok()?;
    let val: serde_json::Value = serde_json::from_str(&content).ok()?;
    val.get("name")?.as_str().map(String::from)
}
