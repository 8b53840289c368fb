use std::path::{Path, PathBuf};

use {anyhow::Context, rootline_projects::ProjectService, serde::Serialize};

use crate::output::{self, Output};

/// Absolute form of the root to scan: the argument if given, else the
/// configured default. `None` lets the service report the missing root.
pub fn resolve_root(
    service: &ProjectService,
    root: Option<PathBuf>,
) -> anyhow::Result<Option<PathBuf>> {
    let Some(root) = root.or_else(|| service.default_root().map(Path::to_path_buf)) else {
        return Ok(None);
    };
    let resolved = std::fs::canonicalize(&root)
        .with_context(|| format!("cannot resolve scan root {}", root.display()))?;
    Ok(Some(resolved))
}

pub async fn scan(
    service: &ProjectService,
    root: Option<PathBuf>,
    out: &Output,
) -> anyhow::Result<()> {
    let root = resolve_root(service, root)?;
    let report = service.scan(root.as_deref()).await?;
    out.emit(&report, output::scan_lines)
}

pub async fn sync(
    service: &ProjectService,
    root: Option<PathBuf>,
    out: &Output,
) -> anyhow::Result<()> {
    let root = resolve_root(service, root)?;
    let result = service.sync(root.as_deref()).await?;
    out.emit(&result, output::sync_lines)
}

pub async fn import(
    service: &ProjectService,
    root: Option<PathBuf>,
    out: &Output,
) -> anyhow::Result<()> {
    let root = resolve_root(service, root)?;
    let report = service.scan(root.as_deref()).await?;
    let added = service.import(&report.candidates).await?;
    let skipped = report.candidates.len().saturating_sub(added.len());
    out.emit(&added, |added| {
        let mut lines: Vec<String> = added
            .iter()
            .map(|p| format!("imported  {}", output::project_line(p)))
            .collect();
        lines.push(format!("{} imported, {skipped} already tracked", added.len()));
        lines
    })
}

pub async fn list(service: &ProjectService, archived: bool, out: &Output) -> anyhow::Result<()> {
    let projects = if archived {
        service.list_archived().await?
    } else {
        service.list_active().await?
    };
    out.emit(&projects, |p| output::project_lines(p))
}

pub async fn restore(service: &ProjectService, id: &str, out: &Output) -> anyhow::Result<()> {
    let project = service.restore(id).await?;
    out.emit(&project, |p| vec![format!("restored  {}", output::project_line(p))])
}

#[derive(Serialize)]
struct Deleted<'a> {
    action: &'a str,
    count: u64,
}

pub async fn purge(service: &ProjectService, id: &str, out: &Output) -> anyhow::Result<()> {
    service.purge(id).await?;
    out.emit(
        &Deleted {
            action: "purge",
            count: 1,
        },
        |_| vec![format!("purged {id}")],
    )
}

pub async fn purge_archived(service: &ProjectService, out: &Output) -> anyhow::Result<()> {
    let count = service.purge_all_archived().await?;
    out.emit(
        &Deleted {
            action: "purge_archived",
            count,
        },
        |d| vec![format!("purged {} archived project(s)", d.count)],
    )
}

pub async fn reset(service: &ProjectService, yes: bool, out: &Output) -> anyhow::Result<()> {
    if !yes {
        anyhow::bail!(
            "reset deletes every project and every record that references one; re-run with --yes"
        );
    }
    let count = service.reset_all().await?;
    out.emit(
        &Deleted {
            action: "reset",
            count,
        },
        |d| vec![format!("deleted {} project(s)", d.count)],
    )
}
