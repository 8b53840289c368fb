use std::path::{Path, PathBuf};

use {
    rootline_config::WatcherConfig,
    rootline_projects::{
        ProjectService, RemovalEvent, RemovalWatcher, StaleDebouncer, watcher::watch_targets,
    },
    tokio::sync::mpsc,
    tracing::{info, warn},
};

use crate::{
    output::{self, Output},
    project_commands::resolve_root,
};

/// Sync once, then re-sync whenever a watched directory loses an entry.
/// Runs until interrupted.
pub async fn watch(
    service: &ProjectService,
    root: Option<PathBuf>,
    config: &WatcherConfig,
    out: &Output,
) -> anyhow::Result<()> {
    let root = resolve_root(service, root)?;
    let result = service.sync(root.as_deref()).await?;
    out.emit(&result, output::sync_lines)?;

    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let (_debouncer, mut stale) = StaleDebouncer::new(config.debounce()).spawn(rx);
    let mut watcher = start_watcher(service, root.as_deref(), tx.clone()).await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, stopping watch");
                break;
            },
            signal = stale.recv() => {
                if signal.is_none() {
                    break;
                }
                match service.sync(root.as_deref()).await {
                    Ok(result) => {
                        out.emit(&result, output::sync_lines)?;
                        // The tracked set may have changed; watch the new parents.
                        drop(watcher);
                        watcher = start_watcher(service, root.as_deref(), tx.clone()).await?;
                    },
                    Err(e) if e.is_retryable() => {
                        warn!(error = %e, "sync failed, will retry on the next change");
                    },
                    Err(e) => return Err(e.into()),
                }
            },
        }
    }
    Ok(())
}

async fn start_watcher(
    service: &ProjectService,
    root: Option<&Path>,
    tx: mpsc::Sender<RemovalEvent>,
) -> anyhow::Result<RemovalWatcher> {
    let tracked = service.list_active().await?;
    let targets = watch_targets(root, &tracked);
    info!(directories = targets.len(), "watching for removals");
    Ok(RemovalWatcher::start(targets, tx)?)
}
