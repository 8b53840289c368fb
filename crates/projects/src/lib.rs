//! Project identity reconciliation.
//!
//! A project is a directory on disk tracked by a stable id. Scans produce
//! candidates; the reconciler matches them to tracked rows by identity key
//! first and by path second, so a renamed or moved checkout keeps its id and
//! everything that references it. Rows whose directory disappears are
//! archived, never deleted, until a user explicitly purges them.

pub mod error;
pub mod identity;
pub mod lifecycle;
pub mod reconcile;
pub mod scan;
pub mod service;
pub mod store;
pub mod types;
pub mod watcher;

pub use {
    error::{Conflict, Error, Result},
    identity::{IdentityDeriver, IdentityKey},
    lifecycle::LifecycleManager,
    reconcile::{Reconciler, SyncPlan},
    scan::{DirectoryScanner, FsScanner},
    service::ProjectService,
    store::{ProjectRegistry, SqliteProjectRegistry},
    types::{Candidate, LifecycleState, Project, ScanReport, ScanWarning, SyncResult},
    watcher::{RemovalEvent, StaleDebouncer, StaleSignal},
};

#[cfg(feature = "file-watcher")]
pub use watcher::RemovalWatcher;

/// Run database migrations for the projects crate.
///
/// Creates the `projects` table, the dependent tables and the partial unique
/// indexes that keep active paths and identity keys unique. Called by
/// [`SqliteProjectRegistry::open`]; call it yourself before
/// [`SqliteProjectRegistry::new`] when sharing a pool.
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}
