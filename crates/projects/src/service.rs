//! Single entry point wiring the scanner, reconciler and lifecycle manager
//! around one registry.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use tracing::{debug, info};

use crate::{
    error::{Error, Result},
    lifecycle::LifecycleManager,
    reconcile::Reconciler,
    scan::DirectoryScanner,
    store::ProjectRegistry,
    types::{Candidate, Project, ScanReport, SyncResult},
};

pub struct ProjectService {
    scanner: Arc<dyn DirectoryScanner>,
    registry: Arc<dyn ProjectRegistry>,
    reconciler: Reconciler,
    lifecycle: LifecycleManager,
    default_root: Option<PathBuf>,
}

impl ProjectService {
    pub fn new(scanner: Arc<dyn DirectoryScanner>, registry: Arc<dyn ProjectRegistry>) -> Self {
        Self {
            reconciler: Reconciler::new(Arc::clone(&registry)),
            lifecycle: LifecycleManager::new(Arc::clone(&registry)),
            scanner,
            registry,
            default_root: None,
        }
    }

    /// Root used by [`Self::sync`] when none is given.
    #[must_use]
    pub fn with_default_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.default_root = Some(root.into());
        self
    }

    pub fn default_root(&self) -> Option<&Path> {
        self.default_root.as_deref()
    }

    fn resolve_root<'a>(&'a self, root: Option<&'a Path>) -> Result<&'a Path> {
        root.or(self.default_root.as_deref())
            .ok_or_else(|| Error::message("no scan root given and none configured"))
    }

    /// Scan without touching the registry.
    pub async fn scan(&self, root: Option<&Path>) -> Result<ScanReport> {
        let root = self.resolve_root(root)?;
        debug!(root = %root.display(), "scanning");
        self.scanner.scan(root).await
    }

    /// Scan `root` (or the default root) and reconcile the result.
    ///
    /// A scan failure aborts before the registry is read, so an unreachable
    /// root never archives anything.
    pub async fn sync(&self, root: Option<&Path>) -> Result<SyncResult> {
        let report = self.scan(root).await?;
        self.reconciler.sync(report).await
    }

    /// Track candidates directly, without matching or archiving. Candidates
    /// whose path or identity key is already active are skipped.
    pub async fn import(&self, candidates: &[Candidate]) -> Result<Vec<Project>> {
        let added = self.registry.insert(candidates).await?;
        info!(
            requested = candidates.len(),
            added = added.len(),
            "imported projects"
        );
        Ok(added)
    }

    pub async fn list_active(&self) -> Result<Vec<Project>> {
        self.registry.list_active().await
    }

    pub async fn list_archived(&self) -> Result<Vec<Project>> {
        self.registry.list_archived().await
    }

    pub async fn get(&self, id: &str) -> Result<Option<Project>> {
        self.registry.get(id).await
    }

    pub async fn restore(&self, id: &str) -> Result<Project> {
        self.lifecycle.restore(id).await
    }

    pub async fn purge(&self, id: &str) -> Result<()> {
        self.lifecycle.purge(id).await
    }

    pub async fn purge_all_archived(&self) -> Result<u64> {
        self.lifecycle.purge_all_archived().await
    }

    pub async fn reset_all(&self) -> Result<u64> {
        self.lifecycle.reset_all().await
    }
}
