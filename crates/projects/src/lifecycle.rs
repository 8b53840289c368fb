//! Explicit lifecycle transitions: restore, purge and the bulk recovery
//! operations. None of these run as part of a sync.

use std::sync::Arc;

use tracing::{info, warn};

use crate::{
    error::{Error, Result},
    store::ProjectRegistry,
    types::Project,
};

pub struct LifecycleManager {
    registry: Arc<dyn ProjectRegistry>,
}

impl LifecycleManager {
    pub fn new(registry: Arc<dyn ProjectRegistry>) -> Self {
        Self { registry }
    }

    /// Bring an archived project back.
    ///
    /// The stored path must still be a directory; when it is gone the caller
    /// should re-scan instead, which tracks the directory under a new row if
    /// it moved without an identity key.
    pub async fn restore(&self, id: &str) -> Result<Project> {
        let project = self
            .registry
            .get(id)
            .await?
            .ok_or_else(|| Error::not_found(id))?;
        project.state().restore(id)?;

        let exists = tokio::fs::metadata(&project.path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !exists {
            return Err(Error::path_vanished(id, &project.path));
        }

        let restored = self.registry.restore(id).await?;
        info!(id, path = %restored.path.display(), "project restored");
        Ok(restored)
    }

    /// Permanently delete an archived project. Dependents survive with their
    /// project reference cleared.
    pub async fn purge(&self, id: &str) -> Result<()> {
        self.registry.purge(id).await?;
        info!(id, "project purged");
        Ok(())
    }

    pub async fn purge_all_archived(&self) -> Result<u64> {
        let purged = self.registry.purge_archived().await?;
        info!(purged, "purged archived projects");
        Ok(purged)
    }

    /// Delete every project and every dependent record. Irreversible; meant
    /// for recovering from a corrupted registry, not for normal use.
    pub async fn reset_all(&self) -> Result<u64> {
        let deleted = self.registry.reset().await?;
        warn!(deleted, "project registry reset");
        Ok(deleted)
    }
}
