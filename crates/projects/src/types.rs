use std::{
    fmt,
    path::PathBuf,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Conflict, Error, Result},
    identity::IdentityKey,
};

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A tracked development directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub tags: Vec<String>,
    pub color: Option<String>,
    pub identity_key: Option<IdentityKey>,
    pub sort_order: i64,
    pub is_archived: bool,
    pub archived_at: Option<u64>,
    pub created_at: u64,
}

impl Project {
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        if self.is_archived {
            LifecycleState::Archived
        } else {
            LifecycleState::Active
        }
    }
}

/// One scanner-produced directory description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub path: PathBuf,
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub color: Option<String>,
    pub identity_key: Option<IdentityKey>,
}

impl Candidate {
    /// Candidate with just a path and name, as produced for bare directories.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            tags: Vec::new(),
            color: None,
            identity_key: None,
        }
    }

    #[must_use]
    pub fn with_identity_key(mut self, key: impl Into<IdentityKey>) -> Self {
        self.identity_key = Some(key.into());
        self
    }
}

/// A directory the scanner had to skip. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanWarning {
    pub path: PathBuf,
    pub message: String,
}

/// Output of a directory scan: the candidates plus anything skipped.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub candidates: Vec<Candidate>,
    pub warnings: Vec<ScanWarning>,
}

impl From<Vec<Candidate>> for ScanReport {
    fn from(candidates: Vec<Candidate>) -> Self {
        Self {
            candidates,
            warnings: Vec::new(),
        }
    }
}

/// The diff applied by one reconciliation pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncResult {
    pub added: Vec<Project>,
    pub updated: Vec<Project>,
    pub archived_count: u32,
    pub unchanged_count: u32,
    /// Candidates rejected because they collide with another active project.
    pub conflicts: Vec<Conflict>,
    pub warnings: Vec<ScanWarning>,
}

impl SyncResult {
    /// True when the pass changed nothing in the registry.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.archived_count == 0
    }
}

/// Lifecycle of a project row. `Purged` is terminal and never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Active,
    Archived,
    Purged,
}

impl LifecycleState {
    pub fn archive(self, id: &str) -> Result<Self> {
        match self {
            Self::Active => Ok(Self::Archived),
            other => Err(Error::invalid_transition(id, other, "archive")),
        }
    }

    pub fn restore(self, id: &str) -> Result<Self> {
        match self {
            Self::Archived => Ok(Self::Active),
            other => Err(Error::invalid_transition(id, other, "restore")),
        }
    }

    pub fn purge(self, id: &str) -> Result<Self> {
        match self {
            Self::Archived => Ok(Self::Purged),
            other => Err(Error::invalid_transition(id, other, "purge")),
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Archived => write!(f, "archived"),
            Self::Purged => write!(f, "purged"),
        }
    }
}

/// A planning item that may reference a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanningItem {
    pub id: String,
    pub project_id: Option<String>,
    pub subject: String,
    pub status: String,
    pub created_at: u64,
}

/// An issue-tracker link that may reference a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueLink {
    pub id: String,
    pub project_id: Option<String>,
    pub url: String,
    pub created_at: u64,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_restore_purge_transitions() {
        let archived = LifecycleState::Active.archive("p1").unwrap();
        assert_eq!(archived, LifecycleState::Archived);
        assert_eq!(archived.restore("p1").unwrap(), LifecycleState::Active);
        assert_eq!(archived.purge("p1").unwrap(), LifecycleState::Purged);
    }

    #[test]
    fn purge_from_active_is_rejected() {
        let err = LifecycleState::Active.purge("p1").unwrap_err();
        assert!(matches!(err, Error::InvalidState { ref id, .. } if id == "p1"));
        assert!(err.to_string().contains("cannot purge while active"));
    }

    #[test]
    fn purged_is_terminal() {
        assert!(LifecycleState::Purged.restore("p1").is_err());
        assert!(LifecycleState::Purged.archive("p1").is_err());
        assert!(LifecycleState::Purged.purge("p1").is_err());
    }

    #[test]
    fn restore_from_active_is_rejected() {
        assert!(matches!(
            LifecycleState::Active.restore("p1"),
            Err(Error::InvalidState { .. })
        ));
    }
}
