use std::path::{Path, PathBuf};

use crate::{identity::IdentityKey, types::LifecycleState};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Filesystem failure while scanning or re-validating a directory.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("project not found: {id}")]
    NotFound { id: String },
    #[error("project {id}: {reason}")]
    InvalidState { id: String, reason: String },
    #[error("path is not valid UTF-8: {}", path.display())]
    NonUtf8Path { path: PathBuf },
    #[error(transparent)]
    Conflict(#[from] Conflict),
    #[error(transparent)]
    Store(#[from] sqlx::Error),
    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
    #[cfg(feature = "file-watcher")]
    #[error(transparent)]
    Watch(#[from] notify_debouncer_full::notify::Error),
    #[error("{message}")]
    Message { message: String },
}

/// A mutation that would break the uniqueness of `path` or `identity_key`
/// among active projects.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Conflict {
    #[error("{} is already tracked by active project {holder}", path.display())]
    Path {
        path: PathBuf,
        /// Active project occupying `path`.
        holder: String,
        /// Archived project whose restore onto `path` was rejected, if any.
        project: Option<String>,
    },
    #[error(
        "identity {identity_key} at {} is already claimed by {}",
        path.display(),
        holder_path.display()
    )]
    IdentityKey {
        identity_key: IdentityKey,
        path: PathBuf,
        /// Directory of the project (tracked or new) holding the key.
        holder_path: PathBuf,
    },
}

impl Error {
    #[must_use]
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    #[must_use]
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// A lifecycle transition that is not allowed from `state`.
    #[must_use]
    pub fn invalid_transition(
        id: impl Into<String>,
        state: LifecycleState,
        action: &'static str,
    ) -> Self {
        Self::InvalidState {
            id: id.into(),
            reason: format!("cannot {action} while {state}"),
        }
    }

    /// The backing directory of an archived project is gone; re-scan instead.
    #[must_use]
    pub fn path_vanished(id: impl Into<String>, path: &Path) -> Self {
        Self::InvalidState {
            id: id.into(),
            reason: format!("path no longer exists: {}", path.display()),
        }
    }

    #[must_use]
    pub fn non_utf8_path(path: &Path) -> Self {
        Self::NonUtf8Path {
            path: path.to_path_buf(),
        }
    }

    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    /// Whether retrying the same call later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::Store(_) | Self::Join(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
