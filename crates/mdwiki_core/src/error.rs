use std::path::PathBuf;

use thiserror::Error;

/// Failures surfaced by page store, conflict guard and version control operations.
#[derive(Debug, Error)]
pub enum WikiError {
    #[error("invalid page name '{0}': use letters, digits and hyphens, separated by '/'")]
    InvalidName(String),

    #[error("failed to store '{}': {source}", path.display())]
    Storage {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("edit conflict on page '{page}': the page changed since it was opened for editing")]
    Conflict { page: String },

    #[error("git {operation} failed: {message}")]
    VersionControl { operation: String, message: String },

    #[error("invalid revision identifier '{0}'")]
    InvalidRevision(String),
}

impl WikiError {
    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn vcs(operation: &str, message: impl Into<String>) -> Self {
        Self::VersionControl {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    /// Stable kind label used by JSON output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidName(_) => "invalid_name",
            Self::Storage { .. } => "storage",
            Self::Conflict { .. } => "conflict",
            Self::VersionControl { .. } => "version_control",
            Self::InvalidRevision(_) => "invalid_revision",
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, WikiError>;
