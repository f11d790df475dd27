//! Error types for git-backed key-value operations.

use thiserror::Error;

/// Errors surfaced by the key-value store when driven from async code.
#[derive(Error, Debug)]
pub enum GitKvError {
    /// Git repository error.
    #[error("Git repository error: {0}")]
    GitError(#[from] git2::Error),

    /// The blocking worker running the git operation panicked or was cancelled.
    #[error("Blocking task failed: {0}")]
    Join(String),

    /// Other unclassified error.
    #[error("Other error: {0}")]
    Other(String),
}

impl From<anyhow::Error> for GitKvError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<git2::Error>() {
            Ok(git) => Self::GitError(git),
            Err(other) => Self::Other(format!("{other:#}")),
        }
    }
}
