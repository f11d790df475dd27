//! Error kinds surfaced by the refresh and read paths.

use anyhow::Error;
use mys_growth_core::DecodeError;

/// Errors surfaced by [`crate::TimeSeriesStore`], [`crate::Updater`] and
/// [`crate::ReadService`].
#[derive(thiserror::Error, Debug)]
pub enum SeriesError {
    /// A stored value is not JSON.
    #[error("decode error in slot '{slot}': {source}")]
    Decode {
        /// Slot key the value was read from (or is about to be written to).
        slot: String,
        /// Underlying parse failure.
        #[source]
        source: DecodeError,
    },
    /// A candidate series failed structural validation before a write.
    #[error("integrity check failed for slot '{0}'")]
    Integrity(String),
    /// The source payload did not yield a usable sample.
    #[error("unable to get latest data: {0}")]
    Fetch(String),
    /// The merged series lacks the point it was supposed to gain.
    #[error("{0} - current date not found in data")]
    Consistency(String),
    /// Key-value store or network failure.
    #[error("backend error: {0}")]
    Backend(#[from] Error),
}

impl SeriesError {
    pub(crate) fn backend<E: Into<Error>>(err: E) -> Self {
        Self::Backend(err.into())
    }

    /// Stable name of the error kind, used in logs and HTTP error bodies.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Decode { .. } => "decode",
            Self::Integrity(_) => "integrity",
            Self::Fetch(_) => "fetch",
            Self::Consistency(_) => "consistency",
            Self::Backend(_) => "backend",
        }
    }
}
