//! Read path: primary, then last good backup, then a synchronous refresh.

use mys_growth_core::date_key;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::backend::KvBackend;
use crate::error::SeriesError;
use crate::series_store::{LAST_GOOD_BACKUP_KEY, PRIMARY_KEY, trusted_series};
use crate::source::MemberSource;
use crate::updater::Updater;

/// Headers attached to every read response.
pub const RESPONSE_HEADERS: [(&str, &str); 2] = [
    ("Access-Control-Allow-Origin", "*"),
    ("Content-Type", "application/json"),
];

/// Where a read response body came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadSource {
    /// The primary slot was valid.
    Primary,
    /// The primary slot was unusable; served the last good backup.
    LastGoodBackup,
    /// Both slots were unusable; served the result of a fresh commit.
    Refreshed,
}

impl fmt::Display for ReadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Primary => "primary",
            Self::LastGoodBackup => "last_good_backup",
            Self::Refreshed => "refreshed",
        })
    }
}

/// A successful read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadResponse {
    /// Slot the body was served from.
    pub source: ReadSource,
    /// Stored series bytes, unmodified.
    pub body: String,
}

impl ReadResponse {
    /// Headers to send with the body.
    pub const fn headers(&self) -> &'static [(&'static str, &'static str)] {
        &RESPONSE_HEADERS
    }
}

/// Serves the cached series, healing the cache when both slots are unusable.
pub struct ReadService<B, S> {
    updater: Arc<Updater<B, S>>,
}

impl<B, S> Clone for ReadService<B, S> {
    fn clone(&self) -> Self {
        Self {
            updater: Arc::clone(&self.updater),
        }
    }
}

impl<B, S> ReadService<B, S> {
    /// Read service sharing `updater` with the scheduled path.
    pub const fn new(updater: Arc<Updater<B, S>>) -> Self {
        Self { updater }
    }

    /// The shared updater.
    pub const fn updater(&self) -> &Arc<Updater<B, S>> {
        &self.updater
    }
}

impl<B: KvBackend, S: MemberSource> ReadService<B, S> {
    /// Return the first valid slot in primary, last good backup order, or
    /// refresh and return the newly committed primary.
    ///
    /// # Errors
    /// Propagates any [`SeriesError`] from the refresh, and
    /// [`SeriesError::Decode`] when a slot is undecodable under strict decoding.
    pub async fn read(&self) -> Result<ReadResponse, SeriesError> {
        let store = self.updater.store();
        let policy = self.updater.decode_policy();

        if let Some(body) = store.get_primary().await?
            && trusted_series(PRIMARY_KEY, Some(&body), policy)?.is_some()
        {
            return Ok(ReadResponse {
                source: ReadSource::Primary,
                body,
            });
        }

        if let Some(body) = store.get_last_good_backup().await?
            && trusted_series(LAST_GOOD_BACKUP_KEY, Some(&body), policy)?.is_some()
        {
            warn!("Serving last good backup");
            return Ok(ReadResponse {
                source: ReadSource::LastGoodBackup,
                body,
            });
        }

        info!("No valid cached series, refreshing before responding");
        let outcome = self.updater.merge_and_commit(self.updater.now()).await?;
        let body = store
            .get_primary()
            .await?
            .ok_or_else(|| SeriesError::Consistency(date_key(outcome.date)))?;
        Ok(ReadResponse {
            source: ReadSource::Refreshed,
            body,
        })
    }
}
