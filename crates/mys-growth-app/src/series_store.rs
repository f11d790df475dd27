//! Gated access to the three series slots.

use mys_growth_core::{Inspection, TimeSeries, validate};
use std::num::NonZeroUsize;
use time::macros::format_description;
use time::{Duration, OffsetDateTime, PrimitiveDateTime, UtcOffset};
use tracing::{debug, info, warn};

use crate::backend::KvBackend;
use crate::error::SeriesError;

/// Key of the authoritative series.
pub const PRIMARY_KEY: &str = "data";
/// Key of the most recent series that passed validation at commit time.
pub const LAST_GOOD_BACKUP_KEY: &str = "last_good_backup";
/// Prefix shared by every snapshot backup key.
pub const BACKUP_PREFIX: &str = "backup_data_";

/// How a slot whose bytes are not JSON is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodePolicy {
    /// Treat it like any other invalid slot and fall back.
    #[default]
    Lenient,
    /// Abort with [`SeriesError::Decode`].
    Strict,
}

/// Resolve a raw slot read to a trusted series, if any.
///
/// Missing and structurally invalid slots yield `Ok(None)`. Undecodable slots
/// yield `Ok(None)` or an error depending on `policy`.
///
/// # Errors
/// Returns [`SeriesError::Decode`] for undecodable slots under
/// [`DecodePolicy::Strict`].
pub fn trusted_series(
    slot: &str,
    raw: Option<&str>,
    policy: DecodePolicy,
) -> Result<Option<TimeSeries>, SeriesError> {
    let inspection = Inspection::inspect(raw);
    debug!(slot, state = inspection.label(), "Inspected slot");
    match inspection {
        Inspection::Valid(series) => Ok(Some(series)),
        Inspection::Missing => Ok(None),
        Inspection::Invalid => {
            warn!(slot, "Slot failed integrity check");
            Ok(None)
        }
        Inspection::Corrupt(source) => match policy {
            DecodePolicy::Strict => Err(SeriesError::Decode {
                slot: slot.to_owned(),
                source,
            }),
            DecodePolicy::Lenient => {
                warn!(slot, error = %source, "Slot holds undecodable data");
                Ok(None)
            }
        },
    }
}

/// Backup key for a commit at `at`: `backup_data_YYYY-MM-DDTHH:MM:SS.mmmZ`.
#[must_use]
pub fn backup_key(at: OffsetDateTime) -> String {
    let at = at.to_offset(UtcOffset::UTC);
    format!(
        "{BACKUP_PREFIX}{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
        at.year(),
        u8::from(at.month()),
        at.day(),
        at.hour(),
        at.minute(),
        at.second(),
        at.millisecond()
    )
}

/// Instant encoded in a backup key, ignoring any collision suffix.
#[must_use]
pub fn backup_instant(key: &str) -> Option<OffsetDateTime> {
    let stamp = key.strip_prefix(BACKUP_PREFIX)?.get(..24)?;
    let format = format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z"
    );
    PrimitiveDateTime::parse(stamp, format)
        .ok()
        .map(PrimitiveDateTime::assume_utc)
}

/// Collision suffix of a backup key, `0` when there is none.
fn backup_suffix(key: &str) -> u32 {
    key.strip_prefix(BACKUP_PREFIX)
        .and_then(|rest| rest.get(24..))
        .and_then(|tail| tail.strip_prefix('-'))
        .and_then(|suffix| suffix.parse().ok())
        .unwrap_or(0)
}

/// Which snapshot backups to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetentionPolicy {
    /// Keep at most this many of the newest backups.
    pub keep_last: Option<NonZeroUsize>,
    /// Delete backups older than this.
    pub max_age: Option<Duration>,
}

impl RetentionPolicy {
    /// Keep every backup forever.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self {
            keep_last: None,
            max_age: None,
        }
    }

    /// True when nothing would ever be deleted.
    #[must_use]
    pub const fn is_unbounded(&self) -> bool {
        self.keep_last.is_none() && self.max_age.is_none()
    }

    /// Keys to delete from `keys` (sorted oldest first) at instant `now`.
    /// `protect` is never selected.
    #[must_use]
    pub fn expired<'a>(
        &self,
        keys: &'a [String],
        now: OffsetDateTime,
        protect: Option<&str>,
    ) -> Vec<&'a str> {
        let overflow = self
            .keep_last
            .map_or(0, |keep| keys.len().saturating_sub(keep.get()));
        keys.iter()
            .enumerate()
            .filter(|(_, key)| Some(key.as_str()) != protect)
            .filter(|(idx, key)| {
                let too_many = *idx < overflow;
                let too_old = self.max_age.is_some_and(|max_age| {
                    backup_instant(key).is_some_and(|stamp| now - stamp > max_age)
                });
                too_many || too_old
            })
            .map(|(_, key)| key.as_str())
            .collect()
    }
}

/// The three logical slots on top of a [`KvBackend`].
pub struct TimeSeriesStore<B> {
    backend: B,
}

impl<B> TimeSeriesStore<B> {
    /// Wrap a backend.
    pub const fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Borrow the backend.
    pub const fn backend(&self) -> &B {
        &self.backend
    }
}

impl<B: KvBackend> TimeSeriesStore<B> {
    /// Raw read of the primary slot.
    ///
    /// # Errors
    /// Returns [`SeriesError::Backend`] when the read fails.
    pub async fn get_primary(&self) -> Result<Option<String>, SeriesError> {
        self.backend
            .get(PRIMARY_KEY)
            .await
            .map_err(SeriesError::backend)
    }

    /// Raw read of the last-good-backup slot.
    ///
    /// # Errors
    /// Returns [`SeriesError::Backend`] when the read fails.
    pub async fn get_last_good_backup(&self) -> Result<Option<String>, SeriesError> {
        self.backend
            .get(LAST_GOOD_BACKUP_KEY)
            .await
            .map_err(SeriesError::backend)
    }

    /// Validated write of the primary slot.
    ///
    /// # Errors
    /// Returns [`SeriesError::Integrity`] or [`SeriesError::Decode`] without
    /// touching the backend when `encoded` fails validation, and
    /// [`SeriesError::Backend`] when the write fails.
    pub async fn set_primary(&self, encoded: &str) -> Result<(), SeriesError> {
        self.gated_put(PRIMARY_KEY, encoded).await
    }

    /// Validated write of the last-good-backup slot.
    ///
    /// # Errors
    /// Same as [`Self::set_primary`].
    pub async fn set_last_good_backup(&self, encoded: &str) -> Result<(), SeriesError> {
        self.gated_put(LAST_GOOD_BACKUP_KEY, encoded).await
    }

    async fn gated_put(&self, slot: &str, encoded: &str) -> Result<(), SeriesError> {
        match validate(encoded) {
            Ok(true) => {}
            Ok(false) => return Err(SeriesError::Integrity(slot.to_owned())),
            Err(source) => {
                return Err(SeriesError::Decode {
                    slot: slot.to_owned(),
                    source,
                });
            }
        }
        self.backend
            .put(slot, encoded)
            .await
            .map_err(SeriesError::backend)
    }

    /// Unvalidated write of a snapshot backup keyed by `at`.
    ///
    /// Never overwrites an existing backup: a collision gets a `-N` suffix.
    /// Returns the key written.
    ///
    /// # Errors
    /// Returns [`SeriesError::Backend`] when the store fails.
    pub async fn record_backup(&self, encoded: &str, at: OffsetDateTime) -> Result<String, SeriesError> {
        let base = backup_key(at);
        let mut key = base.clone();
        let mut attempt = 0u32;
        while self
            .backend
            .get(&key)
            .await
            .map_err(SeriesError::backend)?
            .is_some()
        {
            attempt += 1;
            key = format!("{base}-{attempt}");
        }
        self.backend
            .put(&key, encoded)
            .await
            .map_err(SeriesError::backend)?;
        debug!(%key, "Recorded backup");
        Ok(key)
    }

    /// Every backup key, oldest first.
    ///
    /// Keys are ordered by their instant and then numerically by collision
    /// suffix. Keys without a parseable instant come first.
    ///
    /// # Errors
    /// Returns [`SeriesError::Backend`] when listing fails.
    pub async fn list_backups(&self) -> Result<Vec<String>, SeriesError> {
        let mut keys = self
            .backend
            .list_keys(BACKUP_PREFIX)
            .await
            .map_err(SeriesError::backend)?;
        keys.sort_by_cached_key(|key| (backup_instant(key), backup_suffix(key), key.clone()));
        Ok(keys)
    }

    /// Apply `policy`, returning the deleted keys.
    ///
    /// # Errors
    /// Returns [`SeriesError::Backend`] when listing or deleting fails.
    pub async fn prune_backups(
        &self,
        policy: &RetentionPolicy,
        now: OffsetDateTime,
        protect: Option<&str>,
    ) -> Result<Vec<String>, SeriesError> {
        if policy.is_unbounded() {
            return Ok(Vec::new());
        }
        let keys = self.list_backups().await?;
        let mut deleted = Vec::new();
        for key in policy.expired(&keys, now, protect) {
            if self
                .backend
                .delete(key)
                .await
                .map_err(SeriesError::backend)?
            {
                deleted.push(key.to_owned());
            }
        }
        if !deleted.is_empty() {
            info!(count = deleted.len(), remaining = keys.len() - deleted.len(), "Pruned backups");
        }
        Ok(deleted)
    }
}
