//! Fetch, merge, validate and commit one daily sample.

use mys_growth_core::{DataPoint, Merge, TimeSeries, is_valid_entries, merge_point};
use time::{Date, OffsetDateTime};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::backend::KvBackend;
use crate::error::SeriesError;
use crate::series_store::{
    DecodePolicy, LAST_GOOD_BACKUP_KEY, PRIMARY_KEY, RetentionPolicy, TimeSeriesStore,
    trusted_series,
};
use crate::source::{MemberSource, fetch_latest_point};

/// Summary of a successful [`Updater::merge_and_commit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOutcome {
    /// UTC date of the sample.
    pub date: Date,
    /// Member count that was sampled.
    pub count: u64,
    /// False when the date was already present and the series is unchanged.
    pub appended: bool,
    /// True when neither cached slot held a valid series.
    pub started_fresh: bool,
    /// Key the pre-write snapshot was stored under.
    pub backup_key: String,
    /// Number of entries in the committed series.
    pub series_len: usize,
    /// Backups removed by retention afterwards.
    pub pruned: usize,
}

/// Owns the write path. Commits are serialized through an internal lock.
pub struct Updater<B, S> {
    store: TimeSeriesStore<B>,
    source: S,
    retention: RetentionPolicy,
    decode_policy: DecodePolicy,
    clock: fn() -> OffsetDateTime,
    commit_lock: Mutex<()>,
}

impl<B, S> Updater<B, S> {
    /// Updater with unbounded retention, lenient decoding and the system clock.
    pub fn new(store: TimeSeriesStore<B>, source: S) -> Self {
        Self {
            store,
            source,
            retention: RetentionPolicy::unbounded(),
            decode_policy: DecodePolicy::default(),
            clock: OffsetDateTime::now_utc,
            commit_lock: Mutex::new(()),
        }
    }

    /// Prune backups with `retention` after each commit.
    #[must_use]
    pub const fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    /// Treat undecodable slots according to `policy`.
    #[must_use]
    pub const fn with_decode_policy(mut self, policy: DecodePolicy) -> Self {
        self.decode_policy = policy;
        self
    }

    /// Replace the clock used for backup keys and read-triggered refreshes.
    #[must_use]
    pub const fn with_clock(mut self, clock: fn() -> OffsetDateTime) -> Self {
        self.clock = clock;
        self
    }

    /// The underlying store.
    pub const fn store(&self) -> &TimeSeriesStore<B> {
        &self.store
    }

    /// The configured source.
    pub const fn source(&self) -> &S {
        &self.source
    }

    /// The configured retention policy.
    pub const fn retention(&self) -> &RetentionPolicy {
        &self.retention
    }

    /// The configured decode policy.
    pub const fn decode_policy(&self) -> DecodePolicy {
        self.decode_policy
    }

    /// Current instant according to the configured clock.
    pub fn now(&self) -> OffsetDateTime {
        (self.clock)()
    }
}

impl<B: KvBackend, S: MemberSource> Updater<B, S> {
    /// Fetch the current count and fold it into the cached series for `at`'s
    /// UTC date.
    ///
    /// The base series is the primary slot when valid, else the last good
    /// backup, else empty. Writes go snapshot, primary, last good backup, in
    /// that order. Re-running on the same date leaves both slots byte-identical.
    ///
    /// # Errors
    /// - [`SeriesError::Fetch`] or [`SeriesError::Backend`] when the source fails; nothing is written.
    /// - [`SeriesError::Decode`] when a slot is undecodable under [`DecodePolicy::Strict`].
    /// - [`SeriesError::Integrity`] or [`SeriesError::Consistency`] when the merged series is unusable; nothing is written.
    /// - [`SeriesError::Backend`] when a store operation fails.
    pub async fn merge_and_commit(&self, at: OffsetDateTime) -> Result<CommitOutcome, SeriesError> {
        let payload = self.source.fetch().await?;
        let point = fetch_latest_point(&payload, at)?;
        debug!(date = %point.date_key(), count = point.count, "Fetched latest sample");

        let _guard = self.commit_lock.lock().await;
        self.commit(&point).await
    }

    /// The series a merge would start from.
    ///
    /// # Errors
    /// Returns [`SeriesError::Decode`] under [`DecodePolicy::Strict`] and
    /// [`SeriesError::Backend`] when a read fails.
    pub async fn load_trusted(&self) -> Result<Option<TimeSeries>, SeriesError> {
        let primary = self.store.get_primary().await?;
        if let Some(series) = trusted_series(PRIMARY_KEY, primary.as_deref(), self.decode_policy)? {
            return Ok(Some(series));
        }
        let backup = self.store.get_last_good_backup().await?;
        let series = trusted_series(LAST_GOOD_BACKUP_KEY, backup.as_deref(), self.decode_policy)?;
        if series.is_some() {
            warn!("Primary slot unusable, merging onto last good backup");
        }
        Ok(series)
    }

    async fn commit(&self, point: &DataPoint) -> Result<CommitOutcome, SeriesError> {
        let base = self.load_trusted().await?;
        let started_fresh = base.is_none();
        if started_fresh {
            warn!("No valid cached series, starting a new one");
        }

        let Merge { series, appended } = merge_point(base, point);
        if !appended {
            debug!(date = %point.date_key(), "Record already exists for date");
        }
        if !is_valid_entries(series.entries()) {
            return Err(SeriesError::Integrity(PRIMARY_KEY.to_owned()));
        }
        if !series.contains_date(point.date) {
            return Err(SeriesError::Consistency(point.date_key()));
        }

        let encoded = series.encode();
        let now = self.now();
        let backup_key = self.store.record_backup(&encoded, now).await?;
        self.store.set_primary(&encoded).await?;
        self.store.set_last_good_backup(&encoded).await?;

        let pruned = self
            .store
            .prune_backups(&self.retention, now, Some(&backup_key))
            .await?
            .len();

        info!(
            date = %point.date_key(),
            count = point.count,
            appended,
            entries = series.len(),
            %backup_key,
            "Committed series"
        );
        Ok(CommitOutcome {
            date: point.date,
            count: point.count,
            appended,
            started_fresh,
            backup_key,
            series_len: series.len(),
            pruned,
        })
    }
}
