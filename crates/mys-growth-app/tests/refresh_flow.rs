//! Scheduled refresh behavior against an in-memory backend.

#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use common::{CountingSource, RejectingBackend, UnreachableSource, fixed_now, memory_updater, seed};
use mys_growth_app::{
    BACKUP_PREFIX, DecodePolicy, KvBackend, LAST_GOOD_BACKUP_KEY, MemoryBackend, PRIMARY_KEY,
    RetentionPolicy, SeriesError, TimeSeriesStore, Updater, handle_scheduled,
};
use std::num::NonZeroUsize;
use std::sync::Arc;
use time::macros::datetime;

#[tokio::test]
async fn empty_store_gains_first_point() -> anyhow::Result<()> {
    let (backend, updater) = memory_updater(CountingSource::with_count(500));

    let outcome = handle_scheduled(&updater, datetime!(2024-01-01 00:00 UTC)).await?;
    assert!(outcome.appended);
    assert!(outcome.started_fresh);
    assert_eq!(outcome.series_len, 1);

    let values = backend.snapshot().await;
    let expected = r#"[["2024-01-01",500]]"#;
    assert_eq!(values.get(PRIMARY_KEY).map(String::as_str), Some(expected));
    assert_eq!(values.get(LAST_GOOD_BACKUP_KEY).map(String::as_str), Some(expected));
    let backups: Vec<_> = values.keys().filter(|key| key.starts_with(BACKUP_PREFIX)).collect();
    assert_eq!(backups.len(), 1);
    assert_eq!(values.get(backups[0]).map(String::as_str), Some(expected));
    Ok(())
}

#[tokio::test]
async fn same_day_refresh_is_idempotent_but_still_snapshots() -> anyhow::Result<()> {
    let (backend, updater) = memory_updater(CountingSource::with_count(500));
    let at = datetime!(2024-01-01 00:00 UTC);

    updater.merge_and_commit(at).await?;
    let first = backend.snapshot().await;

    updater.source().set_count(650);
    let outcome = updater.merge_and_commit(datetime!(2024-01-01 23:59 UTC)).await?;
    assert!(!outcome.appended);
    assert_eq!(outcome.count, 650);

    let second = backend.snapshot().await;
    assert_eq!(second.get(PRIMARY_KEY), first.get(PRIMARY_KEY));
    assert_eq!(second.get(LAST_GOOD_BACKUP_KEY), first.get(LAST_GOOD_BACKUP_KEY));
    assert_eq!(updater.store().list_backups().await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn later_dates_append_without_sorting() -> anyhow::Result<()> {
    let (backend, updater) = memory_updater(CountingSource::with_count(720));
    seed(&backend, PRIMARY_KEY, r#"[["2024-01-05",700]]"#).await;

    updater.merge_and_commit(datetime!(2024-01-02 08:00 UTC)).await?;
    assert_eq!(
        updater.store().get_primary().await?.as_deref(),
        Some(r#"[["2024-01-05",700],["2024-01-02",720]]"#)
    );
    Ok(())
}

#[tokio::test]
async fn zero_member_count_writes_nothing() -> anyhow::Result<()> {
    let (backend, updater) = memory_updater(CountingSource::with_count(0));

    let Err(err) = handle_scheduled(&updater, fixed_now()).await else {
        panic!("zero member count must fail");
    };
    assert!(matches!(err, SeriesError::Fetch(_)));
    assert!(backend.snapshot().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn unreachable_source_is_a_backend_error() -> anyhow::Result<()> {
    let backend = MemoryBackend::new();
    let updater = Updater::new(TimeSeriesStore::new(backend.clone()), UnreachableSource);

    let Err(err) = updater.merge_and_commit(fixed_now()).await else {
        panic!("network failure must propagate");
    };
    assert_eq!(err.kind(), "backend");
    assert!(backend.snapshot().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn invalid_primary_merges_onto_last_good_backup() -> anyhow::Result<()> {
    let (backend, updater) = memory_updater(CountingSource::with_count(500));
    seed(&backend, PRIMARY_KEY, r#"{"broken":true}"#).await;
    seed(&backend, LAST_GOOD_BACKUP_KEY, r#"[["2023-12-31",480]]"#).await;

    let outcome = updater.merge_and_commit(fixed_now()).await?;
    assert!(!outcome.started_fresh);
    assert_eq!(
        updater.store().get_primary().await?.as_deref(),
        Some(r#"[["2023-12-31",480],["2024-01-01",500]]"#)
    );
    Ok(())
}

#[tokio::test]
async fn undecodable_slots_fall_back_or_abort_by_policy() -> anyhow::Result<()> {
    let (backend, updater) = memory_updater(CountingSource::with_count(500));
    seed(&backend, PRIMARY_KEY, "not json").await;
    seed(&backend, LAST_GOOD_BACKUP_KEY, "[[").await;

    let outcome = updater.merge_and_commit(fixed_now()).await?;
    assert!(outcome.started_fresh);

    let backend = MemoryBackend::new();
    seed(&backend, PRIMARY_KEY, "not json").await;
    let strict = Updater::new(
        TimeSeriesStore::new(backend.clone()),
        CountingSource::with_count(500),
    )
    .with_decode_policy(DecodePolicy::Strict);
    let Err(err) = strict.merge_and_commit(fixed_now()).await else {
        panic!("strict decoding must abort");
    };
    assert!(matches!(err, SeriesError::Decode { ref slot, .. } if slot == PRIMARY_KEY));
    assert_eq!(backend.snapshot().await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn malformed_later_entries_survive_a_merge() -> anyhow::Result<()> {
    let (backend, updater) = memory_updater(CountingSource::with_count(500));
    seed(&backend, PRIMARY_KEY, r#"[["2023-12-31",480],"junk",{"a":1}]"#).await;

    updater.merge_and_commit(fixed_now()).await?;
    assert_eq!(
        updater.store().get_primary().await?.as_deref(),
        Some(r#"[["2023-12-31",480],"junk",{"a":1},["2024-01-01",500]]"#)
    );
    Ok(())
}

#[tokio::test]
async fn failed_primary_write_leaves_snapshot_only() -> anyhow::Result<()> {
    let inner = MemoryBackend::new();
    let backend = RejectingBackend {
        inner: inner.clone(),
        reject: PRIMARY_KEY,
    };
    let updater = Updater::new(TimeSeriesStore::new(backend), CountingSource::with_count(500))
        .with_clock(fixed_now);

    let Err(err) = updater.merge_and_commit(fixed_now()).await else {
        panic!("rejected write must propagate");
    };
    assert_eq!(err.kind(), "backend");

    let values = inner.snapshot().await;
    assert_eq!(values.len(), 1);
    assert!(values.keys().all(|key| key.starts_with(BACKUP_PREFIX)));
    Ok(())
}

#[tokio::test]
async fn retention_prunes_old_snapshots_after_commit() -> anyhow::Result<()> {
    let backend = MemoryBackend::new();
    let updater = Updater::new(
        TimeSeriesStore::new(backend.clone()),
        CountingSource::with_count(500),
    )
    .with_clock(fixed_now)
    .with_retention(RetentionPolicy {
        keep_last: NonZeroUsize::new(2),
        max_age: None,
    });

    let mut last = None;
    for _ in 0..3 {
        last = Some(updater.merge_and_commit(fixed_now()).await?);
    }
    let last = last.unwrap();
    assert_eq!(last.pruned, 1);

    let backups = updater.store().list_backups().await?;
    assert_eq!(backups.len(), 2);
    assert!(backups.contains(&last.backup_key));
    assert!(backend.get(PRIMARY_KEY).await?.is_some());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_refreshes_are_serialized() -> anyhow::Result<()> {
    let backend = MemoryBackend::new();
    let updater = Arc::new(
        Updater::new(
            TimeSeriesStore::new(backend.clone()),
            CountingSource::with_count(500),
        )
        .with_clock(fixed_now),
    );

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let updater = Arc::clone(&updater);
        tasks.push(tokio::spawn(async move {
            updater.merge_and_commit(fixed_now()).await
        }));
    }
    let mut appended = 0;
    for task in tasks {
        if task.await??.appended {
            appended += 1;
        }
    }
    assert_eq!(appended, 1);

    let values = backend.snapshot().await;
    let expected = r#"[["2024-01-01",500]]"#;
    assert_eq!(values.get(PRIMARY_KEY).map(String::as_str), Some(expected));
    assert_eq!(values.get(LAST_GOOD_BACKUP_KEY).map(String::as_str), Some(expected));
    assert_eq!(updater.store().list_backups().await?.len(), 8);
    Ok(())
}
