//! Shared fixtures for the refresh and read path tests.

#![allow(dead_code, clippy::unwrap_used, clippy::missing_panics_doc)]

use anyhow::{Result, anyhow, bail};
use mys_growth_app::{
    KvBackend, MemberSource, MemoryBackend, SourcePayload, TimeSeriesStore, Updater,
};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use time::OffsetDateTime;
use time::macros::datetime;

/// Clock pinned to 2024-01-01T12:00:00Z.
pub fn fixed_now() -> OffsetDateTime {
    datetime!(2024-01-01 12:00 UTC)
}

/// Source answering with a configurable member count and counting calls.
pub struct CountingSource {
    body: Mutex<String>,
    calls: AtomicUsize,
}

impl CountingSource {
    pub fn with_count(count: i64) -> Self {
        Self {
            body: Mutex::new(format!(r#"{{"id":1143446,"memberCount":{count}}}"#)),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_count(&self, count: i64) {
        *self.body.lock().unwrap() = format!(r#"{{"id":1143446,"memberCount":{count}}}"#);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl MemberSource for CountingSource {
    async fn fetch(&self) -> Result<SourcePayload> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let body = self.body.lock().unwrap().clone();
        Ok(SourcePayload::json(body))
    }
}

/// Source that cannot reach the upstream.
pub struct UnreachableSource;

impl MemberSource for UnreachableSource {
    async fn fetch(&self) -> Result<SourcePayload> {
        Err(anyhow!("connection refused"))
    }
}

/// Memory backend that rejects writes to one key.
#[derive(Clone)]
pub struct RejectingBackend {
    pub inner: MemoryBackend,
    pub reject: &'static str,
}

impl KvBackend for RejectingBackend {
    type Error = anyhow::Error;

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.get(key).await?)
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        if key == self.reject {
            bail!("write to '{key}' rejected");
        }
        Ok(self.inner.put(key, value).await?)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.inner.delete(key).await?)
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self.inner.list_keys(prefix).await?)
    }
}

/// Updater over a fresh memory backend with the pinned clock.
pub fn memory_updater(source: CountingSource) -> (MemoryBackend, Updater<MemoryBackend, CountingSource>) {
    let backend = MemoryBackend::new();
    let updater = Updater::new(TimeSeriesStore::new(backend.clone()), source).with_clock(fixed_now);
    (backend, updater)
}

/// Seed `key` with `value` directly, bypassing validation.
pub async fn seed(backend: &MemoryBackend, key: &str, value: &str) {
    backend.put(key, value).await.unwrap();
}
