//! Async key-value backend seam.

use anyhow::Error;
use mys_growth_store_git::{GitKvError, GitKvStore};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Opaque get/put store the series slots live in.
///
/// Implementations only move strings; they never interpret values.
pub trait KvBackend: Send + Sync {
    /// Error type bubbled up from the backing store.
    type Error: Into<Error> + Send;

    /// Read the value stored under `key`.
    ///
    /// # Errors
    /// Returns a store-specific error when the read fails.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, Self::Error>> + Send;

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    /// Returns a store-specific error when the write fails.
    fn put(&self, key: &str, value: &str) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Remove `key`, reporting whether it existed.
    ///
    /// # Errors
    /// Returns a store-specific error when the removal fails.
    fn delete(&self, key: &str) -> impl Future<Output = Result<bool, Self::Error>> + Send;

    /// Keys starting with `prefix`, sorted ascending.
    ///
    /// # Errors
    /// Returns a store-specific error when listing fails.
    fn list_keys(&self, prefix: &str) -> impl Future<Output = Result<Vec<String>, Self::Error>> + Send;
}

/// In-process backend for tests and throwaway runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    values: Arc<Mutex<BTreeMap<String, String>>>,
}

impl MemoryBackend {
    /// Empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every stored key/value pair.
    pub async fn snapshot(&self) -> BTreeMap<String, String> {
        self.values.lock().await.clone()
    }
}

impl KvBackend for MemoryBackend {
    type Error = Infallible;

    async fn get(&self, key: &str) -> Result<Option<String>, Self::Error> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), Self::Error> {
        self.values
            .lock()
            .await
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, Self::Error> {
        Ok(self.values.lock().await.remove(key).is_some())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, Self::Error> {
        Ok(self
            .values
            .lock()
            .await
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}

/// Git-ref backend; git work runs on the blocking pool.
#[derive(Clone)]
pub struct GitBackend {
    store: Arc<GitKvStore>,
}

impl GitBackend {
    /// Wrap an opened store.
    pub fn new(store: GitKvStore) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    async fn run<T, F>(&self, op: F) -> Result<T, GitKvError>
    where
        T: Send + 'static,
        F: FnOnce(&GitKvStore) -> anyhow::Result<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || op(&store))
            .await
            .map_err(|e| GitKvError::Join(e.to_string()))?
            .map_err(GitKvError::from)
    }
}

impl KvBackend for GitBackend {
    type Error = GitKvError;

    async fn get(&self, key: &str) -> Result<Option<String>, Self::Error> {
        let key = key.to_owned();
        self.run(move |store| store.get(&key)).await
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), Self::Error> {
        let key = key.to_owned();
        let value = value.to_owned();
        self.run(move |store| store.put(&key, &value).map(|_| ())).await
    }

    async fn delete(&self, key: &str) -> Result<bool, Self::Error> {
        let key = key.to_owned();
        self.run(move |store| store.delete(&key)).await
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, Self::Error> {
        let prefix = prefix.to_owned();
        self.run(move |store| store.list_keys(&prefix)).await
    }
}
