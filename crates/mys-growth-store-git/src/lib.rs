//! Git-backed key-value storage for mys-growth.
//!
//! Every key lives under `refs/<namespace>/kv/<encoded-key>`. Each write is a
//! commit on an empty tree whose message carries the value, parented on the
//! key's previous value, so the full history of a slot stays reachable.

mod error;

pub use error::GitKvError;

use anyhow::{Context, Result, anyhow, bail};
use git2::{Commit, ErrorCode, Oid, Repository, Signature};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

const VALUE_CACHE_CAPACITY: usize = 64;
const MESSAGE_PREFIX: &str = "mys-growth-kv: ";
const COMMITTER_NAME: &str = "mys-growth";
const COMMITTER_EMAIL: &str = "mys-growth@example.invalid";

/// Key-value storage based on git refs.
pub struct GitKvStore {
    repo: Mutex<Repository>,
    namespace: String,
    value_cache: Mutex<LruCache<Oid, String>>,
}

impl GitKvStore {
    /// Discover and open the repository from `cwd_or_repo`.
    ///
    /// # Errors
    /// Returns an error if no repository can be discovered or the namespace is
    /// not a valid ref component.
    pub fn open(cwd_or_repo: impl AsRef<Path>, namespace: &str) -> Result<Self> {
        let repo = Repository::discover(cwd_or_repo).context("Failed to discover .git")?;
        Self::with_repository(repo, namespace)
    }

    /// Open the repository at `path`, initializing a new one if none exists.
    ///
    /// # Errors
    /// Returns an error if the repository cannot be opened or created.
    pub fn open_or_init(path: impl AsRef<Path>, namespace: &str) -> Result<Self> {
        let path = path.as_ref();
        let repo = match Repository::open(path) {
            Ok(repo) => repo,
            Err(err) if err.code() == ErrorCode::NotFound => {
                info!(path = %path.display(), "Initializing store repository");
                Repository::init(path)
                    .with_context(|| format!("Failed to initialize repository at {}", path.display()))?
            }
            Err(err) => {
                return Err(err).with_context(|| format!("Failed to open repository at {}", path.display()));
            }
        };
        Self::with_repository(repo, namespace)
    }

    fn with_repository(repo: Repository, namespace: &str) -> Result<Self> {
        validate_namespace(namespace)?;
        let capacity = NonZeroUsize::new(VALUE_CACHE_CAPACITY)
            .ok_or_else(|| anyhow!("cache capacity must be non-zero"))?;
        Ok(Self {
            repo: Mutex::new(repo),
            namespace: namespace.to_owned(),
            value_cache: Mutex::new(LruCache::new(capacity)),
        })
    }

    /// Ref namespace this store writes under.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn refname(&self, key: &str) -> Result<String> {
        if key.is_empty() {
            bail!("key must not be empty");
        }
        Ok(format!("{}{}", self.ref_prefix(), encode_key(key)))
    }

    fn ref_prefix(&self) -> String {
        format!("refs/{}/kv/", self.namespace)
    }

    fn lock_repo(&self) -> Result<MutexGuard<'_, Repository>> {
        self.repo
            .lock()
            .map_err(|_| anyhow!("repository lock poisoned"))
    }

    fn cached_value(&self, oid: Oid) -> Option<String> {
        self.value_cache
            .lock()
            .ok()
            .and_then(|mut cache| cache.get(&oid).cloned())
    }

    fn cache_value(&self, oid: Oid, value: String) {
        if let Ok(mut cache) = self.value_cache.lock() {
            cache.put(oid, value);
        }
    }

    fn value_from_commit(commit: &Commit<'_>, key: &str, oid: Oid) -> Result<String> {
        let message = commit
            .message()
            .ok_or_else(|| anyhow!("Commit {oid} has a non UTF-8 message"))?;
        let (head, body) = message
            .split_once("\n\n")
            .ok_or_else(|| anyhow!("Commit {oid} carries no value"))?;
        match head.strip_prefix(MESSAGE_PREFIX) {
            Some(stored_key) if stored_key == key => Ok(body.to_owned()),
            _ => bail!("Commit {oid} does not hold a value for '{key}'"),
        }
    }

    /// Read the current value of `key`.
    ///
    /// # Errors
    /// Returns an error if the ref exists but its commit cannot be read or does
    /// not carry a value for `key`.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let refname = self.refname(key)?;
        let value = {
            let repo = self.lock_repo()?;
            let reference = match repo.find_reference(&refname) {
                Ok(reference) => reference,
                Err(err) if err.code() == ErrorCode::NotFound => return Ok(None),
                Err(err) => return Err(err).with_context(|| format!("Failed to resolve {refname}")),
            };
            let oid = reference
                .target()
                .ok_or_else(|| anyhow!("Ref {refname} has no target"))?;

            if let Some(value) = self.cached_value(oid) {
                debug!(%oid, %refname, "Value served from cache");
                return Ok(Some(value));
            }

            let commit = repo
                .find_commit(oid)
                .with_context(|| format!("Object is not a commit: {oid}"))?;
            let value = Self::value_from_commit(&commit, key, oid)?;
            self.cache_value(oid, value.clone());
            value
        };
        Ok(Some(value))
    }

    /// Write `value` under `key`, keeping the previous value as parent commit.
    ///
    /// # Errors
    /// Returns an error if any Git object manipulation fails.
    pub fn put(&self, key: &str, value: &str) -> Result<Oid> {
        let refname = self.refname(key)?;
        let oid = {
            let repo = self.lock_repo()?;
            let sig = Signature::now(COMMITTER_NAME, COMMITTER_EMAIL)?;

            // Empty tree
            let tree_oid = repo.treebuilder(None)?.write()?;
            let tree = repo.find_tree(tree_oid)?;

            // Parent (if the key already has a value)
            let parent = match repo.find_reference(&refname) {
                Ok(reference) => {
                    let target = reference
                        .target()
                        .ok_or_else(|| anyhow!("Ref {refname} has no target"))?;
                    Some(repo.find_commit(target)?)
                }
                Err(err) if err.code() == ErrorCode::NotFound => None,
                Err(err) => return Err(err).with_context(|| format!("Failed to resolve {refname}")),
            };
            let parents: Vec<&Commit<'_>> = parent.iter().collect();

            let message = format!("{MESSAGE_PREFIX}{key}\n\n{value}");
            repo.commit(Some(&refname), &sig, &sig, &message, &tree, &parents)?
        };

        self.cache_value(oid, value.to_owned());
        info!(%oid, %refname, "Stored value");
        Ok(oid)
    }

    /// Remove `key`. Returns whether it existed.
    ///
    /// # Errors
    /// Returns an error if the ref cannot be resolved or deleted.
    pub fn delete(&self, key: &str) -> Result<bool> {
        let refname = self.refname(key)?;
        let repo = self.lock_repo()?;
        let mut reference = match repo.find_reference(&refname) {
            Ok(reference) => reference,
            Err(err) if err.code() == ErrorCode::NotFound => return Ok(false),
            Err(err) => return Err(err).with_context(|| format!("Failed to resolve {refname}")),
        };
        reference
            .delete()
            .with_context(|| format!("Failed to delete {refname}"))?;
        info!(%refname, "Deleted value");
        Ok(true)
    }

    /// List keys starting with `prefix`, sorted ascending.
    ///
    /// # Errors
    /// Returns an error if reference enumeration fails.
    pub fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let ref_prefix = self.ref_prefix();
        let repo = self.lock_repo()?;
        let mut keys = Vec::new();
        for reference in repo.references_glob(&format!("{ref_prefix}*"))? {
            let reference = reference?;
            let name = reference.name().ok_or_else(|| anyhow!("Invalid ref name"))?;
            let Some(encoded) = name.strip_prefix(ref_prefix.as_str()) else {
                continue;
            };
            match decode_key(encoded) {
                Some(key) if key.starts_with(prefix) => keys.push(key),
                Some(_) => {}
                None => debug!(%name, "Ignoring ref with undecodable key"),
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// Check that `namespace` is usable as a single ref path component.
///
/// # Errors
/// Returns an error when it is empty or contains bytes outside `[A-Za-z0-9_-]`.
pub fn validate_namespace(namespace: &str) -> Result<()> {
    if namespace.is_empty() {
        bail!("store namespace must not be empty");
    }
    if !namespace.bytes().all(is_plain_key_byte) {
        bail!("store namespace '{namespace}' may only contain [A-Za-z0-9_-]");
    }
    Ok(())
}

const fn is_plain_key_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-'
}

/// Percent-encode every byte outside `[A-Za-z0-9_-]` so any key is a legal
/// ref component.
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if is_plain_key_byte(byte) {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn decode_key(encoded: &str) -> Option<String> {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut idx = 0;
    while idx < bytes.len() {
        if bytes[idx] == b'%' {
            let hex = encoded.get(idx + 1..idx + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            idx += 3;
        } else {
            out.push(bytes[idx]);
            idx += 1;
        }
    }
    String::from_utf8(out).ok()
}
