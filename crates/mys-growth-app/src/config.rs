use std::{
    fs,
    net::{Ipv4Addr, SocketAddr},
    num::NonZeroUsize,
    path::{Path, PathBuf},
    time::Duration as StdDuration,
};

use anyhow::{Context, Result, anyhow, bail};
use git2::{ErrorCode, Repository};
use mys_growth_store_git::validate_namespace;
use serde::Deserialize;
use time::Duration;

use crate::series_store::{DecodePolicy, RetentionPolicy};
use crate::source::DEFAULT_ENDPOINT;

const CONFIG_DIR: &str = ".mys-growth";
const CONFIG_FILE: &str = "config.toml";

/// Port the HTTP read endpoint listens on by default.
pub const DEFAULT_PORT: u16 = 8787;
/// One refresh per day.
pub const DEFAULT_INTERVAL_SECS: u64 = 86_400;
/// Ref namespace used when none is configured.
pub const DEFAULT_NAMESPACE: &str = "mys-growth";

/// Service configuration loaded from `.mys-growth/config.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    /// Upstream settings.
    pub source: SourceConfig,
    /// HTTP listener settings.
    pub server: ServerConfig,
    /// Periodic refresh settings.
    pub schedule: ScheduleConfig,
    /// Snapshot retention.
    pub backups: BackupConfig,
    /// Decode handling.
    pub integrity: IntegrityConfig,
    /// Key-value store settings.
    pub store: StoreConfig,
}

impl ServiceConfig {
    /// Default location of the config file below `workdir`.
    #[must_use]
    pub fn default_path(workdir: impl AsRef<Path>) -> PathBuf {
        workdir.as_ref().join(CONFIG_DIR).join(CONFIG_FILE)
    }

    /// Load configuration by discovering the nearest git repository from
    /// `cwd_or_repo`. Without a repository the path itself is the workdir.
    ///
    /// # Errors
    /// Returns an error when discovery fails for a reason other than a
    /// missing repository, or when the file cannot be loaded.
    pub fn load(cwd_or_repo: impl AsRef<Path>) -> Result<Self> {
        let path = cwd_or_repo.as_ref();
        match Repository::discover(path) {
            Ok(repo) => Self::from_repository(&repo),
            Err(err) if err.code() == ErrorCode::NotFound => Self::from_workdir(path),
            Err(err) => {
                Err(err).with_context(|| format!("failed to discover repository from {}", path.display()))
            }
        }
    }

    /// Load configuration from the working tree of an opened repository.
    ///
    /// # Errors
    /// Returns an error when the file cannot be read, parsed, or validated.
    pub fn from_repository(repo: &Repository) -> Result<Self> {
        Self::from_workdir(repo_workdir(repo)?)
    }

    /// Load configuration from a known working tree directory, falling back to
    /// defaults when no file exists.
    ///
    /// # Errors
    /// Returns an error when the file cannot be read, parsed, or validated.
    pub fn from_workdir(workdir: impl AsRef<Path>) -> Result<Self> {
        let config_path = Self::default_path(workdir);
        if !config_path.exists() {
            return Ok(Self::default());
        }
        Self::from_path(&config_path)
    }

    /// Load configuration from an explicit file, which must exist.
    ///
    /// # Errors
    /// Returns an error when the file cannot be read, parsed, or validated.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents =
            fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml_str(&contents).with_context(|| format!("failed to load {}", path.display()))
    }

    /// Parse and validate configuration text.
    ///
    /// # Errors
    /// Returns an error when the text is not valid TOML or fails validation.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents).context("failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let endpoint = &self.source.endpoint;
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            bail!("source.endpoint must be an http(s) URL, got '{endpoint}'");
        }
        if self.schedule.interval_secs == 0 {
            bail!("schedule.interval_secs must be greater than zero");
        }
        if self.backups.keep_last == Some(0) {
            bail!("backups.keep_last must be greater than zero");
        }
        if self.backups.max_age_days == Some(0) {
            bail!("backups.max_age_days must be greater than zero");
        }
        validate_namespace(&self.store.namespace).context("invalid store.namespace")
    }

    /// Retention policy described by the `[backups]` section.
    #[must_use]
    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy {
            keep_last: self.backups.keep_last.and_then(NonZeroUsize::new),
            max_age: self
                .backups
                .max_age_days
                .map(|days| Duration::days(i64::from(days))),
        }
    }

    /// Decode policy described by the `[integrity]` section.
    #[must_use]
    pub const fn decode_policy(&self) -> DecodePolicy {
        if self.integrity.strict_decode {
            DecodePolicy::Strict
        } else {
            DecodePolicy::Lenient
        }
    }
}

fn repo_workdir(repo: &Repository) -> Result<PathBuf> {
    if let Some(workdir) = repo.workdir() {
        return Ok(workdir.to_path_buf());
    }
    // Bare repositories keep the config next to the git directory.
    repo.path()
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| anyhow!("failed to resolve repository root"))
}

/// `[source]` block.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceConfig {
    /// URL returning the group metadata JSON.
    pub endpoint: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_owned(),
        }
    }
}

/// `[server]` block.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Address the read endpoint binds to.
    pub bind: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
        }
    }
}

/// `[schedule]` block.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScheduleConfig {
    /// Seconds between scheduled refreshes.
    pub interval_secs: u64,
    /// Refresh once immediately when serving starts.
    pub run_on_start: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_INTERVAL_SECS,
            run_on_start: false,
        }
    }
}

impl ScheduleConfig {
    /// Refresh period.
    #[must_use]
    pub const fn interval(&self) -> StdDuration {
        StdDuration::from_secs(self.interval_secs)
    }
}

/// `[backups]` block. Both limits are off by default.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackupConfig {
    /// Keep at most this many snapshots.
    pub keep_last: Option<usize>,
    /// Delete snapshots older than this many days.
    pub max_age_days: Option<u32>,
}

/// `[integrity]` block.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IntegrityConfig {
    /// Abort on undecodable slots instead of falling back.
    pub strict_decode: bool,
}

/// `[store]` block.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Ref namespace the slots live under.
    pub namespace: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_config(dir: &Path, body: &str) -> Result<()> {
        let cfg_dir = dir.join(CONFIG_DIR);
        fs::create_dir_all(&cfg_dir)?;
        let mut file = fs::File::create(cfg_dir.join(CONFIG_FILE))?;
        writeln!(file, "{body}")?;
        Ok(())
    }

    #[test]
    fn missing_config_returns_defaults() -> Result<()> {
        let dir = tempdir()?;
        let cfg = ServiceConfig::from_workdir(dir.path())?;
        assert_eq!(cfg.source.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(cfg.server.bind.to_string(), "127.0.0.1:8787");
        assert_eq!(cfg.schedule.interval(), StdDuration::from_secs(86_400));
        assert!(!cfg.schedule.run_on_start);
        assert!(cfg.retention().is_unbounded());
        assert_eq!(cfg.decode_policy(), DecodePolicy::Lenient);
        assert_eq!(cfg.store.namespace, DEFAULT_NAMESPACE);
        Ok(())
    }

    #[test]
    fn load_config_with_every_section() -> Result<()> {
        let dir = tempdir()?;
        write_config(
            dir.path(),
            "[source]\nendpoint = \"http://localhost:9000/group\"\n\
             [server]\nbind = \"0.0.0.0:8080\"\n\
             [schedule]\ninterval_secs = 3600\nrun_on_start = true\n\
             [backups]\nkeep_last = 30\nmax_age_days = 90\n\
             [integrity]\nstrict_decode = true\n\
             [store]\nnamespace = \"growth_test\"",
        )?;

        let cfg = ServiceConfig::from_workdir(dir.path())?;
        assert_eq!(cfg.source.endpoint, "http://localhost:9000/group");
        assert_eq!(cfg.server.bind.port(), 8080);
        assert_eq!(cfg.schedule.interval_secs, 3600);
        assert!(cfg.schedule.run_on_start);
        let retention = cfg.retention();
        assert_eq!(retention.keep_last.map(NonZeroUsize::get), Some(30));
        assert_eq!(retention.max_age, Some(Duration::days(90)));
        assert_eq!(cfg.decode_policy(), DecodePolicy::Strict);
        assert_eq!(cfg.store.namespace, "growth_test");
        Ok(())
    }

    #[test]
    fn validation_errors_name_the_key() {
        let cases = [
            ("[source]\nendpoint = \"ftp://example.com\"", "source.endpoint"),
            ("[schedule]\ninterval_secs = 0", "schedule.interval_secs"),
            ("[backups]\nkeep_last = 0", "backups.keep_last"),
            ("[backups]\nmax_age_days = 0", "backups.max_age_days"),
            ("[store]\nnamespace = \"a/b\"", "store.namespace"),
        ];
        for (body, key) in cases {
            let Err(err) = ServiceConfig::from_toml_str(body) else {
                panic!("{body:?} should be rejected");
            };
            assert!(format!("{err:#}").contains(key), "{err:#}");
        }
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(ServiceConfig::from_toml_str("[server]\nport = 1").is_err());
    }

    #[test]
    fn load_discovers_config_at_repository_root() -> Result<()> {
        let dir = tempdir()?;
        Repository::init(dir.path())?;
        write_config(dir.path(), "[store]\nnamespace = \"custom\"")?;
        let nested = dir.path().join("deploy").join("site");
        fs::create_dir_all(&nested)?;

        assert_eq!(ServiceConfig::load(&nested)?.store.namespace, "custom");
        assert_eq!(ServiceConfig::load(dir.path())?.store.namespace, "custom");
        assert_eq!(
            ServiceConfig::from_workdir(&nested)?.store.namespace,
            DEFAULT_NAMESPACE
        );
        Ok(())
    }

    #[test]
    fn load_without_repository_reads_the_path_itself() -> Result<()> {
        let dir = tempdir()?;
        write_config(dir.path(), "[schedule]\ninterval_secs = 60")?;
        assert_eq!(ServiceConfig::load(dir.path())?.schedule.interval_secs, 60);
        Ok(())
    }

    #[test]
    fn explicit_path_must_exist() -> Result<()> {
        let dir = tempdir()?;
        assert!(ServiceConfig::from_path(dir.path().join("missing.toml")).is_err());
        Ok(())
    }
}
