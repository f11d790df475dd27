use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};
use mys_growth_app::{
    GitBackend, HttpSource, KvBackend, MemberSource, ReadService, ServiceConfig, TimeSeriesStore,
    Updater, handle_read, handle_scheduled,
};
use mys_growth_core::date_key;
use mys_growth_store_git::GitKvStore;
use time::OffsetDateTime;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::{http, schedule};

/// Updater wired to the git store and the configured HTTP endpoint.
pub type App = Updater<GitBackend, HttpSource>;

/// Open the store below `repo_path` and wire an [`App`] from `config`.
pub fn open_app(repo_path: &Path, config: &ServiceConfig) -> Result<App> {
    let store = GitKvStore::open(repo_path, &config.store.namespace).with_context(|| {
        format!(
            "Failed to open store at {} (run `mys-growth init` first?)",
            repo_path.display()
        )
    })?;
    Ok(wire(GitBackend::new(store), HttpSource::new(config.source.endpoint.clone()), config))
}

pub fn wire<B, S>(backend: B, source: S, config: &ServiceConfig) -> Updater<B, S> {
    Updater::new(TimeSeriesStore::new(backend), source)
        .with_retention(config.retention())
        .with_decode_policy(config.decode_policy())
}

pub fn init(repo_path: &Path, config: &ServiceConfig) -> Result<()> {
    let store = GitKvStore::open_or_init(repo_path, &config.store.namespace)?;
    println!(
        "Store ready at {} (refs/{}/kv/*)",
        repo_path.display(),
        store.namespace()
    );
    Ok(())
}

pub async fn serve(app: App, config: &ServiceConfig) -> Result<()> {
    let listener = TcpListener::bind(config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    info!(
        addr = %config.server.bind,
        endpoint = app.source().endpoint(),
        "Serving series"
    );
    let updater = Arc::new(app);

    let scheduler = tokio::spawn(schedule::run(
        Arc::clone(&updater),
        config.schedule.clone(),
    ));
    let router = http::router(ReadService::new(updater));
    let served = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    scheduler.abort();
    served.context("HTTP server failed")
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "Failed to listen for shutdown signal");
        return;
    }
    info!("Shutdown signal received");
}

pub async fn refresh<B, S>(updater: &Updater<B, S>, at: Option<OffsetDateTime>) -> Result<()>
where
    B: KvBackend,
    S: MemberSource,
{
    let at = at.unwrap_or_else(|| updater.now());
    let outcome = handle_scheduled(updater, at).await?;
    let verb = if outcome.appended { "Recorded" } else { "Already had" };
    println!(
        "{verb} {} = {} ({} entries, backup {})",
        date_key(outcome.date),
        outcome.count,
        outcome.series_len,
        outcome.backup_key
    );
    if outcome.pruned > 0 {
        println!("Pruned {} old backups", outcome.pruned);
    }
    Ok(())
}

pub async fn show<B, S>(updater: Arc<Updater<B, S>>) -> Result<()>
where
    B: KvBackend,
    S: MemberSource,
{
    let response = handle_read(&ReadService::new(updater)).await?;
    info!(source = %response.source, "Read series");
    println!("{}", response.body);
    Ok(())
}

pub async fn backups<B, S>(updater: &Updater<B, S>) -> Result<()>
where
    B: KvBackend,
    S: MemberSource,
{
    for key in updater.store().list_backups().await? {
        println!("{key}");
    }
    Ok(())
}

pub async fn prune<B, S>(updater: &Updater<B, S>) -> Result<()>
where
    B: KvBackend,
    S: MemberSource,
{
    let retention = updater.retention();
    if retention.is_unbounded() {
        println!("No retention policy configured; keeping every backup");
        return Ok(());
    }
    let deleted = updater
        .store()
        .prune_backups(retention, updater.now(), None)
        .await?;
    for key in &deleted {
        println!("Deleted {key}");
    }
    println!("Pruned {} backups", deleted.len());
    Ok(())
}
