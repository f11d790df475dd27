//! CLI entry point for mys-growth.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mys_growth_app::ServiceConfig;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing_subscriber::{EnvFilter, fmt::format::FmtSpan};

mod commands;
mod http;
mod schedule;

/// Daily member counts cached in git refs.
#[derive(Parser, Debug)]
#[command(
    name = "mys-growth",
    version,
    about = "mys-growth: daily member counts stored under refs/<namespace>/kv/*"
)]
struct Cli {
    /// Path to repo or any subdir (defaults to current).
    #[arg(long)]
    repo: Option<PathBuf>,

    /// Config file (defaults to .mys-growth/config.toml at the repository root).
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the series over HTTP and refresh it on a schedule.
    Serve,

    /// Fetch the current count and commit it once.
    Refresh {
        /// Instant to record the sample for (RFC 3339, defaults to now).
        #[arg(long, value_parser = parse_instant)]
        at: Option<OffsetDateTime>,
    },

    /// Print the series the read endpoint would serve.
    Show,

    /// List snapshot backup keys, oldest first.
    Backups,

    /// Apply the configured retention policy now.
    Prune,

    /// Create the store repository if it does not exist.
    Init,
}

fn parse_instant(raw: &str) -> Result<OffsetDateTime, String> {
    OffsetDateTime::parse(raw, &Rfc3339).map_err(|e| format!("expected an RFC 3339 timestamp: {e}"))
}

fn main() -> Result<()> {
    let Cli { repo, config, cmd } = Cli::parse();
    install_tracing();

    let repo_path = repo.unwrap_or_else(|| PathBuf::from("."));
    let config = load_config(&repo_path, config.as_deref())?;
    execute_command(&repo_path, &config, cmd)
}

fn load_config(repo_path: &Path, explicit: Option<&Path>) -> Result<ServiceConfig> {
    match explicit {
        Some(path) => ServiceConfig::from_path(path),
        None => ServiceConfig::load(repo_path),
    }
}

fn execute_command(repo_path: &Path, config: &ServiceConfig, command: Command) -> Result<()> {
    let open = || commands::open_app(repo_path, config);
    match command {
        // The store may not exist yet.
        Command::Init => commands::init(repo_path, config),
        Command::Serve => block_on(commands::serve(open()?, config)),
        Command::Refresh { at } => {
            let app = open()?;
            block_on(commands::refresh(&app, at))
        }
        Command::Show => block_on(commands::show(Arc::new(open()?))),
        Command::Backups => {
            let app = open()?;
            block_on(commands::backups(&app))
        }
        Command::Prune => {
            let app = open()?;
            block_on(commands::prune(&app))
        }
    }
}

fn block_on(future: impl Future<Output = Result<()>>) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(future)
}

fn install_tracing() {
    // RUST_LOG overrides; INFO otherwise.
    let filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_span_events(FmtSpan::NONE)
        .compact()
        .try_init();
}
