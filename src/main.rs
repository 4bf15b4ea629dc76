//! `presswatch` command line: scrape cycles, the legacy migration, and
//! snapshot lookup.

mod error;
mod logging;

use crate::error::{ErrorKind, Result};
use clap::{ArgAction, Parser, Subcommand};
use exn::{OptionExt, ResultExt};
use presswatch_config::{Config, IdentityConfig, StorageConfig};
use presswatch_metadata::{Database, PoolSettings, Repository};
use presswatch_migrate::{LegacyDataset, LocalZone, Migration};
use presswatch_scrape::{ParserRegistry, Scraper, fetch_text};
use presswatch_storage::StoreHandle;
use presswatch_storage::backend::{GitStore, Identity, LockPolicy};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "presswatch", version, about = "Track how published news articles change over time")]
struct Cli {
    /// Configuration file (TOML, YAML or JSON).
    #[arg(short, long, env = "PRESSWATCH_CONFIG", global = true)]
    config: Option<PathBuf>,
    /// More verbose logging; repeat for trace output.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Discover new articles and recheck the ones that are due.
    Scrape {
        /// Recheck every article regardless of priority or age.
        #[arg(long)]
        all: bool,
    },
    /// Merge the legacy history into the live store, until done.
    Migrate,
    /// Print the stored snapshot of a version.
    Show { version: i64 },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err:?}");
            ExitCode::FAILURE
        },
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = presswatch_config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));
    match cli.command {
        Command::Scrape { all } => scrape(&config, all, &cancel).await,
        Command::Migrate => migrate(&config, &cancel).await,
        Command::Show { version } => show(&config, version).await,
    }
}

async fn open_database(config: &Config) -> Result<Database> {
    let settings = PoolSettings {
        max_connections: config.database.max_connections,
        busy_timeout: config.database.busy_timeout(),
    };
    Database::connect(&config.database.path, settings).await.or_raise(|| ErrorKind::Metadata)
}

async fn scrape(config: &Config, update_all: bool, cancel: &CancellationToken) -> Result<()> {
    let store: StoreHandle = Arc::new(live_store(config, &config.storage.identity)?);
    let db = open_database(config).await?;
    let parsers = ParserRegistry::from_config(&config.scrape).or_raise(|| ErrorKind::Config)?;
    if parsers.is_empty() {
        tracing::warn!("No sources configured, only rechecking known articles is possible");
    }
    let scraper = Scraper::new(store, Repository::from(&db), parsers, (&config.scrape).into());
    let result = scraper.run_cycle(update_all, cancel).await;
    db.close().await;
    let report = result.or_raise(|| ErrorKind::Scrape)?;
    tracing::info!(
        discovered = report.discovered,
        registered = report.registered,
        selected = report.selected,
        committed = report.committed,
        boring = report.boring,
        failed = report.failed,
        interrupted = report.interrupted,
        "Scrape cycle complete"
    );
    Ok(())
}

async fn migrate(config: &Config, cancel: &CancellationToken) -> Result<()> {
    let settings = &config.migrate;
    let zone = LocalZone::new(&settings.timezone).or_raise(|| ErrorKind::Config)?;
    let legacy = git_store("legacy", &settings.source_snapshots, &config.storage, &settings.identity)?;
    let source = LegacyDataset::open(&settings.source_database, Arc::new(legacy), zone)
        .await
        .or_raise(|| ErrorKind::Migrate)?;
    let store: StoreHandle = Arc::new(live_store(config, &settings.identity)?);
    let db = open_database(config).await?;
    let migration = Migration::new(store, Repository::from(&db), Arc::new(source), settings.into());
    let result = migration.run_until_done(cancel).await;
    db.close().await;
    let report = result.or_raise(|| ErrorKind::Migrate)?;
    tracing::info!(
        articles = report.articles,
        replayed = report.replayed,
        issues = report.issues,
        interrupted = report.interrupted,
        "Migration complete"
    );
    Ok(())
}

async fn show(config: &Config, id: i64) -> Result<()> {
    let db = open_database(config).await?;
    let repo = Repository::from(&db);
    let version = repo.get_version(id).await.or_raise(|| ErrorKind::Metadata)?;
    let version = version.ok_or_raise(|| ErrorKind::VersionNotFound(id))?;
    let article = repo.require_article(version.article_id).await.or_raise(|| ErrorKind::Metadata)?;
    db.close().await;

    let store = live_store(config, &config.storage.identity)?;
    let text = fetch_text(&store, &article, &version).await.or_raise(|| ErrorKind::Storage)?;
    let text = text.ok_or_raise(|| ErrorKind::SnapshotMissing(id))?;
    let mut stdout = tokio::io::stdout();
    stdout.write_all(&text).await.or_raise(|| ErrorKind::Output)?;
    stdout.flush().await.or_raise(|| ErrorKind::Output)
}

fn live_store(config: &Config, identity: &IdentityConfig) -> Result<GitStore> {
    git_store("articles", &config.storage.root, &config.storage, identity)
}

fn git_store(name: &str, root: &Path, storage: &StorageConfig, identity: &IdentityConfig) -> Result<GitStore> {
    let root = std::path::absolute(root).or_raise(|| ErrorKind::Config)?;
    let locks = LockPolicy {
        stale_after: storage.locks.stale_after(),
        wait: storage.locks.wait(),
        poll: storage.locks.poll(),
        attempts: storage.locks.attempts,
        retry_sleep: storage.locks.retry_sleep(),
    };
    let identity = Identity::new(&identity.name, &identity.email);
    let store = GitStore::new(name, root, identity).or_raise(|| ErrorKind::Storage)?;
    Ok(store.with_lock_policy(locks))
}

/// Cancel `cancel` on Ctrl+C or SIGTERM. The article in flight is finished
/// before the cycle or migration stops.
async fn cancel_on_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::warn!(error = %err, "Could not listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            },
            Err(err) => {
                tracing::warn!(error = %err, "Could not listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, stopping after the current article"),
        _ = terminate => tracing::info!("Received terminate signal, stopping after the current article"),
    }
    cancel.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use rstest::rstest;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[rstest]
    #[case(&["presswatch", "scrape"], Command::Scrape { all: false })]
    #[case(&["presswatch", "scrape", "--all"], Command::Scrape { all: true })]
    #[case(&["presswatch", "-vv", "migrate"], Command::Migrate)]
    #[case(&["presswatch", "show", "42", "-c", "presswatch.toml"], Command::Show { version: 42 })]
    fn test_parse(#[case] args: &[&str], #[case] expected: Command) {
        let cli = Cli::try_parse_from(args).unwrap();
        assert_eq!(cli.command, expected);
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::try_parse_from(["presswatch", "-c", "a.toml", "-vv", "migrate"]).unwrap();
        assert_eq!(cli.config.as_deref(), Some(Path::new("a.toml")));
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_show_requires_numeric_id() {
        assert!(Cli::try_parse_from(["presswatch", "show", "latest"]).is_err());
    }
}
