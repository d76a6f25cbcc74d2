use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use imdb_plex_sync::{
    config::Config,
    models::RunReport,
    services::{
        fetch_source_list,
        providers::{PlexClient, WikidataClient},
        SyncEngine,
    },
};

const EXIT_FAILURE: u8 = 1;
const EXIT_CONFIG: u8 = 2;
const EXIT_CANCELLED: u8 = 130;

/// Sync an IMDb watchlist export into a Plex watchlist
#[derive(Parser, Debug)]
#[command(name = "imdb-plex-sync")]
#[command(version, about, long_about = None)]
struct Cli {
    /// IMDb list export URL or local CSV path (overrides IMDB_WATCHLIST_URL)
    #[arg(long)]
    imdb_watchlist_url: Option<String>,

    /// Plex account token (overrides PLEX_TOKEN)
    #[arg(long)]
    plex_token: Option<String>,

    /// Also remove Plex watchlist items that are not on the IMDb list
    #[arg(long)]
    remove: bool,

    /// Log planned changes without applying them
    #[arg(long)]
    dry_run: bool,

    /// Maximum number of concurrent lookups or mutations
    #[arg(long)]
    concurrency: Option<usize>,

    /// Retries per failed mutation
    #[arg(long)]
    retries: Option<u32>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn apply_to(self, config: &mut Config) {
        if let Some(url) = self.imdb_watchlist_url {
            config.imdb_watchlist_url = Some(url);
        }
        if let Some(token) = self.plex_token {
            config.plex_token = Some(token);
        }
        if self.remove {
            config.remove_mode = true;
        }
        if self.dry_run {
            config.dry_run = true;
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency_limit = concurrency;
        }
        if let Some(retries) = self.retries {
            config.retry_limit = retries;
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = Config::from_env();
    let verbose = cli.verbose || config.as_ref().is_ok_and(|c| c.actions_runner_debug);
    init_tracing(verbose);

    let mut config = match config {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    cli.apply_to(&mut config);

    if let Err(e) = config.validate() {
        tracing::error!("{}", e);
        return ExitCode::from(EXIT_CONFIG);
    }

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight operations");
            interrupt.cancel();
        }
    });

    match run(&config, cancel.clone()).await {
        Ok(report) if report.cancelled => ExitCode::from(EXIT_CANCELLED),
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            if cancel.is_cancelled() {
                ExitCode::from(EXIT_CANCELLED)
            } else {
                ExitCode::from(EXIT_FAILURE)
            }
        }
    }
}

async fn run(config: &Config, cancel: CancellationToken) -> anyhow::Result<RunReport> {
    let source = fetch_source_list(config.source_location()?)
        .await
        .context("Failed to load IMDb watchlist")?;

    let lookup = Arc::new(WikidataClient::new(
        config.wikidata_sparql_url.clone(),
        config.lookup_batch_size,
    )?);
    let watchlist = Arc::new(PlexClient::new(
        config.token()?.to_string(),
        config.plex_api_url.clone(),
    )?);

    let engine =
        SyncEngine::new(lookup, watchlist, config.engine_config()).with_cancellation(cancel);
    let report = engine.run(&source).await.context("Sync run failed")?;
    Ok(report)
}
