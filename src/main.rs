//! job-listing-sync binary entrypoint.
//! Loads config, opens the SQLite store, registers the configured sources
//! and runs reconciliation once or on an interval.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use job_listing_sync::ingest::config::SyncConfig;
use job_listing_sync::ingest::fetch::{HttpFetcher, ReqwestFetcher};
use job_listing_sync::ingest::providers::build_providers;
use job_listing_sync::ingest::scheduler::{spawn_scheduler, SchedulerCfg};
use job_listing_sync::store::{ListingQuery, ListingSort, ListingStore, SqliteStore};
use job_listing_sync::Reconciler;

#[derive(Parser)]
#[command(version, about = "Sync job listings from hh.ru / superjob.ru into SQLite")]
struct Cli {
    /// Config file (TOML or JSON). Falls back to $JOB_SYNC_CONFIG_PATH, then config/sync.{toml,json}.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Override the database path from config.
    #[arg(long, env = "JOB_SYNC_DB")]
    db: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one reconciliation cycle and print its report.
    Sync,
    /// Run a cycle now and then every `interval_secs` until Ctrl-C.
    Watch,
    /// Print active listings, filtered and sorted.
    Listings(ListingArgs),
    /// Print active listing counts and average salary bounds per city.
    Stats,
    /// Print the change log, optionally for one identity key.
    Changes {
        #[arg(long)]
        key: Option<String>,
    },
}

#[derive(Args)]
struct ListingArgs {
    #[arg(long)]
    city: Option<String>,
    #[arg(long)]
    company: Option<String>,
    /// Case-sensitive substring of title or description.
    #[arg(long)]
    keyword: Option<String>,
    /// Lower salary bound at least this.
    #[arg(long)]
    min_salary: Option<i64>,
    /// Upper salary bound at most this.
    #[arg(long)]
    max_salary: Option<i64>,
    #[arg(long, value_enum, default_value_t = ListingSort::Newest)]
    sort: ListingSort,
}

impl From<ListingArgs> for ListingQuery {
    fn from(a: ListingArgs) -> Self {
        ListingQuery {
            location: a.city,
            organization: a.company,
            keyword: a.keyword,
            min_compensation: a.min_salary,
            max_compensation: a.max_salary,
            sort: a.sort,
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("job_listing_sync=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

fn build_reconciler(cfg: &SyncConfig, store: Arc<dyn ListingStore>) -> Result<Reconciler> {
    let fetcher: Arc<dyn HttpFetcher> = Arc::new(
        ReqwestFetcher::new(&cfg.user_agent)
            .context("building http client")?
            .with_timeout(cfg.request_timeout_secs),
    );
    let providers = build_providers(cfg, fetcher);
    if providers.is_empty() {
        anyhow::bail!("no usable sources configured");
    }
    Ok(Reconciler::new(providers, store))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let mut cfg = match &cli.config {
        Some(p) => SyncConfig::load_from(p)?,
        None => SyncConfig::load_default()?,
    };
    if let Some(db) = cli.db {
        cfg.database_path = db;
    }

    if let Some(addr) = &cfg.metrics_addr {
        job_listing_sync::metrics::install_prometheus(addr).context("starting metrics exporter")?;
    }

    let store: Arc<dyn ListingStore> = Arc::new(
        SqliteStore::open(&cfg.database_path)
            .with_context(|| format!("opening database {}", cfg.database_path))?,
    );

    match cli.command {
        Command::Sync => {
            let reconciler = build_reconciler(&cfg, store)?;
            let report = reconciler.run_cycle().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Watch => {
            let reconciler = Arc::new(build_reconciler(&cfg, store)?);
            let handle = spawn_scheduler(
                SchedulerCfg {
                    interval_secs: cfg.interval_secs,
                },
                reconciler,
            );
            tokio::signal::ctrl_c().await?;
            tracing::info!("shutting down");
            handle.abort();
        }
        Command::Listings(args) => {
            for l in store.active_listings(&args.into())? {
                let r = &l.record;
                println!(
                    "[{}] {} | {} | {} | {} | {}",
                    l.id,
                    r.title.as_deref().unwrap_or("—"),
                    r.organization.as_deref().unwrap_or("—"),
                    r.location.as_deref().unwrap_or("—"),
                    format_compensation(r.compensation_min, r.compensation_max, r.currency.as_deref()),
                    r.identity_key
                );
            }
        }
        Command::Stats => {
            for s in store.stats_by_location()? {
                println!(
                    "{:<24} {:>5}  avg from {}  avg to {}",
                    s.location.as_deref().unwrap_or("—"),
                    s.count,
                    format_average(s.avg_compensation_min),
                    format_average(s.avg_compensation_max)
                );
            }
        }
        Command::Changes { key } => {
            for c in store.change_log(key.as_deref())? {
                println!(
                    "{} {:<7} {} {}",
                    c.event_time.format("%Y-%m-%d %H:%M"),
                    c.kind,
                    c.listing_id.map(|id| id.to_string()).unwrap_or_else(|| "-".into()),
                    c.identity_key
                );
            }
        }
    }
    Ok(())
}

fn format_compensation(min: Option<i64>, max: Option<i64>, currency: Option<&str>) -> String {
    let cur = currency.unwrap_or("");
    let s = match (min, max) {
        (Some(a), Some(b)) => format!("{a}–{b} {cur}"),
        (Some(a), None) => format!("from {a} {cur}"),
        (None, Some(b)) => format!("up to {b} {cur}"),
        (None, None) => "—".to_string(),
    };
    s.trim().to_string()
}

fn format_average(v: Option<f64>) -> String {
    v.map(|v| format!("{v:.0}")).unwrap_or_else(|| "—".to_string())
}
