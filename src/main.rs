use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use gleaner::config::Config;
use gleaner::feed::{FeedNotFound, RefreshKind, RefreshOptions, RefreshStatus, Refresher};
use gleaner::fetch::{FetchClient, ProxyResolver};
use gleaner::storage::Database;

/// Get the config directory path (~/.config/gleaner/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("gleaner"))
}

#[derive(Parser, Debug)]
#[command(name = "gleaner", about = "RSS/Atom feed ingestion service")]
struct Args {
    /// Config file path (default: ~/.config/gleaner/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Subscribe to a feed and fetch it once
    Add {
        /// Feed URL (http or https)
        url: String,
        /// Curated title; otherwise adopted from the feed document
        #[arg(long)]
        title: Option<String>,
    },
    /// Fetch a single feed now
    Fetch {
        /// Feed id
        feed_id: i64,
        /// Timeout override in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Fetch every active feed
    FetchAll {
        /// Honor per-feed fetch intervals and stamp the auto-fetch clock
        #[arg(long)]
        scheduled: bool,
    },
    /// Delete articles older than the cutoff
    Prune {
        /// Age cutoff in days (default: configured prune_after_days)
        #[arg(long)]
        days: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)?;

    let db_path = if config.database_path.is_empty() {
        config_dir.join("gleaner.db")
    } else {
        PathBuf::from(&config.database_path)
    };
    let db_path_str = db_path
        .to_str()
        .context("Invalid UTF-8 in database path")?;
    let db = Database::open(db_path_str)
        .await
        .context("Failed to open database")?;

    let client = FetchClient::new(ProxyResolver::new(config.proxy_base()))
        .context("Failed to build HTTP client")?;

    match args.command {
        Command::Add { url, title } => add_feed(&db, &client, &config, &url, title.as_deref()).await,
        Command::Fetch { feed_id, timeout } => {
            fetch_feed(&db, &client, &config, feed_id, timeout).await
        }
        Command::FetchAll { scheduled } => fetch_all(&db, &client, &config, scheduled).await,
        Command::Prune { days } => prune(&db, &client, &config, days).await,
    }
}

fn refresher(db: &Database, client: &FetchClient, config: &Config, timeout: Duration) -> Refresher {
    Refresher::new(
        db.clone(),
        client.clone(),
        RefreshOptions {
            timeout,
            max_concurrency: config.max_concurrency,
        },
    )
}

async fn add_feed(
    db: &Database,
    client: &FetchClient,
    config: &Config,
    url: &str,
    title: Option<&str>,
) -> Result<()> {
    let parsed = url::Url::parse(url).context("Invalid feed URL")?;
    if !matches!(parsed.scheme(), "http" | "https") {
        bail!(
            "Unsupported URL scheme: {} (only http/https allowed)",
            parsed.scheme()
        );
    }

    let feed_id = db
        .create_feed(url, title.unwrap_or_default())
        .await
        .context("Failed to create feed (already subscribed?)")?;
    println!("Subscribed feed #{}: {}", feed_id, url);

    // Interactive creation uses the shorter timeout; a slow host should
    // not hang the terminal, the scheduler will pick the feed up anyway.
    let outcome = refresher(db, client, config, config.add_timeout())
        .refresh_feed(feed_id, RefreshKind::Manual)
        .await?;
    match outcome.status {
        RefreshStatus::Success => {
            println!("Initial fetch: {} articles", outcome.total_articles);
        }
        status => {
            println!("Initial fetch did not complete ({}); the next scheduled run will retry", status);
        }
    }
    Ok(())
}

async fn fetch_feed(
    db: &Database,
    client: &FetchClient,
    config: &Config,
    feed_id: i64,
    timeout_secs: Option<u64>,
) -> Result<()> {
    let feed = db.get_feed(feed_id).await?.ok_or(FeedNotFound(feed_id))?;
    if feed.title.is_empty() {
        println!("Fetching feed #{}", feed_id);
    } else {
        println!("Fetching feed: {}", feed.title);
    }
    println!("URL: {}", feed.url);
    println!("{}", "=".repeat(80));

    let timeout = timeout_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.fetch_timeout());
    let outcome = refresher(db, client, config, timeout)
        .refresh_feed(feed_id, RefreshKind::Manual)
        .await?;

    println!("{}", "=".repeat(80));
    match &outcome.status {
        RefreshStatus::Success => {
            println!(
                "Done: {} new, {} updated, {} unchanged",
                outcome.created, outcome.updated, outcome.unchanged
            );
            println!("Total articles: {}", outcome.total_articles);
            Ok(())
        }
        status => {
            eprintln!("Refresh failed: {}", status);
            std::process::exit(1);
        }
    }
}

async fn fetch_all(
    db: &Database,
    client: &FetchClient,
    config: &Config,
    scheduled: bool,
) -> Result<()> {
    let kind = if scheduled {
        RefreshKind::Scheduled
    } else {
        RefreshKind::Manual
    };

    let outcomes = refresher(db, client, config, config.fetch_timeout())
        .refresh_all_active(kind)
        .await;
    if outcomes.is_empty() {
        println!("No active feeds.");
        return Ok(());
    }

    let mut failed = 0;
    for outcome in &outcomes {
        println!(
            "feed #{}: {} ({} new, {} updated)",
            outcome.feed_id, outcome.status, outcome.created, outcome.updated
        );
        if !matches!(
            outcome.status,
            RefreshStatus::Success | RefreshStatus::NotDue | RefreshStatus::InFlight
        ) {
            failed += 1;
        }
    }
    println!("{} feeds processed, {} failed", outcomes.len(), failed);
    Ok(())
}

async fn prune(
    db: &Database,
    client: &FetchClient,
    config: &Config,
    days: Option<i64>,
) -> Result<()> {
    let days = days.unwrap_or(config.prune_after_days);
    let removed = refresher(db, client, config, config.fetch_timeout())
        .prune_articles_older_than(days)
        .await?;
    println!("Removed {} articles older than {} days", removed, days);
    Ok(())
}
