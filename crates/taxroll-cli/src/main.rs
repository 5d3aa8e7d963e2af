use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use taxroll_client::fetcher::{DEFAULT_REFERER, DEFAULT_WARM_UP_URL};
use taxroll_client::{HtmlRecordExtractor, PortalConfig, ReqwestPortalFetcher};
use taxroll_core::job::{JobOutcome, MarkBadPolicy, PipelineConfig};
use taxroll_core::util::read_lines;
use taxroll_core::{JitterConfig, Pipeline, PipelineReport, TracingPipelineReporter, UserAgents};
use taxroll_db::{Database, DatabaseConfig};

#[derive(Parser)]
#[command(name = "taxroll", version, about = "Property tax roll scraper")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape every property URL in a file and store the records
    Scrape {
        /// Newline-delimited list of property detail URLs
        #[arg(short, long, env = "TAXROLL_URLS")]
        urls: PathBuf,

        /// Newline-delimited list of user-agent strings
        #[arg(short = 'a', long, env = "TAXROLL_USER_AGENTS")]
        user_agents: PathBuf,

        /// Number of parallel pipeline replicas
        #[arg(short, long, env = "TAXROLL_REPLICAS", default_value_t = 7)]
        replicas: usize,

        /// Lower bound of the pause after a session warm-up
        #[arg(long, env = "TAXROLL_JITTER_MIN_MS", default_value_t = 10)]
        jitter_min_ms: u64,

        /// Upper bound (exclusive) of the pause after a session warm-up
        #[arg(long, env = "TAXROLL_JITTER_MAX_MS", default_value_t = 250)]
        jitter_max_ms: u64,

        /// When to retire a proxy: on-failure, on-success or never
        #[arg(long, env = "TAXROLL_MARK_BAD", default_value = "on-failure")]
        mark_bad: MarkBadPolicy,

        /// Per-request timeout in seconds
        #[arg(long, env = "TAXROLL_TIMEOUT_SECS", default_value_t = 30)]
        timeout_secs: u64,

        /// Portal landing page that issues the session cookie
        #[arg(long, env = "TAXROLL_WARM_UP_URL", default_value = DEFAULT_WARM_UP_URL)]
        warm_up_url: String,

        /// Referer sent with detail requests
        #[arg(long, env = "TAXROLL_REFERER", default_value = DEFAULT_REFERER)]
        referer: String,

        /// Print the run report as JSON instead of a summary
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Manage the proxy pool
    Proxies {
        #[command(subcommand)]
        command: ProxyCommands,
    },

    /// Print a stored property as JSON
    Show {
        /// Property identifier (the portal's prop_id)
        #[arg(short, long)]
        id: i64,
    },
}

#[derive(Subcommand)]
enum ProxyCommands {
    /// Add proxies (one host:port per line) that are not yet known
    Load { file: PathBuf },
    /// Put every proxy marked bad back into rotation
    Reset,
    /// List all proxies with their rotation state
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Setup tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("taxroll=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Scrape {
            urls,
            user_agents,
            replicas,
            jitter_min_ms,
            jitter_max_ms,
            mark_bad,
            timeout_secs,
            warm_up_url,
            referer,
            json,
        } => {
            let config = PipelineConfig::default()
                .with_replicas(replicas)
                .with_warmup_jitter(JitterConfig::from_millis(jitter_min_ms, jitter_max_ms))
                .with_mark_bad(mark_bad);
            let portal = PortalConfig::default()
                .with_timeout(Duration::from_secs(timeout_secs))
                .with_warm_up_url(warm_up_url)
                .with_referer(referer);
            let db = connect_db().await?;
            cmd_scrape(&urls, &user_agents, config, portal, &db, json).await?;
        }
        Commands::Proxies { command } => {
            let db = connect_db().await?;
            cmd_proxies(command, &db).await?;
        }
        Commands::Show { id } => {
            let db = connect_db().await?;
            cmd_show(id, &db).await?;
        }
    }

    Ok(())
}

/// Connect to PostgreSQL using DATABASE_URL and apply migrations.
async fn connect_db() -> Result<Database> {
    let config = DatabaseConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;
    let db = Database::connect(&config)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await.map_err(|e| anyhow::anyhow!(e))?;
    Ok(db)
}

fn read_input(path: &Path, what: &str) -> Result<Vec<String>> {
    read_lines(path).with_context(|| format!("Failed to read {what} file: {}", path.display()))
}

async fn cmd_scrape(
    urls_path: &Path,
    user_agents_path: &Path,
    config: PipelineConfig,
    portal: PortalConfig,
    db: &Database,
    json: bool,
) -> Result<()> {
    let urls = read_input(urls_path, "URL")?;
    let user_agents = UserAgents::new(read_input(user_agents_path, "user-agent")?);
    if user_agents.is_empty() {
        tracing::warn!(path = %user_agents_path.display(), "User-agent list is empty; every job will fail");
    }

    tracing::info!(
        urls = urls.len(),
        user_agents = user_agents.len(),
        replicas = config.replicas,
        mark_bad = %config.mark_bad,
        "Starting scrape"
    );

    let extractor = HtmlRecordExtractor::new().map_err(|e| anyhow::anyhow!(e))?;
    let pipeline = Pipeline::new(
        db.property_repo(),
        db.proxy_repo(),
        ReqwestPortalFetcher::new(portal),
        extractor,
        user_agents,
        config,
    );

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling pipeline");
            signal_token.cancel();
        }
    });

    let report = pipeline.run(urls, cancel, &TracingPipelineReporter).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }
    Ok(())
}

fn print_summary(report: &PipelineReport) {
    println!(
        "Processed {} of {} jobs: {} persisted, {} duplicate, {} failed",
        report.jobs.len(),
        report.total,
        report.persisted,
        report.duplicates,
        report.failed_total()
    );
    for (kind, count) in &report.failed {
        println!("  {kind}: {count}");
    }

    let failures: Vec<_> = report
        .jobs
        .iter()
        .filter(|j| matches!(j.outcome, JobOutcome::Failed(_)))
        .collect();
    if !failures.is_empty() {
        println!("\nFailed jobs:");
        for job in failures {
            println!(
                "  [{}] {}: {}",
                job.outcome,
                job.url,
                job.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    if report.cancelled {
        println!(
            "\nCancelled: {} jobs were not processed",
            report.unaccounted()
        );
    }
}

async fn cmd_proxies(command: ProxyCommands, db: &Database) -> Result<()> {
    let repo = db.proxy_repo();
    match command {
        ProxyCommands::Load { file } => {
            let ips = read_input(&file, "proxy")?;
            let added = repo.load(&ips).await.map_err(|e| anyhow::anyhow!(e))?;
            println!("Loaded {added} new proxies ({} in file)", ips.len());
        }
        ProxyCommands::Reset => {
            let reset = repo.reset_bad().await.map_err(|e| anyhow::anyhow!(e))?;
            println!("Reset {reset} bad proxies");
        }
        ProxyCommands::List => {
            let proxies = repo.list().await.map_err(|e| anyhow::anyhow!(e))?;
            if proxies.is_empty() {
                println!("No proxies loaded");
                return Ok(());
            }
            for proxy in &proxies {
                let last_used = proxy
                    .last_used
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                    .unwrap_or_else(|| "never".into());
                let status = if proxy.is_bad { "BAD" } else { "ok" };
                println!(
                    "  [{status}] {} (uses: {}, last used: {last_used})",
                    proxy.ip, proxy.uses
                );
            }
            println!("\nTotal: {} proxies", proxies.len());
        }
    }
    Ok(())
}

async fn cmd_show(id: i64, db: &Database) -> Result<()> {
    let record = db
        .property_repo()
        .get(id)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
    match record {
        Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
        None => println!("No property stored with id {id}"),
    }
    Ok(())
}
