use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

use timetable_scraper::config::{Config, DEFAULT_CONFIG_PATH};
use timetable_scraper::infra::ReqwestHttp;
use timetable_scraper::pipeline::{cancel_pair, RunReport, Worker};
use timetable_scraper::storage::store_from_config;
use timetable_scraper::{logging, metrics, server};

#[derive(Parser)]
#[command(name = "timetable-scraper")]
#[command(about = "Course timetable ingestion worker and read API")]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape the catalog once and publish fresh snapshots
    Run {
        /// Print the run report as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },
    /// Serve the read API over the published collections
    Serve {
        /// Port to listen on (overrides the configuration)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print the effective configuration and exit
    CheckConfig,
}

fn print_report(report: &RunReport) {
    println!("\n📊 Run {} ({} {})", report.run_id, report.source.title, report.source.year);
    println!("   Reference lists:");
    for refresh in &report.options {
        match (refresh.published, &refresh.stale_year) {
            (Some(count), _) => println!("     {:<14} {}", refresh.collection, count),
            (None, Some(year)) => println!("     {:<14} unchanged, still {} (no options found)", refresh.collection, year),
            (None, None) => println!("     {:<14} empty (no options found)", refresh.collection),
        }
    }
    println!("   Subjects crawled: {}/{}", report.subjects_crawled, report.subjects_total);
    println!("   Rows scraped: {}", report.rows_scraped);
    println!("   Sections published: {}", report.sections_published);
    println!("   Decode warnings: {}", report.decode_warnings);
    println!("   Skipped rows: {}", report.skipped_rows);

    if !report.failed_subjects.is_empty() || !report.failed_pages.is_empty() {
        println!("\n⚠️  Left out of this snapshot:");
        for failure in report.failed_subjects.iter().chain(&report.failed_pages) {
            println!("   - {}: {}", failure.subject, failure.error);
        }
    }
}

async fn run_once(config: Config, json: bool) -> anyhow::Result<()> {
    metrics::init_metrics();
    let store = store_from_config(&config.store).context("opening document store")?;
    let http = Arc::new(ReqwestHttp::new(&config.crawl)?);
    let worker = Worker::new(config, store, http)?;

    let (handle, token) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            handle.cancel();
        }
    });

    let report = worker.run(token).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let _log_guard = logging::init_logging(Path::new(logging::LOG_DIR)).context("setting up log files")?;

    let cli = Cli::parse();
    let config = Config::load_or_default(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;

    match cli.command {
        Commands::Run { json } => {
            info!("Starting ingestion run against {}", config.catalog.url);
            if let Err(e) = run_once(config, json).await {
                error!("Run failed: {:#}", e);
                println!("❌ Run failed: {:#}", e);
                return Err(e);
            }
            println!("✅ Run completed successfully");
        }
        Commands::Serve { port } => {
            metrics::init_metrics();
            let port = port.unwrap_or(config.server.port);
            let store = store_from_config(&config.store).context("opening document store")?;
            let collections = config.option_collections().map(str::to_string).collect();
            server::start_server(store, collections, port).await?;
        }
        Commands::CheckConfig => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
    }
    Ok(())
}
