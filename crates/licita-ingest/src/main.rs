//! Licita ingest - command line entry point

use anyhow::{bail, Context};
use chrono::{NaiveDate, NaiveTime};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use licita_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use licita_common::types::RunReport;
use licita_common::ContractStatus;
use licita_ingest::archive::FeedArchive;
use licita_ingest::discovery::ArchiveDiscovery;
use licita_ingest::extract::FieldExtractor;
use licita_ingest::framework::RateLimiter;
use licita_ingest::normalize::{Normalizer, SourceRecord};
use licita_ingest::sources::placsp::{self, walk_archive};
use licita_ingest::{
    ContractSink, HttpClient, IngestConfig, IngestRunner, JsonLinesSink, MemorySink,
    SourceRegistry,
};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser, Debug)]
#[command(name = "licita-ingest", version, about = "Public procurement ingestion")]
struct Cli {
    /// Log debug output to the console
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List registered sources
    List,

    /// Discover the archives published under a URL
    Discover {
        /// Syndication base URL or listing page; defaults to the configured one
        #[arg(long)]
        url: Option<String>,

        /// Only archives covering this date or later (YYYY-MM-DD)
        #[arg(long)]
        since: Option<NaiveDate>,
    },

    /// Run one or more sources and write normalized contracts
    Run {
        /// Comma separated source names; all sources when omitted
        #[arg(long, value_delimiter = ',')]
        only: Vec<String>,

        /// Date of the last successful run (YYYY-MM-DD)
        #[arg(long)]
        since: Option<NaiveDate>,

        /// JSON lines file for contracts; kept in memory when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// JSON lines file for raw records
        #[arg(long, requires = "output")]
        raw_output: Option<PathBuf>,
    },

    /// Extract and normalize a local PLACSP archive
    ParseArchive {
        /// Zip or gzip container
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: could not load .env: {}", e);
        }
    }

    let log_config = if cli.verbose {
        LogConfig::builder()
            .level(LogLevel::Debug)
            .output(LogOutput::Console)
            .log_file_prefix("licita-ingest")
            .build()
    } else {
        LogConfig::builder()
            .level(LogLevel::Warn)
            .output(LogOutput::Console)
            .log_file_prefix("licita-ingest")
            .build()
    };
    // LOG_* variables take precedence over the flag
    let log_config = if std::env::var_os("LOG_LEVEL").is_some() {
        LogConfig::from_env().unwrap_or(log_config)
    } else {
        log_config
    };
    let _guard = init_logging_or_warn(&log_config);

    if let Err(e) = execute(cli.command).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

/// Logging failures must not stop a run; report them on stderr instead
fn init_logging_or_warn(config: &LogConfig) -> Option<WorkerGuard> {
    match init_logging(config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Warning: logging disabled: {:#}", e);
            None
        },
    }
}

async fn execute(command: Commands) -> anyhow::Result<()> {
    let config = IngestConfig::from_env().context("Failed to load configuration")?;

    match command {
        Commands::List => {
            let http = Arc::new(HttpClient::new(config.http.clone())?);
            let registry = SourceRegistry::with_defaults(&config, http)?;
            for name in registry.names() {
                println!("{}", name);
            }
        },
        Commands::Discover { url, since } => {
            let http = Arc::new(HttpClient::new(config.http.clone())?);
            let url = url.unwrap_or_else(|| config.syndication_url.clone());
            let spinner = spinner(&format!("Discovering archives under {}", url));
            let limiter = Arc::new(RateLimiter::new(config.archive_pool.requests_per_second));
            let discovery = ArchiveDiscovery::new(http, limiter, config.months_to_check)?;
            let discovered = discovery.discover(&url, since).await;
            spinner.finish_and_clear();

            let discovered = discovered.with_context(|| format!("Discovery failed for {}", url))?;
            if discovered.mixed_groups {
                warn!(url = %url, "Archives from more than one syndication group");
            }
            for archive in &discovered.archives {
                let date = archive
                    .date
                    .map(|d| d.format("%Y-%m").to_string())
                    .unwrap_or_else(|| "-------".to_string());
                println!("{}  {}  {}", date, archive.filename, archive.url);
            }
            println!("{} archives", discovered.archives.len());
        },
        Commands::Run {
            only,
            since,
            output,
            raw_output,
        } => {
            let http = Arc::new(HttpClient::new(config.http.clone())?);
            let registry = SourceRegistry::with_defaults(&config, http)?;
            let last_run = since.map(|d| d.and_time(NaiveTime::MIN).and_utc());

            let sink: Box<dyn ContractSink> = match &output {
                Some(path) => Box::new(
                    JsonLinesSink::create(path, raw_output.as_deref())
                        .with_context(|| format!("Cannot write to {}", path.display()))?,
                ),
                None => Box::new(MemorySink::new()),
            };

            let spinner = spinner("Ingesting");
            let reports = IngestRunner::new(&config)
                .run_all(&registry, &only, last_run, sink.as_ref())
                .await;
            spinner.finish_and_clear();

            let reports = reports?;
            for report in &reports {
                print_report(report);
            }
            if let Some(path) = output {
                info!(path = %path.display(), "Contracts written");
            }
        },
        Commands::ParseArchive { file } => parse_archive(file).await?,
    }

    Ok(())
}

async fn parse_archive(file: PathBuf) -> anyhow::Result<()> {
    let archive = FeedArchive::from_path(&file)
        .await
        .with_context(|| format!("Cannot open {}", file.display()))?;
    let Some(base) = archive.base_feed_name()? else {
        bail!("{} contains no feed documents", file.display());
    };

    let walk = walk_archive(&archive, &base)?;
    if let Some(link) = &walk.exit_link {
        info!(link = %link, "Chain continues outside the archive");
    }

    let extractor = FieldExtractor::new();
    let normalizer = Normalizer::new(placsp::PLATFORM, ContractStatus::Published);
    let (mut written, mut dropped, mut failed) = (0usize, 0usize, 0usize);

    for entry in walk.entries() {
        let record = match extractor.extract(&entry) {
            Ok(Some(record)) => record,
            Ok(None) => {
                dropped += 1;
                continue;
            },
            Err(e) => {
                warn!(entry = %entry.entry_id, error = %e, "Entry failed");
                failed += 1;
                continue;
            },
        };
        match normalizer.normalize(&SourceRecord::Licitacion(record)) {
            Some(contract) => {
                println!("{}", serde_json::to_string(&contract)?);
                written += 1;
            },
            None => dropped += 1,
        }
    }

    eprintln!(
        "{}: {} contracts, {} dropped, {} failed",
        archive.name(),
        written,
        dropped,
        failed
    );
    Ok(())
}

fn print_report(report: &RunReport) {
    println!(
        "{:<8} {:<8} contracts={} dropped={} entries={}/{} archives={}/{} sink_failures={} took={}s",
        report.source,
        format!("{:?}", report.status).to_uppercase(),
        report.contracts,
        report.dropped,
        report.entries.successful,
        report.entries.total_items,
        report.archives.successful,
        report.archives.total_items,
        report.sink_failures,
        report.duration().num_seconds(),
    );
    if let Some(error) = &report.error {
        println!("         error: {}", error);
    }
    for failure in report.archives.errors.iter().chain(&report.entries.errors).take(10) {
        println!("         {}: {}", failure.item_id, failure.error);
    }
}

fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
