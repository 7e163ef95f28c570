use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};
use uuid::Uuid;

use job_tracker::config::TrackerConfig;
use job_tracker::ingest;
use job_tracker::pipeline::{ApplicationProcessor, ProcessOutcome};
use job_tracker::store::{LibSqlBackend, ThreadStore};

#[derive(Parser)]
#[command(name = "job-tracker", version, about = "Track job applications from recruiting emails")]
struct Cli {
    /// TOML configuration file.
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run `.eml` files or `.json` exports through the pipeline.
    Process {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// List application threads with their event timelines.
    Threads {
        #[arg(long)]
        company: Option<String>,
    },
    /// Show emails waiting for manual review.
    Review,
    /// Fold a duplicate thread into another, keeping every event.
    Merge {
        /// Thread to remove.
        source: Uuid,
        /// Thread that receives the events.
        target: Uuid,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    let _log_guard = init_tracing();
    let cli = Cli::parse();

    let config = TrackerConfig::load(cli.config.as_deref()).context("loading configuration")?;

    let store: Arc<LibSqlBackend> = Arc::new(
        LibSqlBackend::new_local(&config.database.path)
            .await
            .with_context(|| format!("opening database at {}", config.database.path.display()))?,
    );

    match cli.command {
        Command::Process { files } => process(&config, store, &files).await,
        Command::Threads { company } => threads(store.as_ref(), company.as_deref()).await,
        Command::Review => review(store.as_ref()).await,
        Command::Merge { source, target } => merge(store.as_ref(), source, target).await,
    }
}

/// Console logging, plus a daily rolling file when `JOB_TRACKER_LOG_DIR` is set.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match std::env::var("JOB_TRACKER_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "job-tracker.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    guard
}

async fn process(
    config: &TrackerConfig,
    store: Arc<LibSqlBackend>,
    files: &[PathBuf],
) -> anyhow::Result<()> {
    let mut emails = Vec::new();
    for path in files {
        let loaded = ingest::load_file(path)
            .await
            .with_context(|| format!("loading {}", path.display()))?;
        emails.extend(loaded);
    }

    let processor = Arc::new(
        ApplicationProcessor::from_config(config, store).context("building provider chain")?,
    );
    eprintln!(
        "📬 Processing {} email(s) with {} provider(s)",
        emails.len(),
        config.providers.len()
    );

    let report = processor.process_batch(emails).await;
    for result in &report.results {
        match &result.outcome {
            Ok(ProcessOutcome::Recorded {
                thread_id,
                is_new,
                status,
                source,
                had_defaults,
                ..
            }) => {
                let marker = if *had_defaults { " (low confidence)" } else { "" };
                let kind = if *is_new { "new thread" } else { "update" };
                println!("{}  {kind} {thread_id}  {status} [{source}]{marker}", result.email_id);
            }
            Ok(ProcessOutcome::Skipped { reason }) => {
                println!("{}  skipped: {reason}", result.email_id);
            }
            Ok(other) => println!("{}  {}", result.email_id, other.label()),
            Err(e) => println!("{}  FAILED: {e}", result.email_id),
        }
    }

    eprintln!(
        "\n✅ {} recorded ({} new threads), {} skipped, {} unattributed, {} failed",
        report.recorded(),
        report.new_threads(),
        report.skipped(),
        report.unattributed(),
        report.failed()
    );
    Ok(())
}

async fn threads(store: &dyn ThreadStore, company: Option<&str>) -> anyhow::Result<()> {
    let threads = match company {
        Some(company) => store.list_threads(company).await?,
        None => store.list_all_threads().await?,
    };
    if threads.is_empty() {
        println!("No application threads.");
        return Ok(());
    }

    for thread in threads {
        println!(
            "{}  {} / {}  [{}]{}  updated {}",
            thread.thread_id,
            thread.company_name,
            thread.position.as_deref().unwrap_or("(position unknown)"),
            thread.current_status,
            if thread.is_active { "" } else { " closed" },
            thread.updated_at.format("%Y-%m-%d"),
        );
        for event in store.list_events(thread.thread_id).await? {
            let transition = match event.old_status {
                Some(old) if old != event.status_at_event => {
                    format!("{old} -> {}", event.status_at_event)
                }
                _ => event.status_at_event.to_string(),
            };
            println!(
                "    {}  {:<22} [{}]  {}  ({})",
                event.created_at.format("%Y-%m-%d %H:%M"),
                transition,
                event.extraction_source,
                event.summary,
                event.email_subject
            );
        }
    }
    Ok(())
}

async fn merge(store: &dyn ThreadStore, source: Uuid, target: Uuid) -> anyhow::Result<()> {
    let merged = store
        .merge_threads(source, target)
        .await
        .with_context(|| format!("merging thread {source} into {target}"))?;
    println!(
        "Merged {source} into {}  {} / {}  [{}]",
        merged.thread_id,
        merged.company_name,
        merged.position.as_deref().unwrap_or("(position unknown)"),
        merged.current_status
    );
    Ok(())
}

async fn review(store: &dyn ThreadStore) -> anyhow::Result<()> {
    let queue = store.list_review_queue().await?;
    if queue.is_empty() {
        println!("Review queue is empty.");
        return Ok(());
    }
    for item in queue {
        println!(
            "{}  {}  {}",
            item.flagged_at.format("%Y-%m-%d %H:%M"),
            item.email_id,
            item.reason
        );
    }
    Ok(())
}
