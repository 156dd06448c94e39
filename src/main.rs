//! Chapter-Ingest main entry point
//!
//! This is the command-line interface for the chapter acquisition pipeline.

use anyhow::Context;
use chapter_ingest::adapter::AdapterRegistry;
use chapter_ingest::config::{load_config_with_hash, Config};
use chapter_ingest::fetch::PageFetcher;
use chapter_ingest::output::{
    load_statistics, print_enqueue_outcome, print_enqueue_plan, print_run_summary,
    print_statistics,
};
use chapter_ingest::queue::ProcessorSettings;
use chapter_ingest::storage::{
    lock_storage, open_storage, Catalog, PageRecord, SharedStorage, Storage,
};
use chapter_ingest::{
    BatchProcessor, EnqueueRequest, Enqueuer, IngestService, PageFetchState, ProgressReporter,
};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// Chapter-Ingest: background acquisition of manga chapter pages
///
/// Queues every configured chapter that has no pages yet, then drains the
/// queue in small concurrent batches through the configured source adapters.
#[derive(Parser, Debug)]
#[command(name = "chapter-ingest")]
#[command(version = "1.0.0")]
#[command(about = "Background acquisition of manga chapter pages", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Only enqueue this work (repeatable); defaults to every configured work
    #[arg(long = "work", value_name = "WORK_ID")]
    works: Vec<String>,

    /// Source adapter for new jobs; defaults to `queue.default-source`
    #[arg(long)]
    source: Option<String>,

    /// Priority of the first queued chapter of each work
    #[arg(long, value_name = "N", allow_hyphen_values = true)]
    priority_base: Option<i64>,

    /// Show what would be queued without inserting jobs
    #[arg(long, conflicts_with_all = ["stats", "check_chapter"])]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with_all = ["dry_run", "check_chapter"])]
    stats: bool,

    /// Re-fetch the stored pages of a chapter of each `--work` and report which load
    #[arg(
        long,
        value_name = "CHAPTER_ID",
        requires = "works",
        conflicts_with_all = ["dry_run", "stats"]
    )]
    check_chapter: Option<String>,

    /// Fail jobs stuck in processing longer than `queue.stale-after-minutes`
    #[arg(long)]
    recover_stale: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.stats {
        return handle_stats(&config);
    }

    let storage = open_storage(Path::new(&config.output.database_path))
        .with_context(|| format!("Failed to open database {}", config.output.database_path))?
        .into_shared();

    seed_catalog(&config, &storage)?;

    if let Some(chapter_id) = &cli.check_chapter {
        return handle_check_chapter(&config, &storage, &cli.works, chapter_id).await;
    }

    if cli.dry_run {
        return handle_dry_run(&config, &storage, &cli);
    }

    recover(&config, &storage, cli.recover_stale)?;
    handle_ingest(config, config_hash, storage, &cli).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("chapter_ingest=info,warn"),
            1 => EnvFilter::new("chapter_ingest=debug,info"),
            2 => EnvFilter::new("chapter_ingest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Closes out state left behind by a previous process
fn recover(config: &Config, storage: &SharedStorage, recover_stale: bool) -> anyhow::Result<()> {
    let mut storage = lock_storage(storage);

    let interrupted = storage.mark_interrupted_runs()?;
    if interrupted > 0 {
        tracing::warn!("Marked {} unfinished runs as interrupted", interrupted);
    }

    if recover_stale {
        let older_than = chrono::Duration::minutes(config.queue.stale_after_minutes as i64);
        let failed = storage.fail_stale_processing(older_than)?;
        tracing::info!("Failed {} jobs stuck in processing", failed);
    }

    Ok(())
}

/// Writes the `[[work]]` entries of the configuration into the catalog
fn seed_catalog(config: &Config, storage: &SharedStorage) -> anyhow::Result<()> {
    let mut storage = lock_storage(storage);
    for work in &config.works {
        storage.upsert_work(&work.id, &work.title)?;
        for chapter in &work.chapters {
            storage.upsert_chapter(&work.id, &chapter.id, chapter.number, &chapter.url)?;
        }
    }

    tracing::debug!("Catalog seeded with {} works", config.works.len());
    Ok(())
}

/// Work ids selected on the command line, or every configured work
fn selected_works(config: &Config, cli: &Cli) -> Vec<String> {
    if cli.works.is_empty() {
        config.works.iter().map(|w| w.id.clone()).collect()
    } else {
        cli.works.clone()
    }
}

fn enqueue_request(work_id: &str, cli: &Cli) -> EnqueueRequest {
    EnqueueRequest {
        work_id: work_id.to_string(),
        source: cli.source.clone(),
        priority_base: cli.priority_base,
    }
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.output.database_path);

    let storage = open_storage(Path::new(&config.output.database_path))?;
    let stats = load_statistics(&storage)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the --dry-run mode: shows what each work would queue
fn handle_dry_run(config: &Config, storage: &SharedStorage, cli: &Cli) -> anyhow::Result<()> {
    println!("=== Chapter-Ingest Dry Run ===\n");

    println!("Processor:");
    println!("  Batch size: {}", config.processor.batch_size);
    println!("  Batch delay: {}ms", config.processor.batch_delay_ms);
    println!(
        "  Dispatch timeout: {}s",
        config.processor.dispatch_timeout_secs
    );

    println!("\nFetch:");
    println!("  Proxies: {}", config.fetch.proxies.len());
    println!("  Max retries: {}", config.fetch.max_retries);
    println!("  Backoff base: {}ms", config.fetch.backoff_base_ms);

    println!("\nSources ({}):", config.sources.len());
    for source in &config.sources {
        println!("  - {} ({})", source.name, source.page_selector);
    }
    println!();

    let enqueuer = Enqueuer::new(Arc::clone(storage), &config.queue);
    let mut total = 0;
    for work_id in selected_works(config, cli) {
        let plan = enqueuer.plan(&enqueue_request(&work_id, cli))?;
        total += plan.jobs.len();
        print_enqueue_plan(&plan);
    }

    println!("\n✓ Configuration is valid");
    println!("✓ Would queue {} chapters", total);

    Ok(())
}

/// Handles the --check-chapter mode: re-fetches stored pages
async fn handle_check_chapter(
    config: &Config,
    storage: &SharedStorage,
    works: &[String],
    chapter_id: &str,
) -> anyhow::Result<()> {
    let fetcher = PageFetcher::from_config(&config.http, &config.fetch)?;

    for work_id in works {
        let pages = lock_storage(storage).pages_for_chapter(work_id, chapter_id)?;
        if pages.is_empty() {
            println!("Chapter {} of {} has no stored pages", chapter_id, work_id);
            continue;
        }

        println!("Chapter {} of {}:", chapter_id, work_id);
        check_pages(&fetcher, &pages).await;
    }

    Ok(())
}

async fn check_pages(fetcher: &PageFetcher, pages: &[PageRecord]) {
    let mut failed = 0;

    for page in pages {
        let mut state = PageFetchState::new();
        let mut result = fetcher.drive(&mut state, &page.url).await;
        if result.is_err() {
            // One manual retry, bypassing caches
            result = fetcher.retry(&mut state, &page.url).await;
        }

        match result {
            Ok(fetched) => println!(
                "  [{}] {} {} ({} attempts, {})",
                page.page_index, state.status, page.url, fetched.attempts, fetched.strategy
            ),
            Err(e) => {
                failed += 1;
                println!("  [{}] {} {}: {}", page.page_index, state.status, page.url, e);
            }
        }
    }

    println!(
        "\n{} of {} pages loaded",
        pages.len() - failed,
        pages.len()
    );
}

/// Handles the main mode: enqueue, then drain until idle
async fn handle_ingest(
    config: Config,
    config_hash: String,
    storage: SharedStorage,
    cli: &Cli,
) -> anyhow::Result<()> {
    let fetcher = PageFetcher::from_config(&config.http, &config.fetch)?;
    let registry = AdapterRegistry::from_config(&config, fetcher, Arc::clone(&storage))?;
    tracing::info!("Source adapters: {}", registry.names().join(", "));

    let processor = BatchProcessor::new(
        Arc::clone(&storage),
        Arc::new(registry),
        ProgressReporter::new(Arc::clone(&storage)),
        ProcessorSettings::from_config(&config.processor, config_hash),
    );
    let service = IngestService::new(processor).with_completion_hook(|_, summary| {
        print_run_summary(summary);
    });

    let (trigger, requests) = mpsc::unbounded_channel();
    let worker = service.spawn_trigger_worker(requests);
    let enqueuer = Enqueuer::new(Arc::clone(&storage), &config.queue).with_trigger(trigger);

    for work_id in selected_works(&config, cli) {
        match enqueuer.enqueue(&enqueue_request(&work_id, cli)) {
            Ok(outcome) => print_enqueue_outcome(&outcome),
            Err(e) => tracing::error!("Failed to enqueue {}: {}", work_id, e),
        }
    }

    // Closing the trigger lets the worker finish once it has started every run
    drop(enqueuer);
    worker.await.context("Trigger worker panicked")?;

    tokio::select! {
        _ = service.wait_idle() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupt received, finishing current batches");
            service.stop_all();
            service.wait_idle().await;
        }
    }

    let stats = load_statistics(&*lock_storage(&storage))?;
    println!();
    print_statistics(&stats);

    Ok(())
}
