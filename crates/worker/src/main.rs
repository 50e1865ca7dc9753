use anyhow::Context;
use clap::{Parser, Subcommand};
use newsflow_core::crawl::CrawlRequest;
use newsflow_core::jobs::{spawn_scheduler, JobKind, JobRun};
use newsflow_core::storage::lock::{try_acquire_job_lock, JobLock};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod app;

use app::App;

#[derive(Debug, Parser)]
#[command(name = "newsflow_worker")]
struct Args {
    /// Use an in-memory store instead of DATABASE_URL; nothing is persisted.
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the periodic crawl and analysis jobs until Ctrl-C.
    Serve,
    /// Crawl a single article URL.
    Crawl {
        url: String,
        /// Source id; inferred from the URL host when omitted.
        #[arg(long)]
        source: Option<String>,
        /// Skip the local extractors and parse with the model.
        #[arg(long)]
        force_ai: bool,
        #[arg(long)]
        rendered: bool,
    },
    /// Crawl several article URLs from one source, one at a time.
    CrawlBatch {
        #[arg(long)]
        source: String,
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Discover feed entries for every source and crawl them.
    CrawlAll,
    /// Score pending articles, or one article with --article-id.
    Sentiment {
        #[arg(long)]
        article_id: Option<i64>,
    },
    /// Correlate scored articles with prices, or one article with --article-id.
    Correlate {
        #[arg(long)]
        article_id: Option<i64>,
    },
    /// Per-source extraction mix over the last day.
    Health,
    /// Sentiment statistics and recent correlations.
    Stats {
        #[arg(long)]
        symbol: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = newsflow_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested; finishing in-flight items");
            let _ = shutdown_tx.send(true);
        }
    });

    let app = App::build(settings, args.dry_run, shutdown_rx.clone()).await?;

    let result = run(&app, args.command, shutdown_rx).await;
    if let Err(err) = &result {
        sentry_anyhow::capture_anyhow(err);
        tracing::error!(error = %format!("{err:#}"), "worker command failed");
    }
    result
}

async fn run(app: &App, command: Command, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
    match command {
        Command::Serve => serve(app, shutdown).await,
        Command::Crawl {
            url,
            source,
            force_ai,
            rendered,
        } => {
            let source = source
                .or_else(|| app.registry.identify(&url).map(|s| s.id.clone()))
                .unwrap_or_else(|| "unknown".to_string());
            let req = CrawlRequest::new(url, source)
                .force_ai(force_ai)
                .rendered(rendered || app.settings.fetch.use_rendered);
            let outcome = app.crawler.crawl(&req).await?;
            print_json(&outcome)
        }
        Command::CrawlBatch { source, urls } => {
            let report = app.crawler.crawl_batch(&urls, &source).await;
            print_json(&report)
        }
        Command::CrawlAll => run_locked(app, JobKind::CrawlAll).await,
        Command::Sentiment { article_id: None } => run_locked(app, JobKind::Sentiment).await,
        Command::Sentiment {
            article_id: Some(id),
        } => {
            let update = app.scorer.score_article(id).await?;
            print_json(&update)
        }
        Command::Correlate { article_id: None } => run_locked(app, JobKind::Correlation).await,
        Command::Correlate {
            article_id: Some(id),
        } => {
            let result = app.aligner.align(id).await?;
            print_json(&result)
        }
        Command::Health => run_locked(app, JobKind::Health).await,
        Command::Stats { symbol, limit } => {
            let stats = app.aligner.sentiment_stats(symbol.as_deref()).await?;
            let correlations = app.aligner.correlations(symbol.as_deref(), limit).await?;
            print_json(&serde_json::json!({
                "sentiment": stats,
                "correlations": correlations,
            }))
        }
    }
}

async fn serve(app: &App, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
    if !app.settings.enable_scheduler {
        tracing::info!("scheduler is disabled by config");
        return Ok(());
    }

    let crawl_every = Duration::from_secs(app.settings.crawl_interval_minutes.max(1) * 60);
    let analysis_every = Duration::from_secs(app.settings.analysis_interval_minutes.max(1) * 60);
    let scheduler = spawn_scheduler(
        app.runner.clone(),
        crawl_every,
        analysis_every,
        shutdown.clone(),
    );

    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            break;
        }
    }
    scheduler.await.context("scheduler task panicked")?;

    // Let running jobs reach their next item boundary.
    for kind in JobKind::ALL {
        while app.runner.is_running(kind) {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }
    Ok(())
}

/// Runs a job under the cross-process advisory lock (skipped when another worker holds it).
async fn run_locked(app: &App, kind: JobKind) -> anyhow::Result<()> {
    let lock = match &app.pool {
        Some(pool) => match try_acquire_job_lock(pool, kind.as_str()).await? {
            Some(lock) => Some(lock),
            None => {
                tracing::warn!(job = %kind, "job lock not acquired; another run in progress");
                return Ok(());
            }
        },
        None => None,
    };

    let result = app.runner.run(kind).await;
    release(lock).await;

    match result? {
        JobRun::Completed(output) => print_json(&output),
        JobRun::Skipped => {
            tracing::info!(job = %kind, "job skipped");
            Ok(())
        }
    }
}

async fn release(lock: Option<JobLock>) {
    if let Some(lock) = lock {
        if let Err(err) = lock.release().await {
            tracing::warn!(error = %format!("{err:#}"), "failed to release job lock");
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_sentry(settings: &newsflow_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
