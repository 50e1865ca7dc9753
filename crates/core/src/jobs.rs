//! Batch job trigger surface and the periodic scheduler. At most one run per job kind is
//! active at a time; a trigger that finds its job running is skipped, not queued.

use crate::config::Settings;
use crate::correlation::CorrelationAligner;
use crate::crawl::{CrawlOrchestrator, CrawlReport, CrawlRequest};
use crate::extract::SourceRegistry;
use crate::feed::FeedReader;
use crate::health::{parser_health, ParserHealth};
use crate::sentiment::{BatchReport, SentimentScorer};
use crate::storage::Store;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    CrawlAll,
    Sentiment,
    Correlation,
    Health,
}

impl JobKind {
    pub const ALL: [JobKind; 4] = [
        JobKind::CrawlAll,
        JobKind::Sentiment,
        JobKind::Correlation,
        JobKind::Health,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::CrawlAll => "crawl_all",
            JobKind::Sentiment => "sentiment",
            JobKind::Correlation => "correlation",
            JobKind::Health => "health",
        }
    }

    fn slot(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "job", content = "report", rename_all = "snake_case")]
pub enum JobOutput {
    CrawlAll(CrawlReport),
    Sentiment(BatchReport),
    Correlation(BatchReport),
    Health(ParserHealth),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum JobRun {
    Completed(JobOutput),
    /// Another run of the same job was still active.
    Skipped,
}

#[derive(Debug, Clone)]
pub struct JobConfig {
    pub batch_size: usize,
    pub feed_limit: usize,
    pub max_concurrent_crawls: usize,
    pub rendered_fetch: bool,
    pub health_window: chrono::Duration,
}

impl JobConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            batch_size: settings.batch_size,
            feed_limit: settings.feed_limit,
            max_concurrent_crawls: settings.max_concurrent_crawls,
            rendered_fetch: settings.fetch.use_rendered,
            ..Self::default()
        }
    }
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            feed_limit: 5,
            max_concurrent_crawls: 5,
            rendered_fetch: false,
            health_window: chrono::Duration::days(1),
        }
    }
}

pub struct JobRunner {
    crawler: Arc<CrawlOrchestrator>,
    feeds: Arc<dyn FeedReader>,
    registry: Arc<SourceRegistry>,
    scorer: Arc<SentimentScorer>,
    aligner: Arc<CorrelationAligner>,
    store: Arc<dyn Store>,
    config: JobConfig,
    running: [AtomicBool; 4],
    shutdown: Option<watch::Receiver<bool>>,
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl JobRunner {
    pub fn new(
        crawler: Arc<CrawlOrchestrator>,
        feeds: Arc<dyn FeedReader>,
        registry: Arc<SourceRegistry>,
        scorer: Arc<SentimentScorer>,
        aligner: Arc<CorrelationAligner>,
        store: Arc<dyn Store>,
        config: JobConfig,
    ) -> Self {
        Self {
            crawler,
            feeds,
            registry,
            scorer,
            aligner,
            store,
            config,
            running: Default::default(),
            shutdown: None,
        }
    }

    /// Batches stop between items once the receiver reads true.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn is_running(&self, kind: JobKind) -> bool {
        self.running[kind.slot()].load(Ordering::Acquire)
    }

    fn try_start(&self, kind: JobKind) -> Option<RunningGuard<'_>> {
        let flag = &self.running[kind.slot()];
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunningGuard(flag))
    }

    /// Runs `kind` to completion in the current task, or skips if it is already running.
    #[tracing::instrument(level = "info", skip(self), fields(job = %kind))]
    pub async fn run(&self, kind: JobKind) -> anyhow::Result<JobRun> {
        let Some(_guard) = self.try_start(kind) else {
            tracing::info!("job already running; skipping");
            return Ok(JobRun::Skipped);
        };

        let started = std::time::Instant::now();
        let output = match kind {
            JobKind::CrawlAll => JobOutput::CrawlAll(self.crawl_all().await?),
            JobKind::Sentiment => JobOutput::Sentiment(
                self.scorer
                    .run_batch_until(self.config.batch_size, self.shutdown.clone())
                    .await?,
            ),
            JobKind::Correlation => JobOutput::Correlation(
                self.aligner
                    .run_batch_until(self.config.batch_size, self.shutdown.clone())
                    .await?,
            ),
            JobKind::Health => JobOutput::Health(self.health().await?),
        };
        tracing::info!(elapsed_ms = started.elapsed().as_millis() as u64, "job finished");
        Ok(JobRun::Completed(output))
    }

    /// Runs `kind` on a background task. Failures are logged, not returned.
    pub fn trigger(self: &Arc<Self>, kind: JobKind) -> JoinHandle<()> {
        let runner = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = runner.run(kind).await {
                tracing::error!(job = %kind, error = %format!("{err:#}"), "job failed");
            }
        })
    }

    /// Sentiment then correlation, so freshly scored articles correlate in the same pass.
    pub fn trigger_analysis(self: &Arc<Self>) -> JoinHandle<()> {
        let runner = Arc::clone(self);
        tokio::spawn(async move {
            for kind in [JobKind::Sentiment, JobKind::Correlation] {
                if let Err(err) = runner.run(kind).await {
                    tracing::error!(job = %kind, error = %format!("{err:#}"), "job failed");
                }
            }
        })
    }

    fn stop_requested(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    async fn crawl_all(&self) -> anyhow::Result<CrawlReport> {
        let mut requests = Vec::new();
        for (source, feed_url) in self.registry.feeds() {
            if self.stop_requested() {
                break;
            }
            let entries = self.feeds.parse_feed(&feed_url, self.config.feed_limit).await;
            tracing::info!(%source, entries = entries.len(), "discovered feed entries");
            requests.extend(entries.into_iter().map(|e| {
                CrawlRequest::new(e.link, source.clone()).rendered(self.config.rendered_fetch)
            }));
        }

        let report = self
            .crawler
            .crawl_many(
                requests,
                self.config.max_concurrent_crawls,
                self.shutdown.clone(),
            )
            .await;
        tracing::info!(
            total = report.total,
            success = report.success,
            skipped = report.skipped,
            failed = report.failed,
            interrupted = report.interrupted,
            "crawl job completed"
        );
        Ok(report)
    }

    async fn health(&self) -> anyhow::Result<ParserHealth> {
        let since = chrono::Utc::now() - self.config.health_window;
        let mut report = parser_health(self.store.as_ref(), since).await?;
        report.source_cache = self.crawler.source_cache().snapshot();
        Ok(report)
    }
}

/// Fires crawl-all every `crawl_every` and the analysis pair every `analysis_every`, starting
/// immediately, until `shutdown` reads true. Runs are spawned so a slow job never delays a tick.
pub fn spawn_scheduler(
    runner: Arc<JobRunner>,
    crawl_every: Duration,
    analysis_every: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut crawl_tick = tokio::time::interval(crawl_every);
        let mut analysis_tick = tokio::time::interval(analysis_every);
        crawl_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        analysis_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            crawl_every_secs = crawl_every.as_secs(),
            analysis_every_secs = analysis_every.as_secs(),
            "scheduler started"
        );
        loop {
            tokio::select! {
                _ = crawl_tick.tick() => {
                    runner.trigger(JobKind::CrawlAll);
                }
                _ = analysis_tick.tick() => {
                    runner.trigger_analysis();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("scheduler stopped");
    })
}
