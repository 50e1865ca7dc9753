use anyhow::Context;
use newsflow_core::config::Settings;
use newsflow_core::correlation::CorrelationAligner;
use newsflow_core::crawl::CrawlOrchestrator;
use newsflow_core::extract::{AiExtractor, SourceRegistry};
use newsflow_core::feed::HttpFeedReader;
use newsflow_core::fetch::HttpFetcher;
use newsflow_core::jobs::{JobConfig, JobRunner};
use newsflow_core::llm::gemini::GeminiClient;
use newsflow_core::llm::TextGenerator;
use newsflow_core::sentiment::{build_classifier, SentimentScorer};
use newsflow_core::storage::{self, MemoryStore, PgStore, Store};
use std::sync::Arc;
use tokio::sync::watch;

/// Every component the subcommands need, wired once from settings.
pub struct App {
    pub settings: Settings,
    pub pool: Option<sqlx::PgPool>,
    pub registry: Arc<SourceRegistry>,
    pub crawler: Arc<CrawlOrchestrator>,
    pub scorer: Arc<SentimentScorer>,
    pub aligner: Arc<CorrelationAligner>,
    pub runner: Arc<JobRunner>,
}

impl App {
    pub async fn build(
        settings: Settings,
        dry_run: bool,
        shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<Self> {
        let (store, pool): (Arc<dyn Store>, Option<sqlx::PgPool>) = if dry_run {
            tracing::info!(dry_run = true, "using in-memory store; nothing is persisted");
            (Arc::new(MemoryStore::new()), None)
        } else {
            let pg = PgStore::connect(settings.require_database_url()?).await?;
            storage::migrate(pg.pool()).await?;
            let pool = pg.pool().clone();
            (Arc::new(pg), Some(pool))
        };

        let registry = Arc::new(
            SourceRegistry::from_path_or_builtin(settings.sources_config_path.as_deref())
                .context("failed to load source selectors")?,
        );
        tracing::info!(sources = registry.len(), "source registry loaded");

        let generator: Option<Arc<dyn TextGenerator>> = match settings.gemini_api_key {
            Some(_) => Some(Arc::new(GeminiClient::from_settings(&settings)?)),
            None => {
                tracing::warn!("GEMINI_API_KEY not set; AI extraction and generative sentiment are off");
                None
            }
        };

        let fetcher = Arc::new(HttpFetcher::from_settings(&settings.fetch)?);
        let mut crawler = CrawlOrchestrator::new(store.clone(), fetcher, registry.clone())
            .with_item_timeout(settings.item_timeout());
        if let Some(generator) = &generator {
            crawler = crawler.with_ai(
                AiExtractor::new(generator.clone(), store.clone()),
                settings.use_ai_fallback,
            );
        }
        let crawler = Arc::new(crawler);

        let classifier = build_classifier(&settings, generator, store.clone())?;
        let scorer = Arc::new(
            SentimentScorer::new(classifier, store.clone())
                .with_max_chars(settings.max_text_chars())
                .with_item_timeout(settings.item_timeout()),
        );
        let aligner = Arc::new(
            CorrelationAligner::new(store.clone())
                .with_quote_asset(settings.quote_asset.clone())
                .with_interval(settings.price_interval.clone())
                .with_item_timeout(settings.item_timeout()),
        );

        let feeds = Arc::new(HttpFeedReader::from_settings(&settings.fetch)?);
        let runner = Arc::new(
            JobRunner::new(
                crawler.clone(),
                feeds,
                registry.clone(),
                scorer.clone(),
                aligner.clone(),
                store,
                JobConfig::from_settings(&settings),
            )
            .with_shutdown(shutdown),
        );

        Ok(Self {
            settings,
            pool,
            registry,
            crawler,
            scorer,
            aligner,
            runner,
        })
    }
}
