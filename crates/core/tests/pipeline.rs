use chrono::{NaiveDate, TimeZone, Utc};
use newsflow_core::correlation::CorrelationAligner;
use newsflow_core::crawl::{CrawlFailure, CrawlOrchestrator, CrawlOutcome, CrawlRequest};
use newsflow_core::domain::{
    ArticleDraft, ExtractionMethod, PriceObservation, SentimentLabel, TokenUsage, UsageStatus,
};
use newsflow_core::extract::{AiExtractor, SourceRegistry};
use newsflow_core::feed::{FeedEntry, FeedReader};
use newsflow_core::fetch::{FetchError, HtmlFetcher};
use newsflow_core::jobs::{JobConfig, JobKind, JobOutput, JobRun, JobRunner};
use newsflow_core::llm::{Generation, Provider, TextGenerator};
use newsflow_core::sentiment::{
    LexiconClassifier, SentimentClassifier, SentimentScore, SentimentScorer,
};
use newsflow_core::storage::{MemoryStore, Store};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

struct CountingFetcher {
    html: String,
    calls: AtomicUsize,
}

impl CountingFetcher {
    fn new(html: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            html: html.into(),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl HtmlFetcher for CountingFetcher {
    async fn fetch(&self, url: &str, _rendered: bool) -> Result<String, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.html.is_empty() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: 503,
            });
        }
        Ok(self.html.clone())
    }
}

struct CountingGenerator {
    reply: String,
    calls: AtomicUsize,
}

impl CountingGenerator {
    fn new(reply: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.into(),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl TextGenerator for CountingGenerator {
    fn provider(&self) -> Provider {
        Provider::Gemini
    }

    fn model(&self) -> &str {
        "gemini-test"
    }

    async fn generate(&self, _prompt: &str) -> anyhow::Result<Generation> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Generation {
            text: self.reply.clone(),
            usage: TokenUsage {
                prompt_tokens: 100,
                completion_tokens: 50,
                total_tokens: 150,
            },
        })
    }
}

fn paragraph(i: usize) -> String {
    format!("<p>Paragraph {i} describes how traders reacted to the spot bitcoin ETF decision today.</p>")
}

fn semantic_page() -> String {
    format!(
        "<html><head><title>Desk</title></head><body><article><h1>Bitcoin climbs after ETF approval</h1>{}</article></body></html>",
        (0..4).map(paragraph).collect::<String>()
    )
}

/// Parses nowhere locally: the heading is too short and there is no body text.
fn thin_page() -> &'static str {
    "<html><body><h1>Hi</h1><p>Subscribe now.</p></body></html>"
}

fn ai_reply() -> String {
    json!({
        "title": "Ether rallies into the upgrade",
        "content": "Ether gained as traders positioned for the network upgrade. ".repeat(4),
        "author": "Desk Staff",
        "published_at": "2024-01-20T12:00:00",
        "summary": "ETH up.",
        "related_symbols": ["eth"]
    })
    .to_string()
}

fn draft(url: &str) -> ArticleDraft {
    ArticleDraft {
        url: url.to_string(),
        source: "desk".to_string(),
        title: "Bitcoin climbs after ETF approval".to_string(),
        content: "Bitcoin surges as the ETF approval sparks a broad rally.".to_string(),
        summary: None,
        author: None,
        published_at: Some(Utc.with_ymd_and_hms(2024, 1, 20, 12, 0, 0).unwrap()),
        related_symbols: Some("BTC".to_string()),
        method: ExtractionMethod::Semantic,
    }
}

fn candle(symbol: &str, hour: u32, close: f64) -> PriceObservation {
    let close_time = NaiveDate::from_ymd_opt(2024, 1, 20)
        .unwrap()
        .and_hms_opt(hour, 0, 0)
        .unwrap();
    PriceObservation {
        symbol: symbol.to_string(),
        open: close,
        high: close,
        low: close,
        close,
        volume: 1.0,
        open_time: close_time - chrono::Duration::hours(1),
        close_time,
        interval: "1h".to_string(),
    }
}

fn registry() -> Arc<SourceRegistry> {
    Arc::new(
        SourceRegistry::from_toml_str(
            r#"
[sources.desk]
name = "Desk"
base_url = "https://desk.example"
feed_url = "https://desk.example/feed"

[sources.desk.selectors]
title = "h1.headline"
content = "div.article-content"
"#,
        )
        .unwrap(),
    )
}

fn orchestrator(
    store: &Arc<MemoryStore>,
    fetcher: &Arc<CountingFetcher>,
    ai: Option<(&Arc<CountingGenerator>, bool)>,
) -> CrawlOrchestrator {
    let crawler = CrawlOrchestrator::new(store.clone(), fetcher.clone(), registry());
    match ai {
        Some((generator, fallback)) => {
            crawler.with_ai(AiExtractor::new(generator.clone(), store.clone()), fallback)
        }
        None => crawler,
    }
}

#[tokio::test]
async fn recrawling_a_stored_url_is_skipped_without_fetching() {
    let store = Arc::new(MemoryStore::new());
    let id = store.insert_article(&draft("https://desk.example/a")).await.unwrap().id();
    let fetcher = CountingFetcher::new(semantic_page());
    let crawler = orchestrator(&store, &fetcher, None);

    let outcome = crawler
        .crawl(&CrawlRequest::new("https://desk.example/a", "desk"))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        CrawlOutcome::Skipped {
            article_id: id,
            method: ExtractionMethod::Semantic
        }
    );
    assert_eq!(fetcher.calls(), 0);
    assert_eq!(store.articles().len(), 1);
}

#[tokio::test]
async fn semantic_success_never_reaches_the_model() {
    let store = Arc::new(MemoryStore::new());
    let fetcher = CountingFetcher::new(semantic_page());
    let generator = CountingGenerator::new(ai_reply());
    let crawler = orchestrator(&store, &fetcher, Some((&generator, true)));

    let outcome = crawler
        .crawl(&CrawlRequest::new("https://other.example/story", "other"))
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        CrawlOutcome::Done {
            method: ExtractionMethod::Semantic,
            ..
        }
    ));
    assert_eq!(fetcher.calls(), 1);
    assert_eq!(generator.calls(), 0);
    assert!(store.usage_records().is_empty());

    let cached = crawler.source_cache().hint("other").unwrap();
    assert_eq!(cached.method, ExtractionMethod::Semantic);
}

#[tokio::test]
async fn registered_source_uses_its_selectors_first() {
    let html = format!(
        r#"<html><body><article><h1 class="headline">Desk headline for the rule path</h1>
        <div class="article-content"><p>First rule paragraph.</p><p>Second rule paragraph.</p></div>
        {}</article></body></html>"#,
        (0..4).map(paragraph).collect::<String>()
    );
    let store = Arc::new(MemoryStore::new());
    let fetcher = CountingFetcher::new(html);
    let crawler = orchestrator(&store, &fetcher, None);

    let outcome = crawler
        .crawl(&CrawlRequest::new("https://desk.example/rule", "desk"))
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        CrawlOutcome::Done {
            method: ExtractionMethod::Rule,
            ..
        }
    ));
    let stored = &store.articles()[0];
    assert_eq!(stored.title, "Desk headline for the rule path");
    assert_eq!(stored.content, "First rule paragraph.\n\nSecond rule paragraph.");
}

#[tokio::test]
async fn unknown_source_without_fallback_fails_without_calling_the_model() {
    let store = Arc::new(MemoryStore::new());
    let fetcher = CountingFetcher::new(thin_page());
    let generator = CountingGenerator::new(ai_reply());
    let crawler = orchestrator(&store, &fetcher, Some((&generator, false)));

    let outcome = crawler
        .crawl(&CrawlRequest::new("https://nowhere.example/x", "nowhere"))
        .await
        .unwrap();

    assert_eq!(outcome, CrawlOutcome::Failed(CrawlFailure::AllParsersFailed));
    assert_eq!(generator.calls(), 0);
    assert_eq!(fetcher.calls(), 1);
    assert!(store.articles().is_empty());
}

#[tokio::test]
async fn model_fallback_reuses_the_fetched_html_and_records_usage() {
    let store = Arc::new(MemoryStore::new());
    let fetcher = CountingFetcher::new(thin_page());
    let generator = CountingGenerator::new(ai_reply());
    let crawler = orchestrator(&store, &fetcher, Some((&generator, true)));

    let outcome = crawler
        .crawl(&CrawlRequest::new("https://nowhere.example/y", "nowhere"))
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        CrawlOutcome::Done {
            method: ExtractionMethod::Gemini,
            ..
        }
    ));
    assert_eq!(fetcher.calls(), 1);
    assert_eq!(generator.calls(), 1);

    let stored = &store.articles()[0];
    assert_eq!(stored.related_symbols.as_deref(), Some("ETH"));
    let usage = store.usage_records();
    assert_eq!(usage.len(), 1);
    assert_eq!(usage[0].status, UsageStatus::Success);
    assert_eq!(usage[0].usage.unwrap().total_tokens, 150);
}

#[tokio::test]
async fn forced_ai_skips_local_extractors() {
    let store = Arc::new(MemoryStore::new());
    let fetcher = CountingFetcher::new(semantic_page());
    let generator = CountingGenerator::new(ai_reply());
    let crawler = orchestrator(&store, &fetcher, Some((&generator, false)));

    let outcome = crawler
        .crawl(&CrawlRequest::new("https://other.example/forced", "other").force_ai(true))
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        CrawlOutcome::Done {
            method: ExtractionMethod::Gemini,
            ..
        }
    ));
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn fetch_failure_is_terminal() {
    let store = Arc::new(MemoryStore::new());
    let fetcher = CountingFetcher::new("");
    let generator = CountingGenerator::new(ai_reply());
    let crawler = orchestrator(&store, &fetcher, Some((&generator, true)));

    let outcome = crawler
        .crawl(&CrawlRequest::new("https://down.example/z", "down"))
        .await
        .unwrap();

    assert!(matches!(outcome, CrawlOutcome::Failed(CrawlFailure::Fetch(_))));
    assert_eq!(generator.calls(), 0);
}

#[tokio::test]
async fn batch_crawl_counts_each_status() {
    let store = Arc::new(MemoryStore::new());
    store.insert_article(&draft("https://other.example/old")).await.unwrap();
    let fetcher = CountingFetcher::new(semantic_page());
    let crawler = orchestrator(&store, &fetcher, None);

    let urls = vec![
        "https://other.example/old".to_string(),
        "https://other.example/new".to_string(),
    ];
    let report = crawler.crawl_batch(&urls, "other").await;

    assert_eq!((report.total, report.success, report.skipped, report.failed), (2, 1, 1, 0));
    assert_eq!(report.details[0].status, "skipped");
    assert_eq!(report.details[1].status, "success");
    assert!(!report.interrupted);
}

#[tokio::test]
async fn store_outage_surfaces_as_an_error() {
    let store = Arc::new(MemoryStore::new());
    store.set_unavailable(true);
    let fetcher = CountingFetcher::new(semantic_page());
    let crawler = orchestrator(&store, &fetcher, None);

    let result = crawler
        .crawl(&CrawlRequest::new("https://other.example/a", "other"))
        .await;
    assert!(result.is_err());
    assert_eq!(fetcher.calls(), 0);
}

#[tokio::test]
async fn failed_insert_does_not_mark_the_method_as_working() {
    let store = Arc::new(MemoryStore::new());
    store.fail_article_inserts(true);
    let fetcher = CountingFetcher::new(semantic_page());
    let crawler = orchestrator(&store, &fetcher, None);

    let result = crawler
        .crawl(&CrawlRequest::new("https://other.example/lost", "other"))
        .await;
    assert!(result.is_err());
    assert!(crawler.source_cache().hint("other").is_none());

    store.fail_article_inserts(false);
    crawler
        .crawl(&CrawlRequest::new("https://other.example/kept", "other"))
        .await
        .unwrap();
    let cached = crawler.source_cache().hint("other").unwrap();
    assert_eq!(cached.method, ExtractionMethod::Semantic);
}

#[tokio::test]
async fn sentiment_batch_scores_every_pending_article_within_bounds() {
    let store = Arc::new(MemoryStore::new());
    let texts = [
        "Bitcoin surges as the ETF approval sparks a broad rally.",
        "Exchange hacked; prices crash amid fear of contagion.",
        "The committee met on Tuesday to review the schedule.",
    ];
    for (i, text) in texts.iter().enumerate() {
        let mut d = draft(&format!("https://desk.example/{i}"));
        d.content = text.to_string();
        store.insert_article(&d).await.unwrap();
    }

    let scorer = SentimentScorer::new(Arc::new(LexiconClassifier::new()), store.clone());
    let report = scorer.run_batch(50).await.unwrap();
    assert_eq!((report.processed, report.success, report.failed), (3, 3, 0));

    let articles = store.articles();
    for a in &articles {
        let score = a.sentiment_score.unwrap();
        assert!((-1.0..=1.0).contains(&score));
        assert_eq!(a.sentiment_label, Some(SentimentLabel::from_score(score)));
    }
    assert_eq!(articles[0].sentiment_label, Some(SentimentLabel::Positive));
    assert_eq!(articles[1].sentiment_label, Some(SentimentLabel::Negative));
    assert_eq!(articles[2].sentiment_label, Some(SentimentLabel::Neutral));

    let again = scorer.run_batch(50).await.unwrap();
    assert_eq!(again.processed, 0);
}

struct Exactly(f64);

#[async_trait::async_trait]
impl SentimentClassifier for Exactly {
    fn name(&self) -> &'static str {
        "exactly"
    }

    async fn classify(&self, _text: &str) -> anyhow::Result<SentimentScore> {
        Ok(SentimentScore::from_raw(self.0))
    }
}

struct Broken;

#[async_trait::async_trait]
impl SentimentClassifier for Broken {
    fn name(&self) -> &'static str {
        "broken"
    }

    async fn classify(&self, _text: &str) -> anyhow::Result<SentimentScore> {
        anyhow::bail!("model not loaded")
    }
}

#[tokio::test]
async fn score_of_exactly_point_three_is_neutral() {
    let store = Arc::new(MemoryStore::new());
    let id = store.insert_article(&draft("https://desk.example/t")).await.unwrap().id();

    let scorer = SentimentScorer::new(Arc::new(Exactly(0.3)), store.clone());
    let update = scorer.score_article(id).await.unwrap().unwrap();

    assert_eq!(update.score, 0.3);
    assert_eq!(update.label, SentimentLabel::Neutral);
    assert_eq!(store.articles()[0].sentiment_label, Some(SentimentLabel::Neutral));
}

#[tokio::test]
async fn sentiment_failures_are_counted_not_raised() {
    let store = Arc::new(MemoryStore::new());
    store.insert_article(&draft("https://desk.example/f")).await.unwrap();

    let scorer = SentimentScorer::new(Arc::new(Broken), store.clone());
    let report = scorer.run_batch(10).await.unwrap();

    assert_eq!((report.processed, report.success, report.failed), (1, 0, 1));
    assert!(report.errors[0].contains("model not loaded"));
    assert!(store.articles()[0].sentiment_score.is_none());
}

#[tokio::test]
async fn correlation_matches_hourly_prices_around_publication() {
    let store = Arc::new(MemoryStore::new());
    let id = store.insert_article(&draft("https://desk.example/c")).await.unwrap().id();
    store.insert_price(candle("BTCUSDT", 11, 100.0));
    store.insert_price(candle("BTCUSDT", 13, 105.0));

    let aligner = CorrelationAligner::new(store.clone());

    // Not scored yet: no correlation.
    assert!(aligner.align(id).await.unwrap().is_none());

    let scorer = SentimentScorer::new(Arc::new(Exactly(0.5)), store.clone());
    scorer.score_article(id).await.unwrap();

    let report = aligner.run_batch(10).await.unwrap();
    assert_eq!((report.processed, report.success, report.failed), (1, 1, 0));

    let rows = store.correlation_rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].symbol, "BTC");
    assert_eq!(rows[0].price_before, 100.0);
    assert_eq!(rows[0].price_after, 105.0);
    assert_eq!(rows[0].price_change_pct, 5.0);
    assert_eq!(rows[0].sentiment_score, 0.5);

    // Re-aligning updates the single row for the pair.
    let result = aligner.align(id).await.unwrap().unwrap();
    assert_eq!(result.correlations.len(), 1);
    assert_eq!(store.correlation_rows().len(), 1);
    assert_eq!(aligner.run_batch(10).await.unwrap().processed, 0);
}

#[tokio::test]
async fn missing_prices_skip_symbols_and_count_as_failed() {
    let store = Arc::new(MemoryStore::new());
    let mut d = draft("https://desk.example/m");
    d.related_symbols = Some("BTC,SOL".to_string());
    let id = store.insert_article(&d).await.unwrap().id();
    store.insert_price(candle("BTCUSDT", 11, 100.0));
    store.insert_price(candle("BTCUSDT", 13, 90.0));
    store.insert_price(candle("SOLUSDT", 11, 20.0));

    SentimentScorer::new(Arc::new(Exactly(-0.6)), store.clone())
        .score_article(id)
        .await
        .unwrap();

    let aligner = CorrelationAligner::new(store.clone());
    let result = aligner.align(id).await.unwrap().unwrap();
    assert_eq!(result.correlations.len(), 1);
    assert_eq!(result.correlations[0].symbol, "BTC");
    assert_eq!(result.correlations[0].price_change_pct, -10.0);

    let lonely = store
        .insert_article(&{
            let mut d = draft("https://desk.example/n");
            d.related_symbols = Some("DOGE".to_string());
            d
        })
        .await
        .unwrap()
        .id();
    SentimentScorer::new(Arc::new(Exactly(0.1)), store.clone())
        .score_article(lonely)
        .await
        .unwrap();
    let report = aligner.run_batch(10).await.unwrap();
    assert_eq!((report.processed, report.success, report.failed), (1, 0, 1));
}

async fn scored_article(store: &Arc<MemoryStore>, url: &str, symbols: &str) -> i64 {
    let mut d = draft(url);
    d.related_symbols = Some(symbols.to_string());
    let id = store.insert_article(&d).await.unwrap().id();
    SentimentScorer::new(Arc::new(Exactly(0.4)), store.clone())
        .score_article(id)
        .await
        .unwrap();
    id
}

#[tokio::test]
async fn failed_symbol_write_rolls_back_the_whole_article() {
    let store = Arc::new(MemoryStore::new());
    scored_article(&store, "https://desk.example/pair", "BTC,ETH").await;
    for (pair, before, after) in [("BTCUSDT", 100.0, 105.0), ("ETHUSDT", 50.0, 45.0)] {
        store.insert_price(candle(pair, 11, before));
        store.insert_price(candle(pair, 13, after));
    }
    let aligner = CorrelationAligner::new(store.clone());

    store.fail_correlation_writes_for(Some("ETH"));
    let report = aligner.run_batch(10).await.unwrap();
    assert_eq!((report.processed, report.success, report.failed), (1, 0, 1));
    assert!(store.correlation_rows().is_empty());

    store.fail_correlation_writes_for(None);
    let report = aligner.run_batch(10).await.unwrap();
    assert_eq!((report.processed, report.success, report.failed), (1, 1, 0));
    let mut symbols: Vec<String> = store
        .correlation_rows()
        .into_iter()
        .map(|c| c.symbol)
        .collect();
    symbols.sort();
    assert_eq!(symbols, vec!["BTC", "ETH"]);
}

#[tokio::test]
async fn unpriceable_articles_yield_to_untried_ones() {
    let store = Arc::new(MemoryStore::new());
    let first = scored_article(&store, "https://desk.example/doge-1", "DOGE").await;
    scored_article(&store, "https://desk.example/doge-2", "DOGE").await;
    let fresh = scored_article(&store, "https://desk.example/btc", "BTC").await;
    store.insert_price(candle("BTCUSDT", 11, 100.0));
    store.insert_price(candle("BTCUSDT", 13, 105.0));
    let aligner = CorrelationAligner::new(store.clone());

    let report = aligner.run_batch(2).await.unwrap();
    assert_eq!((report.processed, report.success, report.failed), (2, 0, 2));
    assert!(store.correlation_checked_at(first).is_some());
    assert!(store.correlation_checked_at(fresh).is_none());

    let report = aligner.run_batch(2).await.unwrap();
    assert_eq!((report.processed, report.success, report.failed), (2, 1, 1));
    let rows = store.correlation_rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].article_id, fresh);
}

#[tokio::test]
async fn hung_price_lookup_times_out_as_a_failed_item() {
    let store = Arc::new(MemoryStore::new());
    let id = scored_article(&store, "https://desk.example/slow", "BTC").await;
    store.insert_price(candle("BTCUSDT", 11, 100.0));
    store.insert_price(candle("BTCUSDT", 13, 105.0));
    store.delay_price_lookups(Duration::from_secs(30));

    let aligner =
        CorrelationAligner::new(store.clone()).with_item_timeout(Duration::from_millis(50));
    let report = aligner.run_batch(10).await.unwrap();

    assert_eq!((report.processed, report.success, report.failed), (1, 0, 1));
    assert!(report.errors[0].contains("timed out"));
    assert!(store.correlation_rows().is_empty());
    assert!(store.correlation_checked_at(id).is_some());
}

struct GatedFeeds {
    gate: Notify,
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl FeedReader for GatedFeeds {
    async fn parse_feed(&self, _url: &str, _limit: usize) -> Vec<FeedEntry> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.gate.notified().await;
        Vec::new()
    }
}

#[tokio::test]
async fn overlapping_trigger_is_skipped_not_queued() {
    let store = Arc::new(MemoryStore::new());
    let fetcher = CountingFetcher::new(semantic_page());
    let crawler = Arc::new(orchestrator(&store, &fetcher, None));
    let feeds = Arc::new(GatedFeeds {
        gate: Notify::new(),
        calls: AtomicUsize::new(0),
    });
    let runner = Arc::new(JobRunner::new(
        crawler,
        feeds.clone(),
        registry(),
        Arc::new(SentimentScorer::new(Arc::new(LexiconClassifier::new()), store.clone())),
        Arc::new(CorrelationAligner::new(store.clone())),
        store.clone(),
        JobConfig::default(),
    ));

    let first = tokio::spawn({
        let runner = runner.clone();
        async move { runner.run(JobKind::CrawlAll).await }
    });
    while feeds.calls.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }
    assert!(runner.is_running(JobKind::CrawlAll));

    assert_eq!(runner.run(JobKind::CrawlAll).await.unwrap(), JobRun::Skipped);
    // Other job kinds are not blocked.
    assert!(matches!(
        runner.run(JobKind::Sentiment).await.unwrap(),
        JobRun::Completed(JobOutput::Sentiment(_))
    ));

    feeds.gate.notify_one();
    let finished = first.await.unwrap().unwrap();
    assert!(matches!(finished, JobRun::Completed(JobOutput::CrawlAll(_))));
    assert!(!runner.is_running(JobKind::CrawlAll));

    feeds.gate.notify_one();
    assert!(matches!(
        runner.run(JobKind::CrawlAll).await.unwrap(),
        JobRun::Completed(_)
    ));
    assert_eq!(feeds.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn health_job_reports_cache_and_method_mix() {
    let store = Arc::new(MemoryStore::new());
    let fetcher = CountingFetcher::new(semantic_page());
    let crawler = Arc::new(orchestrator(&store, &fetcher, None));
    crawler
        .crawl(&CrawlRequest::new("https://other.example/h", "other"))
        .await
        .unwrap();

    let runner = JobRunner::new(
        crawler,
        Arc::new(GatedFeeds {
            gate: Notify::new(),
            calls: AtomicUsize::new(0),
        }),
        registry(),
        Arc::new(SentimentScorer::new(Arc::new(LexiconClassifier::new()), store.clone())),
        Arc::new(CorrelationAligner::new(store.clone())),
        store.clone(),
        JobConfig::default(),
    );

    let JobRun::Completed(JobOutput::Health(health)) = runner.run(JobKind::Health).await.unwrap()
    else {
        panic!("health job did not complete");
    };
    assert_eq!(health.sources.len(), 1);
    assert_eq!(health.sources[0].semantic, 1);
    assert!(!health.sources[0].degraded);
    assert_eq!(health.source_cache.len(), 1);
    assert_eq!(health.source_cache[0].0, "other");
}
