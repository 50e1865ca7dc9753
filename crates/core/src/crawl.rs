//! The parsing cascade: fetch once, then rule → semantic → AI, first success wins.

use crate::domain::{ArticleDraft, ArticleId, ExtractionMethod};
use crate::extract::{AiExtractor, RuleExtractor, SemanticExtractor, SourceRegistry};
use crate::fetch::HtmlFetcher;
use crate::storage::{InsertOutcome, Store};
use chrono::{DateTime, Utc};
use futures::{future, stream, StreamExt};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlRequest {
    pub url: String,
    pub source: String,
    /// Skip the local extractors and go straight to the model.
    pub force_ai: bool,
    pub rendered: bool,
}

impl CrawlRequest {
    pub fn new(url: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            source: source.into(),
            force_ai: false,
            rendered: false,
        }
    }

    pub fn force_ai(mut self, force: bool) -> Self {
        self.force_ai = force;
        self
    }

    pub fn rendered(mut self, rendered: bool) -> Self {
        self.rendered = rendered;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CrawlFailure {
    Fetch(String),
    AllParsersFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CrawlOutcome {
    Done {
        article_id: ArticleId,
        method: ExtractionMethod,
    },
    /// The URL was already stored; nothing was fetched or written.
    Skipped {
        article_id: ArticleId,
        method: ExtractionMethod,
    },
    Failed(CrawlFailure),
}

impl CrawlOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            CrawlOutcome::Done { .. } => "success",
            CrawlOutcome::Skipped { .. } => "skipped",
            CrawlOutcome::Failed(_) => "failed",
        }
    }

    pub fn article_id(&self) -> Option<ArticleId> {
        match self {
            CrawlOutcome::Done { article_id, .. } | CrawlOutcome::Skipped { article_id, .. } => {
                Some(*article_id)
            }
            CrawlOutcome::Failed(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SourceCacheEntry {
    pub method: ExtractionMethod,
    pub last_success: DateTime<Utc>,
}

/// Last successful extraction method per source. Advisory only; lost on restart.
#[derive(Debug, Default)]
pub struct SourceCache {
    entries: RwLock<HashMap<String, SourceCacheEntry>>,
}

impl SourceCache {
    pub fn hint(&self, source: &str) -> Option<SourceCacheEntry> {
        self.entries.read().get(source).copied()
    }

    pub fn record(&self, source: &str, method: ExtractionMethod) {
        self.entries.write().insert(
            source.to_string(),
            SourceCacheEntry {
                method,
                last_success: Utc::now(),
            },
        );
    }

    pub fn snapshot(&self) -> Vec<(String, SourceCacheEntry)> {
        let mut out: Vec<_> = self
            .entries
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrawlDetail {
    pub url: String,
    pub status: &'static str,
    pub article_id: Option<ArticleId>,
    pub method: Option<ExtractionMethod>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CrawlReport {
    pub total: usize,
    pub success: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Set when a shutdown signal stopped the run before every URL was attempted.
    pub interrupted: bool,
    pub details: Vec<CrawlDetail>,
}

impl CrawlReport {
    fn push(&mut self, detail: CrawlDetail) {
        match detail.status {
            "success" => self.success += 1,
            "skipped" => self.skipped += 1,
            _ => self.failed += 1,
        }
        self.details.push(detail);
    }
}

pub struct CrawlOrchestrator {
    store: Arc<dyn Store>,
    fetcher: Arc<dyn HtmlFetcher>,
    rule: RuleExtractor,
    semantic: SemanticExtractor,
    ai: Option<AiExtractor>,
    ai_fallback: bool,
    item_timeout: Duration,
    cache: SourceCache,
}

impl CrawlOrchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        fetcher: Arc<dyn HtmlFetcher>,
        registry: Arc<SourceRegistry>,
    ) -> Self {
        Self {
            rule: RuleExtractor::new(registry, fetcher.clone()),
            semantic: SemanticExtractor::new(),
            store,
            fetcher,
            ai: None,
            ai_fallback: false,
            item_timeout: Duration::from_secs(90),
            cache: SourceCache::default(),
        }
    }

    /// Enables the model extractor. `fallback` controls whether it runs after the local
    /// extractors fail; forced-AI requests use it either way.
    pub fn with_ai(mut self, ai: AiExtractor, fallback: bool) -> Self {
        self.ai = Some(ai);
        self.ai_fallback = fallback;
        self
    }

    pub fn with_item_timeout(mut self, timeout: Duration) -> Self {
        self.item_timeout = timeout;
        self
    }

    pub fn source_cache(&self) -> &SourceCache {
        &self.cache
    }

    /// Runs one crawl attempt. Only store failures are errors; everything else is an outcome.
    #[tracing::instrument(level = "info", skip(self, req), fields(url = %req.url, source = %req.source))]
    pub async fn crawl(&self, req: &CrawlRequest) -> anyhow::Result<CrawlOutcome> {
        if let Some(existing) = self.store.article_by_url(&req.url).await? {
            tracing::info!(article_id = existing.id, "URL already crawled");
            return Ok(CrawlOutcome::Skipped {
                article_id: existing.id,
                method: existing.parse_method,
            });
        }

        let html = match self.fetcher.fetch(&req.url, req.rendered).await {
            Ok(html) => html,
            Err(err) => {
                tracing::warn!(error = %err, "fetch failed");
                return Ok(CrawlOutcome::Failed(CrawlFailure::Fetch(err.to_string())));
            }
        };

        let Some(draft) = self.extract(req, &html).await else {
            tracing::error!("all parsers failed");
            return Ok(CrawlOutcome::Failed(CrawlFailure::AllParsersFailed));
        };

        let method = draft.method;
        match self.store.insert_article(&draft).await? {
            InsertOutcome::Inserted(article_id) => {
                self.cache.record(&req.source, method);
                tracing::info!(article_id, %method, title = %preview(&draft.title), "saved article");
                Ok(CrawlOutcome::Done { article_id, method })
            }
            InsertOutcome::Duplicate(article_id) => {
                tracing::info!(article_id, "URL stored concurrently; skipping");
                Ok(CrawlOutcome::Skipped { article_id, method })
            }
        }
    }

    async fn extract(&self, req: &CrawlRequest, html: &str) -> Option<ArticleDraft> {
        if !req.force_ai {
            if let Some(hint) = self.cache.hint(&req.source) {
                tracing::debug!(last_method = %hint.method, last_success = %hint.last_success, "source cache hint");
            }

            if self.rule.supports(&req.source) {
                match self.rule.extract_html(html, &req.url, &req.source) {
                    Ok(draft) => return Some(draft),
                    Err(err) => tracing::info!(error = %err, "rule extraction failed"),
                }
            }

            if let Some(draft) = self.semantic.extract(html, &req.url, &req.source) {
                tracing::info!("semantic extraction succeeded");
                return Some(draft);
            }
            tracing::info!("semantic extraction found no article");
        }

        if !(req.force_ai || self.ai_fallback) {
            return None;
        }
        let Some(ai) = &self.ai else {
            tracing::warn!("AI extraction wanted but no model is configured");
            return None;
        };
        match ai.extract(html, &req.url, &req.source).await {
            Ok(draft) => Some(draft),
            Err(err) => {
                tracing::warn!(error = %err, "AI extraction failed");
                None
            }
        }
    }

    /// Crawls URLs for one source in order.
    pub async fn crawl_batch(&self, urls: &[String], source: &str) -> CrawlReport {
        let requests = urls
            .iter()
            .map(|u| CrawlRequest::new(u.clone(), source))
            .collect();
        let report = self.crawl_many(requests, 1, None).await;
        tracing::info!(
            source,
            success = report.success,
            total = report.total,
            "batch crawl complete"
        );
        report
    }

    /// Crawls with up to `concurrency` requests in flight, each bounded by the item timeout.
    /// Stops pulling new URLs once `shutdown` flips to true.
    pub async fn crawl_many(
        &self,
        requests: Vec<CrawlRequest>,
        concurrency: usize,
        shutdown: Option<watch::Receiver<bool>>,
    ) -> CrawlReport {
        let total = requests.len();
        let stop_requested = || shutdown.as_ref().is_some_and(|rx| *rx.borrow());

        let details: Vec<CrawlDetail> = stream::iter(requests)
            .take_while(|_| future::ready(!stop_requested()))
            .map(|req| self.crawl_with_timeout(req))
            .buffered(concurrency.max(1))
            .collect()
            .await;

        let mut report = CrawlReport {
            total,
            interrupted: details.len() < total,
            ..CrawlReport::default()
        };
        for detail in details {
            report.push(detail);
        }
        report
    }

    async fn crawl_with_timeout(&self, req: CrawlRequest) -> CrawlDetail {
        let result = tokio::time::timeout(self.item_timeout, self.crawl(&req)).await;
        let (status, article_id, method, error) = match result {
            Ok(Ok(outcome)) => {
                let method = match &outcome {
                    CrawlOutcome::Done { method, .. } | CrawlOutcome::Skipped { method, .. } => {
                        Some(*method)
                    }
                    CrawlOutcome::Failed(_) => None,
                };
                let error = match &outcome {
                    CrawlOutcome::Failed(CrawlFailure::Fetch(e)) => Some(e.clone()),
                    CrawlOutcome::Failed(CrawlFailure::AllParsersFailed) => {
                        Some("all parsers failed".to_string())
                    }
                    _ => None,
                };
                (outcome.status(), outcome.article_id(), method, error)
            }
            Ok(Err(err)) => {
                tracing::error!(url = %req.url, error = %format!("{err:#}"), "crawl failed");
                ("failed", None, None, Some(format!("{err:#}")))
            }
            Err(_) => {
                tracing::warn!(url = %req.url, timeout_secs = self.item_timeout.as_secs(), "crawl timed out");
                ("failed", None, None, Some("timed out".to_string()))
            }
        };
        CrawlDetail {
            url: req.url,
            status,
            article_id,
            method,
            error,
        }
    }
}

fn preview(s: &str) -> String {
    s.chars().take(50).collect()
}
