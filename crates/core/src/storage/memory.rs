use crate::domain::{
    Article, ArticleDraft, ArticleId, Correlation, CorrelationUpsert, PriceObservation,
    SentimentLabel, SentimentStats, SentimentUpdate, UsageRecord,
};
use crate::storage::{average_score, InsertOutcome, MethodCount, PriceSide, Store};
use chrono::{DateTime, NaiveDateTime, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// In-process store with the same semantics as [`PgStore`](crate::storage::PgStore).
/// Used by dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    unavailable: AtomicBool,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: ArticleId,
    articles: BTreeMap<ArticleId, Article>,
    correlations: Vec<Correlation>,
    correlation_checked: BTreeMap<ArticleId, DateTime<Utc>>,
    prices: Vec<PriceObservation>,
    usage: Vec<UsageRecord>,
    faults: Faults,
}

/// Failures injected by tests.
#[derive(Debug, Default)]
struct Faults {
    article_inserts: bool,
    correlation_symbol: Option<String>,
    price_delay: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_price(&self, price: PriceObservation) {
        self.inner.lock().prices.push(price);
    }

    pub fn articles(&self) -> Vec<Article> {
        self.inner.lock().articles.values().cloned().collect()
    }

    pub fn correlation_rows(&self) -> Vec<Correlation> {
        self.inner.lock().correlations.clone()
    }

    pub fn usage_records(&self) -> Vec<UsageRecord> {
        self.inner.lock().usage.clone()
    }

    /// Overrides `crawled_at`, for tests that need articles outside a time window.
    pub fn set_crawled_at(&self, id: ArticleId, at: DateTime<Utc>) {
        if let Some(a) = self.inner.lock().articles.get_mut(&id) {
            a.crawled_at = at;
        }
    }

    /// Makes every call fail, simulating an unreachable database.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes `insert_article` fail while reads keep working.
    pub fn fail_article_inserts(&self, fail: bool) {
        self.inner.lock().faults.article_inserts = fail;
    }

    /// Makes any correlation write containing `symbol` fail.
    pub fn fail_correlation_writes_for(&self, symbol: Option<&str>) {
        self.inner.lock().faults.correlation_symbol = symbol.map(str::to_string);
    }

    /// Stalls every price lookup, simulating a hung query.
    pub fn delay_price_lookups(&self, delay: Duration) {
        self.inner.lock().faults.price_delay = Some(delay);
    }

    pub fn correlation_checked_at(&self, id: ArticleId) -> Option<DateTime<Utc>> {
        self.inner.lock().correlation_checked.get(&id).copied()
    }

    fn check(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.unavailable.load(Ordering::SeqCst),
            "memory store is unavailable"
        );
        Ok(())
    }
}

fn matches_symbol(article: &Article, needle: Option<&str>) -> bool {
    match needle {
        None => true,
        Some(n) => article
            .related_symbols
            .as_deref()
            .is_some_and(|s| s.to_ascii_uppercase().contains(&n.to_ascii_uppercase())),
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn article_by_url(&self, url: &str) -> anyhow::Result<Option<Article>> {
        self.check()?;
        let inner = self.inner.lock();
        Ok(inner.articles.values().find(|a| a.url == url).cloned())
    }

    async fn article(&self, id: ArticleId) -> anyhow::Result<Option<Article>> {
        self.check()?;
        Ok(self.inner.lock().articles.get(&id).cloned())
    }

    async fn insert_article(&self, draft: &ArticleDraft) -> anyhow::Result<InsertOutcome> {
        self.check()?;
        let mut inner = self.inner.lock();
        anyhow::ensure!(!inner.faults.article_inserts, "insert news failed");
        if let Some(existing) = inner.articles.values().find(|a| a.url == draft.url) {
            return Ok(InsertOutcome::Duplicate(existing.id));
        }
        inner.next_id += 1;
        let id = inner.next_id;
        inner.articles.insert(
            id,
            Article {
                id,
                url: draft.url.clone(),
                source: draft.source.clone(),
                title: draft.title.clone(),
                content: draft.content.clone(),
                summary: draft.summary.clone(),
                author: draft.author.clone(),
                published_at: draft.published_at,
                sentiment_score: None,
                sentiment_label: None,
                related_symbols: draft.related_symbols.clone(),
                parse_method: draft.method,
                is_valid: true,
                crawled_at: Utc::now(),
            },
        );
        Ok(InsertOutcome::Inserted(id))
    }

    async fn pending_sentiment(&self, limit: usize) -> anyhow::Result<Vec<Article>> {
        self.check()?;
        let inner = self.inner.lock();
        Ok(inner
            .articles
            .values()
            .filter(|a| a.sentiment_score.is_none() && a.is_valid)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn update_sentiment(&self, update: &SentimentUpdate) -> anyhow::Result<bool> {
        self.check()?;
        let mut inner = self.inner.lock();
        match inner.articles.get_mut(&update.article_id) {
            Some(a) => {
                a.sentiment_score = Some(update.score);
                a.sentiment_label = Some(update.label);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn apply_sentiment_batch(&self, updates: &[SentimentUpdate]) -> anyhow::Result<u64> {
        self.check()?;
        let mut inner = self.inner.lock();
        let mut written = 0;
        for update in updates {
            if let Some(a) = inner.articles.get_mut(&update.article_id) {
                a.sentiment_score = Some(update.score);
                a.sentiment_label = Some(update.label);
                written += 1;
            }
        }
        Ok(written)
    }

    async fn pending_correlation(&self, limit: usize) -> anyhow::Result<Vec<Article>> {
        self.check()?;
        let inner = self.inner.lock();
        let mut pending: Vec<&Article> = inner
            .articles
            .values()
            .filter(|a| {
                a.sentiment_score.is_some()
                    && a.published_at.is_some()
                    && a.related_symbols.as_deref().is_some_and(|s| !s.trim().is_empty())
                    && !inner.correlations.iter().any(|c| c.article_id == a.id)
            })
            .collect();
        // None sorts first: never-attempted articles lead.
        pending.sort_by_key(|a| (inner.correlation_checked.get(&a.id).copied(), a.id));
        Ok(pending.into_iter().take(limit).cloned().collect())
    }

    async fn mark_correlation_checked(
        &self,
        id: ArticleId,
        at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        self.check()?;
        let mut inner = self.inner.lock();
        if inner.articles.contains_key(&id) {
            inner.correlation_checked.insert(id, at);
        }
        Ok(())
    }

    async fn nearest_price(
        &self,
        symbol: &str,
        interval: &str,
        at: NaiveDateTime,
        side: PriceSide,
    ) -> anyhow::Result<Option<PriceObservation>> {
        self.check()?;
        let delay = self.inner.lock().faults.price_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let inner = self.inner.lock();
        let candidates = inner
            .prices
            .iter()
            .filter(|p| p.symbol == symbol && p.interval == interval);
        let found = match side {
            PriceSide::AtOrBefore => candidates
                .filter(|p| p.close_time <= at)
                .max_by_key(|p| p.close_time),
            PriceSide::AtOrAfter => candidates
                .filter(|p| p.close_time >= at)
                .min_by_key(|p| p.close_time),
        };
        Ok(found.cloned())
    }

    async fn upsert_correlations(&self, rows: &[CorrelationUpsert]) -> anyhow::Result<()> {
        self.check()?;
        let mut inner = self.inner.lock();
        if let Some(bad) = &inner.faults.correlation_symbol {
            if let Some(row) = rows.iter().find(|r| &r.symbol == bad) {
                anyhow::bail!(
                    "upsert news_price_correlation failed (news_id={}, symbol={})",
                    row.article_id,
                    row.symbol
                );
            }
        }
        for row in rows {
            match inner
                .correlations
                .iter_mut()
                .find(|c| c.article_id == row.article_id && c.symbol == row.symbol)
            {
                Some(existing) => {
                    existing.price_before = row.price_before;
                    existing.price_after = row.price_after;
                    existing.price_change_pct = row.price_change_pct;
                    existing.sentiment_score = row.sentiment_score;
                }
                None => inner.correlations.push(Correlation {
                    id: uuid::Uuid::new_v4(),
                    article_id: row.article_id,
                    symbol: row.symbol.clone(),
                    price_before: row.price_before,
                    price_after: row.price_after,
                    price_change_pct: row.price_change_pct,
                    sentiment_score: row.sentiment_score,
                    created_at: Utc::now(),
                }),
            }
        }
        Ok(())
    }

    async fn correlations(
        &self,
        symbol: Option<&str>,
        limit: usize,
    ) -> anyhow::Result<Vec<Correlation>> {
        self.check()?;
        let symbol = symbol.map(|s| s.trim().to_ascii_uppercase());
        let inner = self.inner.lock();
        let mut rows: Vec<Correlation> = inner
            .correlations
            .iter()
            .filter(|c| symbol.as_deref().map_or(true, |s| c.symbol == s))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn sentiment_stats(&self, symbol: Option<&str>) -> anyhow::Result<SentimentStats> {
        self.check()?;
        let inner = self.inner.lock();
        let matching: Vec<&Article> = inner
            .articles
            .values()
            .filter(|a| matches_symbol(a, symbol))
            .collect();
        let scored: Vec<&Article> = matching
            .iter()
            .copied()
            .filter(|a| a.sentiment_score.is_some())
            .collect();
        let count = |label: SentimentLabel| {
            scored
                .iter()
                .filter(|a| a.sentiment_label == Some(label))
                .count() as i64
        };
        let scores: Vec<f64> = scored.iter().filter_map(|a| a.sentiment_score).collect();

        Ok(SentimentStats {
            symbol: symbol.map(str::to_string),
            total_articles: matching.len() as i64,
            analyzed_articles: scored.len() as i64,
            average_sentiment: average_score(&scores),
            positive_count: count(SentimentLabel::Positive),
            negative_count: count(SentimentLabel::Negative),
            neutral_count: count(SentimentLabel::Neutral),
        })
    }

    async fn record_usage(&self, record: &UsageRecord) -> anyhow::Result<()> {
        self.check()?;
        self.inner.lock().usage.push(record.clone());
        Ok(())
    }

    async fn method_counts_since(&self, since: DateTime<Utc>) -> anyhow::Result<Vec<MethodCount>> {
        self.check()?;
        let inner = self.inner.lock();
        let mut counts: BTreeMap<(String, &'static str), MethodCount> = BTreeMap::new();
        for a in inner.articles.values().filter(|a| a.crawled_at >= since) {
            counts
                .entry((a.source.clone(), a.parse_method.as_str()))
                .or_insert_with(|| MethodCount {
                    source: a.source.clone(),
                    method: a.parse_method,
                    count: 0,
                })
                .count += 1;
        }
        Ok(counts.into_values().collect())
    }
}
