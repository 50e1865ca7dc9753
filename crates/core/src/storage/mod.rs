pub mod lock;
pub mod memory;
pub mod postgres;

use crate::domain::{
    Article, ArticleDraft, ArticleId, Correlation, CorrelationUpsert, ExtractionMethod,
    PriceObservation, SentimentStats, SentimentUpdate, UsageRecord,
};
use anyhow::Context;
use chrono::{DateTime, NaiveDateTime, Utc};

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub async fn migrate(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("sqlx migrations failed")?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(ArticleId),
    /// Another writer stored the same URL first.
    Duplicate(ArticleId),
}

impl InsertOutcome {
    pub fn id(&self) -> ArticleId {
        match self {
            InsertOutcome::Inserted(id) | InsertOutcome::Duplicate(id) => *id,
        }
    }
}

/// Articles per (source, extraction method) in a time window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodCount {
    pub source: String,
    pub method: ExtractionMethod,
    pub count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceSide {
    /// Latest candle closing at or before the instant.
    AtOrBefore,
    /// Earliest candle closing at or after the instant.
    AtOrAfter,
}

#[async_trait::async_trait]
pub trait Store: Send + Sync {
    async fn article_by_url(&self, url: &str) -> anyhow::Result<Option<Article>>;

    async fn article(&self, id: ArticleId) -> anyhow::Result<Option<Article>>;

    /// Inserts a new valid article keyed on URL. A URL conflict is not an error.
    async fn insert_article(&self, draft: &ArticleDraft) -> anyhow::Result<InsertOutcome>;

    /// Valid articles without a sentiment score, oldest first.
    async fn pending_sentiment(&self, limit: usize) -> anyhow::Result<Vec<Article>>;

    /// Returns false when the article does not exist.
    async fn update_sentiment(&self, update: &SentimentUpdate) -> anyhow::Result<bool>;

    /// Writes all updates in one transaction.
    async fn apply_sentiment_batch(&self, updates: &[SentimentUpdate]) -> anyhow::Result<u64>;

    /// Scored articles with symbols and a publish time that have no correlation row yet.
    /// Never-attempted articles come first, then the least recently attempted.
    async fn pending_correlation(&self, limit: usize) -> anyhow::Result<Vec<Article>>;

    /// Records that correlating `id` was attempted at `at`.
    async fn mark_correlation_checked(
        &self,
        id: ArticleId,
        at: DateTime<Utc>,
    ) -> anyhow::Result<()>;

    async fn nearest_price(
        &self,
        symbol: &str,
        interval: &str,
        at: NaiveDateTime,
        side: PriceSide,
    ) -> anyhow::Result<Option<PriceObservation>>;

    /// Inserts or updates the row for each `(article_id, symbol)`. All rows are written or none.
    async fn upsert_correlations(&self, rows: &[CorrelationUpsert]) -> anyhow::Result<()>;

    async fn correlations(
        &self,
        symbol: Option<&str>,
        limit: usize,
    ) -> anyhow::Result<Vec<Correlation>>;

    async fn sentiment_stats(&self, symbol: Option<&str>) -> anyhow::Result<SentimentStats>;

    async fn record_usage(&self, record: &UsageRecord) -> anyhow::Result<()>;

    async fn method_counts_since(&self, since: DateTime<Utc>) -> anyhow::Result<Vec<MethodCount>>;
}

/// Mean of the scores rounded to 4 decimals, `None` when empty.
pub(crate) fn average_score(scores: &[f64]) -> Option<f64> {
    if scores.is_empty() {
        return None;
    }
    let avg = scores.iter().sum::<f64>() / scores.len() as f64;
    Some(crate::round4(avg))
}
