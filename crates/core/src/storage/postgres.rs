use crate::domain::{
    Article, ArticleDraft, ArticleId, Correlation, CorrelationUpsert, ExtractionMethod,
    PriceObservation, SentimentLabel, SentimentStats, SentimentUpdate, UsageRecord,
};
use crate::round4;
use crate::storage::{InsertOutcome, MethodCount, PriceSide, Store};
use anyhow::Context;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::postgres::PgPoolOptions;

const ARTICLE_COLUMNS: &str = "id, url, source, title, content, summary, author, published_at, \
     sentiment_score, sentiment_label, related_symbols, parse_method, is_valid, crawled_at";

const CORRELATION_COLUMNS: &str = "id, news_id, symbol, price_before::float8 AS price_before, \
     price_after::float8 AS price_after, price_change_pct::float8 AS price_change_pct, \
     sentiment_score, created_at";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: sqlx::PgPool,
}

impl PgStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("connect DATABASE_URL failed")?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &sqlx::PgPool {
        &self.pool
    }

    async fn select_articles(&self, sql: &str, limit: usize) -> anyhow::Result<Vec<Article>> {
        let rows: Vec<ArticleRow> = sqlx::query_as(sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .context("select news failed")?;
        rows.into_iter().map(ArticleRow::into_article).collect()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ArticleRow {
    id: i64,
    url: String,
    source: String,
    title: String,
    content: String,
    summary: Option<String>,
    author: Option<String>,
    published_at: Option<DateTime<Utc>>,
    sentiment_score: Option<f64>,
    sentiment_label: Option<String>,
    related_symbols: Option<String>,
    parse_method: String,
    is_valid: bool,
    crawled_at: DateTime<Utc>,
}

impl ArticleRow {
    fn into_article(self) -> anyhow::Result<Article> {
        let sentiment_label = self
            .sentiment_label
            .as_deref()
            .map(str::parse::<SentimentLabel>)
            .transpose()
            .with_context(|| format!("news {} has an invalid sentiment_label", self.id))?;
        let parse_method = self
            .parse_method
            .parse::<ExtractionMethod>()
            .with_context(|| format!("news {} has an invalid parse_method", self.id))?;

        Ok(Article {
            id: self.id,
            url: self.url,
            source: self.source,
            title: self.title,
            content: self.content,
            summary: self.summary,
            author: self.author,
            published_at: self.published_at,
            sentiment_score: self.sentiment_score,
            sentiment_label,
            related_symbols: self.related_symbols,
            parse_method,
            is_valid: self.is_valid,
            crawled_at: self.crawled_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PriceRow {
    symbol: String,
    open_price: Option<f64>,
    high_price: Option<f64>,
    low_price: Option<f64>,
    close_price: f64,
    volume: Option<f64>,
    open_time: NaiveDateTime,
    close_time: NaiveDateTime,
    interval: String,
}

#[derive(Debug, sqlx::FromRow)]
struct CorrelationRow {
    id: uuid::Uuid,
    news_id: i64,
    symbol: String,
    price_before: Option<f64>,
    price_after: Option<f64>,
    price_change_pct: Option<f64>,
    sentiment_score: Option<f64>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct StatsRow {
    total: i64,
    analyzed: i64,
    average: Option<f64>,
    positive: i64,
    negative: i64,
    neutral: i64,
}

fn clip(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[async_trait::async_trait]
impl Store for PgStore {
    async fn article_by_url(&self, url: &str) -> anyhow::Result<Option<Article>> {
        let row: Option<ArticleRow> =
            sqlx::query_as(&format!("SELECT {ARTICLE_COLUMNS} FROM news WHERE url = $1"))
                .bind(url)
                .fetch_optional(&self.pool)
                .await
                .context("select news by url failed")?;
        row.map(ArticleRow::into_article).transpose()
    }

    async fn article(&self, id: ArticleId) -> anyhow::Result<Option<Article>> {
        let row: Option<ArticleRow> =
            sqlx::query_as(&format!("SELECT {ARTICLE_COLUMNS} FROM news WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .context("select news by id failed")?;
        row.map(ArticleRow::into_article).transpose()
    }

    async fn insert_article(&self, draft: &ArticleDraft) -> anyhow::Result<InsertOutcome> {
        let inserted: Option<i64> = sqlx::query_scalar(
            "INSERT INTO news (title, content, summary, url, source, author, published_at, related_symbols, parse_method, is_valid) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, TRUE) \
             ON CONFLICT (url) DO NOTHING \
             RETURNING id",
        )
        .bind(clip(&draft.title, 500))
        .bind(&draft.content)
        .bind(&draft.summary)
        .bind(&draft.url)
        .bind(clip(&draft.source, 100))
        .bind(draft.author.as_deref().map(|a| clip(a, 200)))
        .bind(draft.published_at)
        .bind(draft.related_symbols.as_deref().map(|s| clip(s, 200)))
        .bind(draft.method.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("insert news failed")?;

        if let Some(id) = inserted {
            return Ok(InsertOutcome::Inserted(id));
        }

        let existing: i64 = sqlx::query_scalar("SELECT id FROM news WHERE url = $1")
            .bind(&draft.url)
            .fetch_one(&self.pool)
            .await
            .context("select conflicting news id failed")?;
        Ok(InsertOutcome::Duplicate(existing))
    }

    async fn pending_sentiment(&self, limit: usize) -> anyhow::Result<Vec<Article>> {
        self.select_articles(
            &format!(
                "SELECT {ARTICLE_COLUMNS} FROM news \
                 WHERE sentiment_score IS NULL AND is_valid \
                 ORDER BY id LIMIT $1"
            ),
            limit,
        )
        .await
    }

    async fn update_sentiment(&self, update: &SentimentUpdate) -> anyhow::Result<bool> {
        let res = sqlx::query(
            "UPDATE news SET sentiment_score = $1, sentiment_label = $2, updated_at = now() WHERE id = $3",
        )
        .bind(update.score)
        .bind(update.label.as_str())
        .bind(update.article_id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("update sentiment for news {} failed", update.article_id))?;
        Ok(res.rows_affected() > 0)
    }

    async fn apply_sentiment_batch(&self, updates: &[SentimentUpdate]) -> anyhow::Result<u64> {
        let mut tx = self.pool.begin().await.context("begin transaction failed")?;
        let mut written = 0;
        for update in updates {
            let res = sqlx::query(
                "UPDATE news SET sentiment_score = $1, sentiment_label = $2, updated_at = now() WHERE id = $3",
            )
            .bind(update.score)
            .bind(update.label.as_str())
            .bind(update.article_id)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("update sentiment for news {} failed", update.article_id))?;
            written += res.rows_affected();
        }
        tx.commit().await.context("commit transaction failed")?;
        Ok(written)
    }

    async fn pending_correlation(&self, limit: usize) -> anyhow::Result<Vec<Article>> {
        self.select_articles(
            &format!(
                "SELECT {ARTICLE_COLUMNS} FROM news n \
                 WHERE n.sentiment_score IS NOT NULL \
                   AND n.published_at IS NOT NULL \
                   AND n.related_symbols IS NOT NULL AND btrim(n.related_symbols) <> '' \
                   AND NOT EXISTS (SELECT 1 FROM news_price_correlation c WHERE c.news_id = n.id) \
                 ORDER BY n.correlation_checked_at NULLS FIRST, n.id LIMIT $1"
            ),
            limit,
        )
        .await
    }

    async fn mark_correlation_checked(
        &self,
        id: ArticleId,
        at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        sqlx::query("UPDATE news SET correlation_checked_at = $1 WHERE id = $2")
            .bind(at)
            .bind(id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("mark correlation attempt for news {id} failed"))?;
        Ok(())
    }

    async fn nearest_price(
        &self,
        symbol: &str,
        interval: &str,
        at: NaiveDateTime,
        side: PriceSide,
    ) -> anyhow::Result<Option<PriceObservation>> {
        let (cmp, order) = match side {
            PriceSide::AtOrBefore => ("<=", "DESC"),
            PriceSide::AtOrAfter => (">=", "ASC"),
        };
        let sql = format!(
            "SELECT symbol, open_price::float8 AS open_price, high_price::float8 AS high_price, \
                    low_price::float8 AS low_price, close_price::float8 AS close_price, \
                    volume::float8 AS volume, open_time, close_time, \"interval\" \
             FROM klines \
             WHERE symbol = $1 AND \"interval\" = $2 AND close_time {cmp} $3 AND close_price IS NOT NULL \
             ORDER BY close_time {order} LIMIT 1"
        );
        let row: Option<PriceRow> = sqlx::query_as(&sql)
            .bind(symbol)
            .bind(interval)
            .bind(at)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("select klines for {symbol} failed"))?;

        Ok(row.map(|r| PriceObservation {
            symbol: r.symbol,
            open: r.open_price.unwrap_or_default(),
            high: r.high_price.unwrap_or_default(),
            low: r.low_price.unwrap_or_default(),
            close: r.close_price,
            volume: r.volume.unwrap_or_default(),
            open_time: r.open_time,
            close_time: r.close_time,
            interval: r.interval,
        }))
    }

    async fn upsert_correlations(&self, rows: &[CorrelationUpsert]) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await.context("begin transaction failed")?;
        for row in rows {
            sqlx::query(
                "INSERT INTO news_price_correlation (id, news_id, symbol, price_before, price_after, price_change_pct, sentiment_score) \
                 VALUES ($1, $2, $3, $4::numeric, $5::numeric, $6::numeric, $7) \
                 ON CONFLICT (news_id, symbol) DO UPDATE SET \
                   price_before = EXCLUDED.price_before, \
                   price_after = EXCLUDED.price_after, \
                   price_change_pct = EXCLUDED.price_change_pct, \
                   sentiment_score = EXCLUDED.sentiment_score",
            )
            .bind(uuid::Uuid::new_v4())
            .bind(row.article_id)
            .bind(&row.symbol)
            .bind(row.price_before)
            .bind(row.price_after)
            .bind(row.price_change_pct)
            .bind(row.sentiment_score)
            .execute(&mut *tx)
            .await
            .with_context(|| {
                format!(
                    "upsert news_price_correlation failed (news_id={}, symbol={})",
                    row.article_id, row.symbol
                )
            })?;
        }
        tx.commit().await.context("commit transaction failed")?;
        Ok(())
    }

    async fn correlations(
        &self,
        symbol: Option<&str>,
        limit: usize,
    ) -> anyhow::Result<Vec<Correlation>> {
        let rows: Vec<CorrelationRow> = sqlx::query_as(&format!(
            "SELECT {CORRELATION_COLUMNS} FROM news_price_correlation \
             WHERE ($1::text IS NULL OR symbol = $1) \
             ORDER BY created_at DESC LIMIT $2"
        ))
        .bind(symbol.map(|s| s.trim().to_ascii_uppercase()))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("select news_price_correlation failed")?;

        Ok(rows
            .into_iter()
            .map(|r| Correlation {
                id: r.id,
                article_id: r.news_id,
                symbol: r.symbol,
                price_before: r.price_before.unwrap_or_default(),
                price_after: r.price_after.unwrap_or_default(),
                price_change_pct: r.price_change_pct.unwrap_or_default(),
                sentiment_score: r.sentiment_score.unwrap_or_default(),
                created_at: r.created_at,
            })
            .collect())
    }

    async fn sentiment_stats(&self, symbol: Option<&str>) -> anyhow::Result<SentimentStats> {
        let row: StatsRow = sqlx::query_as(
            "SELECT COUNT(*) AS total, \
                    COUNT(sentiment_score) AS analyzed, \
                    AVG(sentiment_score) AS average, \
                    COUNT(*) FILTER (WHERE sentiment_label = 'positive') AS positive, \
                    COUNT(*) FILTER (WHERE sentiment_label = 'negative') AS negative, \
                    COUNT(*) FILTER (WHERE sentiment_label = 'neutral') AS neutral \
             FROM news \
             WHERE ($1::text IS NULL OR related_symbols ILIKE '%' || $1 || '%')",
        )
        .bind(symbol)
        .fetch_one(&self.pool)
        .await
        .context("select sentiment stats failed")?;

        Ok(SentimentStats {
            symbol: symbol.map(str::to_string),
            total_articles: row.total,
            analyzed_articles: row.analyzed,
            average_sentiment: row.average.map(round4),
            positive_count: row.positive,
            negative_count: row.negative,
            neutral_count: row.neutral,
        })
    }

    async fn record_usage(&self, record: &UsageRecord) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO gemini_usage (id, endpoint, model_name, prompt_tokens, completion_tokens, total_tokens, status, error_message, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(record.id)
        .bind(&record.endpoint)
        .bind(&record.model_name)
        .bind(record.usage.map(|u| u.prompt_tokens))
        .bind(record.usage.map(|u| u.completion_tokens))
        .bind(record.usage.map(|u| u.total_tokens))
        .bind(record.status.as_str())
        .bind(&record.error_message)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .context("insert gemini_usage failed")?;
        Ok(())
    }

    async fn method_counts_since(&self, since: DateTime<Utc>) -> anyhow::Result<Vec<MethodCount>> {
        let rows: Vec<(String, String, i64)> = sqlx::query_as(
            "SELECT source, parse_method, COUNT(*) FROM news \
             WHERE crawled_at >= $1 \
             GROUP BY source, parse_method \
             ORDER BY source, parse_method",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .context("select parse method counts failed")?;

        Ok(rows
            .into_iter()
            .filter_map(|(source, method, count)| match method.parse::<ExtractionMethod>() {
                Ok(method) => Some(MethodCount {
                    source,
                    method,
                    count,
                }),
                Err(_) => {
                    tracing::warn!(%source, %method, "ignoring unknown parse_method");
                    None
                }
            })
            .collect())
    }
}
