use crate::domain::article::ArticleId;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// One OHLCV candle from the market feed. Times are naive UTC, as stored upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceObservation {
    pub symbol: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub open_time: NaiveDateTime,
    pub close_time: NaiveDateTime,
    pub interval: String,
}

/// Values written for one (article, symbol) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationUpsert {
    pub article_id: ArticleId,
    pub symbol: String,
    pub price_before: f64,
    pub price_after: f64,
    pub price_change_pct: f64,
    pub sentiment_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correlation {
    pub id: uuid::Uuid,
    pub article_id: ArticleId,
    pub symbol: String,
    pub price_before: f64,
    pub price_after: f64,
    pub price_change_pct: f64,
    pub sentiment_score: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationResult {
    pub article_id: ArticleId,
    pub correlations: Vec<CorrelationUpsert>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SentimentStats {
    pub symbol: Option<String>,
    pub total_articles: i64,
    pub analyzed_articles: i64,
    pub average_sentiment: Option<f64>,
    pub positive_count: i64,
    pub negative_count: i64,
    pub neutral_count: i64,
}
