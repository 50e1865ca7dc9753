//! Aligns scored articles with the hourly price series around their publish time.

use crate::domain::{ArticleId, Correlation, CorrelationResult, CorrelationUpsert, SentimentStats};
use crate::sentiment::BatchReport;
use crate::storage::{PriceSide, Store};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Quote assets a symbol may already carry.
const KNOWN_QUOTES: &[&str] = &["USDT", "USDC", "BUSD", "BTC", "ETH"];

/// `BTC` -> `BTCUSDT`; symbols that already end in a known quote asset are kept.
pub fn trading_pair(symbol: &str, quote: &str) -> String {
    let symbol = symbol.trim().to_ascii_uppercase();
    let already_pair = KNOWN_QUOTES
        .iter()
        .any(|q| symbol.len() > q.len() && symbol.ends_with(q));
    if already_pair {
        symbol
    } else {
        format!("{symbol}{quote}")
    }
}

/// Percent change rounded to 4 places; `None` when `before` is zero.
pub fn price_change_pct(before: f64, after: f64) -> Option<f64> {
    if before == 0.0 {
        return None;
    }
    Some(crate::round4((after - before) / before * 100.0))
}

pub struct CorrelationAligner {
    store: Arc<dyn Store>,
    quote_asset: String,
    interval: String,
    item_timeout: Duration,
}

impl CorrelationAligner {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            quote_asset: "USDT".to_string(),
            interval: "1h".to_string(),
            item_timeout: Duration::from_secs(90),
        }
    }

    pub fn with_quote_asset(mut self, quote: impl Into<String>) -> Self {
        self.quote_asset = quote.into().to_ascii_uppercase();
        self
    }

    pub fn with_interval(mut self, interval: impl Into<String>) -> Self {
        self.interval = interval.into();
        self
    }

    pub fn with_item_timeout(mut self, timeout: Duration) -> Self {
        self.item_timeout = timeout;
        self
    }

    /// Correlates every symbol of one article. `None` when the article is missing or lacks a
    /// publish time, symbols or a sentiment score. Symbols without prices on both sides are skipped.
    /// The article's rows are written together or not at all.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn align(&self, id: ArticleId) -> anyhow::Result<Option<CorrelationResult>> {
        let Some(article) = self.store.article(id).await? else {
            return Ok(None);
        };
        let Some(published_at) = article.published_at else {
            return Ok(None);
        };
        let symbols = article.symbols();
        if symbols.is_empty() {
            return Ok(None);
        }
        let Some(sentiment_score) = article.sentiment_score else {
            tracing::warn!("article has no sentiment score yet");
            return Ok(None);
        };

        // Candle times are stored as naive UTC.
        let at = published_at.naive_utc();
        let mut correlations = Vec::new();
        for symbol in symbols {
            let pair = trading_pair(&symbol, &self.quote_asset);
            let before = self
                .store
                .nearest_price(&pair, &self.interval, at, PriceSide::AtOrBefore)
                .await?;
            let after = self
                .store
                .nearest_price(&pair, &self.interval, at, PriceSide::AtOrAfter)
                .await?;
            let (Some(before), Some(after)) = (before, after) else {
                tracing::debug!(%pair, "no price data around publish time");
                continue;
            };
            let Some(change) = price_change_pct(before.close, after.close) else {
                tracing::debug!(%pair, "zero price before publish time");
                continue;
            };

            correlations.push(CorrelationUpsert {
                article_id: id,
                symbol,
                price_before: before.close,
                price_after: after.close,
                price_change_pct: change,
                sentiment_score,
            });
        }
        if !correlations.is_empty() {
            self.store.upsert_correlations(&correlations).await?;
        }

        Ok(Some(CorrelationResult {
            article_id: id,
            correlations,
        }))
    }

    pub async fn run_batch(&self, limit: usize) -> anyhow::Result<BatchReport> {
        self.run_batch_until(limit, None).await
    }

    /// Aligns scored articles that have no correlation row yet. An article counts as a success
    /// when at least one symbol correlated; anything else (including missing prices) is a failure
    /// and is stamped as attempted so it yields to articles not yet tried.
    #[tracing::instrument(level = "info", skip(self, shutdown))]
    pub async fn run_batch_until(
        &self,
        limit: usize,
        shutdown: Option<watch::Receiver<bool>>,
    ) -> anyhow::Result<BatchReport> {
        let pending = self.store.pending_correlation(limit).await?;
        let mut report = BatchReport {
            processed: pending.len(),
            ..BatchReport::default()
        };
        if pending.is_empty() {
            return Ok(report);
        }
        tracing::info!(count = pending.len(), "processing correlations");

        for article in &pending {
            if shutdown.as_ref().is_some_and(|rx| *rx.borrow()) {
                tracing::info!("shutdown requested; stopping correlation batch");
                break;
            }
            let outcome = tokio::time::timeout(self.item_timeout, self.align(article.id)).await;
            match outcome {
                Ok(Ok(Some(result))) if !result.correlations.is_empty() => {
                    report.success += 1;
                    continue;
                }
                Ok(Ok(_)) => report.push_error(article.id, "no price data for any symbol"),
                Ok(Err(err)) => {
                    let msg = format!("{err:#}");
                    tracing::error!(article_id = article.id, error = %msg, "correlation failed");
                    report.push_error(article.id, &msg);
                }
                Err(_) => {
                    tracing::warn!(article_id = article.id, "correlation timed out");
                    report.push_error(article.id, "timed out");
                }
            }
            if let Err(err) = self
                .store
                .mark_correlation_checked(article.id, chrono::Utc::now())
                .await
            {
                tracing::warn!(article_id = article.id, error = %format!("{err:#}"), "failed to record correlation attempt");
            }
        }

        tracing::info!(
            processed = report.processed,
            success = report.success,
            failed = report.failed,
            "correlation batch complete"
        );
        Ok(report)
    }

    pub async fn correlations(
        &self,
        symbol: Option<&str>,
        limit: usize,
    ) -> anyhow::Result<Vec<Correlation>> {
        self.store.correlations(symbol, limit).await
    }

    pub async fn sentiment_stats(&self, symbol: Option<&str>) -> anyhow::Result<SentimentStats> {
        self.store.sentiment_stats(symbol).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trading_pair_appends_quote_unless_already_paired() {
        assert_eq!(trading_pair("btc", "USDT"), "BTCUSDT");
        assert_eq!(trading_pair("ETHBTC", "USDT"), "ETHBTC");
        assert_eq!(trading_pair("SOLUSDC", "USDT"), "SOLUSDC");
        assert_eq!(trading_pair("BTCUSDT", "USDT"), "BTCUSDT");
        // A bare quote asset is a base symbol, not a pair.
        assert_eq!(trading_pair("ETH", "USDT"), "ETHUSDT");
        assert_eq!(trading_pair("BTC", "USDT"), "BTCUSDT");
    }

    #[test]
    fn price_change_is_rounded_and_guards_zero() {
        assert_eq!(price_change_pct(100.0, 105.0), Some(5.0));
        assert_eq!(price_change_pct(3.0, 4.0), Some(33.3333));
        assert_eq!(price_change_pct(200.0, 150.0), Some(-25.0));
        assert_eq!(price_change_pct(0.0, 10.0), None);
    }
}
