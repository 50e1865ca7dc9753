//! Sentiment scoring: interchangeable classifiers behind one trait, plus the batch that fills
//! unscored articles.

pub mod generative;
pub mod inference;
pub mod lexicon;

use crate::config::Settings;
use crate::domain::{ArticleId, SentimentLabel, SentimentUpdate};
use crate::llm::TextGenerator;
use crate::storage::Store;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub use generative::GenerativeClassifier;
pub use inference::InferenceClassifier;
pub use lexicon::LexiconClassifier;

const MAX_ERROR_CHARS: usize = 100;
const MAX_REPORTED_ERRORS: usize = 20;

/// A score in [-1, 1] with the label its bucket implies.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SentimentScore {
    pub score: f64,
    pub label: SentimentLabel,
}

impl SentimentScore {
    /// Clamps to [-1, 1], rounds to 4 places and derives the label from the rounded value.
    pub fn from_raw(raw: f64) -> Self {
        let score = crate::round4(raw.clamp(-1.0, 1.0));
        Self {
            score,
            label: SentimentLabel::from_score(score),
        }
    }
}

#[async_trait::async_trait]
pub trait SentimentClassifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn classify(&self, text: &str) -> anyhow::Result<SentimentScore>;
}

/// Tries `primary`, then `fallback` when the primary errors.
pub struct FallbackClassifier {
    primary: Arc<dyn SentimentClassifier>,
    fallback: Arc<dyn SentimentClassifier>,
}

impl FallbackClassifier {
    pub fn new(primary: Arc<dyn SentimentClassifier>, fallback: Arc<dyn SentimentClassifier>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait::async_trait]
impl SentimentClassifier for FallbackClassifier {
    fn name(&self) -> &'static str {
        self.primary.name()
    }

    async fn classify(&self, text: &str) -> anyhow::Result<SentimentScore> {
        match self.primary.classify(text).await {
            Ok(score) => Ok(score),
            Err(err) => {
                tracing::warn!(
                    primary = self.primary.name(),
                    fallback = self.fallback.name(),
                    error = %format!("{err:#}"),
                    "classifier failed; using fallback"
                );
                self.fallback.classify(text).await
            }
        }
    }
}

/// Picks the classifier chain from configuration.
///
/// Local mode uses the inference endpoint when `CLASSIFIER_URL` is set, otherwise the lexicon,
/// and falls back to the generative model when one is available.
pub fn build_classifier(
    settings: &Settings,
    generator: Option<Arc<dyn TextGenerator>>,
    store: Arc<dyn Store>,
) -> anyhow::Result<Arc<dyn SentimentClassifier>> {
    let generative =
        generator.map(|g| Arc::new(GenerativeClassifier::new(g, store)) as Arc<dyn SentimentClassifier>);

    if !settings.use_local_classifier {
        return generative.ok_or_else(|| {
            anyhow::anyhow!("GEMINI_API_KEY is required when USE_LOCAL_CLASSIFIER=false")
        });
    }

    let local: Arc<dyn SentimentClassifier> = match &settings.classifier_url {
        Some(url) => Arc::new(InferenceClassifier::new(
            url.clone(),
            Duration::from_secs(settings.fetch.timeout_secs.max(1)),
        )?),
        None => Arc::new(LexiconClassifier::new()),
    };
    Ok(match generative {
        Some(remote) => Arc::new(FallbackClassifier::new(local, remote)),
        None => local,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub processed: usize,
    pub success: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

impl BatchReport {
    pub(crate) fn push_error(&mut self, id: ArticleId, err: &str) {
        self.failed += 1;
        if self.errors.len() < MAX_REPORTED_ERRORS {
            let msg: String = err.chars().take(MAX_ERROR_CHARS).collect();
            self.errors.push(format!("News {id}: {msg}"));
        }
    }
}

pub struct SentimentScorer {
    classifier: Arc<dyn SentimentClassifier>,
    store: Arc<dyn Store>,
    max_chars: usize,
    item_timeout: Duration,
}

impl SentimentScorer {
    pub fn new(classifier: Arc<dyn SentimentClassifier>, store: Arc<dyn Store>) -> Self {
        Self {
            classifier,
            store,
            max_chars: 2048,
            item_timeout: Duration::from_secs(90),
        }
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars.max(1);
        self
    }

    pub fn with_item_timeout(mut self, timeout: Duration) -> Self {
        self.item_timeout = timeout;
        self
    }

    pub async fn score(&self, text: &str) -> anyhow::Result<SentimentScore> {
        let bounded = crate::extract::truncate_chars(text, self.max_chars);
        let raw = self.classifier.classify(bounded).await?;
        // Re-normalise so every backend satisfies the bucket invariant.
        Ok(SentimentScore::from_raw(raw.score))
    }

    /// Scores one article and stores the result. `None` when the article is missing or empty.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn score_article(&self, id: ArticleId) -> anyhow::Result<Option<SentimentUpdate>> {
        let Some(article) = self.store.article(id).await? else {
            tracing::warn!("article not found");
            return Ok(None);
        };
        let Some(text) = article.analysis_text() else {
            tracing::warn!("article has no text");
            return Ok(None);
        };

        let s = self.score(text).await?;
        let update = SentimentUpdate {
            article_id: id,
            score: s.score,
            label: s.label,
        };
        if !self.store.update_sentiment(&update).await? {
            return Ok(None);
        }
        tracing::info!(label = %s.label, score = s.score, "updated sentiment");
        Ok(Some(update))
    }

    pub async fn run_batch(&self, limit: usize) -> anyhow::Result<BatchReport> {
        self.run_batch_until(limit, None).await
    }

    /// Scores up to `limit` unscored articles and writes the results in one transaction.
    /// Item failures are counted, not raised; stops between items once `shutdown` is set.
    #[tracing::instrument(level = "info", skip(self, shutdown), fields(classifier = self.classifier.name()))]
    pub async fn run_batch_until(
        &self,
        limit: usize,
        shutdown: Option<watch::Receiver<bool>>,
    ) -> anyhow::Result<BatchReport> {
        let pending = self.store.pending_sentiment(limit).await?;
        let mut report = BatchReport {
            processed: pending.len(),
            ..BatchReport::default()
        };
        if pending.is_empty() {
            return Ok(report);
        }
        tracing::info!(count = pending.len(), "processing pending articles");

        let mut updates = Vec::with_capacity(pending.len());
        for article in &pending {
            if shutdown.as_ref().is_some_and(|rx| *rx.borrow()) {
                tracing::info!(done = updates.len(), "shutdown requested; stopping sentiment batch");
                break;
            }
            let Some(text) = article.analysis_text() else {
                continue;
            };
            match tokio::time::timeout(self.item_timeout, self.score(text)).await {
                Ok(Ok(s)) => updates.push(SentimentUpdate {
                    article_id: article.id,
                    score: s.score,
                    label: s.label,
                }),
                Ok(Err(err)) => {
                    let msg = format!("{err:#}");
                    tracing::error!(article_id = article.id, error = %msg, "sentiment failed");
                    report.push_error(article.id, &msg);
                }
                Err(_) => {
                    tracing::warn!(article_id = article.id, "sentiment timed out");
                    report.push_error(article.id, "timed out");
                }
            }
        }

        let written = self.store.apply_sentiment_batch(&updates).await?;
        if written < updates.len() as u64 {
            tracing::warn!(written, scored = updates.len(), "some scored articles vanished before commit");
        }
        report.success = updates.len();
        tracing::info!(
            processed = report.processed,
            success = report.success,
            failed = report.failed,
            "sentiment batch complete"
        );
        Ok(report)
    }
}
