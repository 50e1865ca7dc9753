use crate::domain::{SentimentLabel, UsageRecord};
use crate::llm::json::parse_model_json;
use crate::llm::TextGenerator;
use crate::sentiment::{SentimentClassifier, SentimentScore};
use crate::storage::Store;
use serde::Deserialize;
use std::sync::Arc;

pub const USAGE_ENDPOINT: &str = "analyze_sentiment";

/// Asks a generative model for `{sentiment_score, sentiment_label}`.
pub struct GenerativeClassifier {
    generator: Arc<dyn TextGenerator>,
    store: Arc<dyn Store>,
}

#[derive(Debug, Deserialize)]
struct SentimentReply {
    sentiment_score: f64,
    #[serde(default)]
    sentiment_label: Option<String>,
}

impl GenerativeClassifier {
    pub fn new(generator: Arc<dyn TextGenerator>, store: Arc<dyn Store>) -> Self {
        Self { generator, store }
    }

    async fn record(&self, record: UsageRecord) {
        if let Err(err) = self.store.record_usage(&record).await {
            tracing::error!(error = %format!("{err:#}"), "failed to record Gemini usage");
        }
    }
}

#[async_trait::async_trait]
impl SentimentClassifier for GenerativeClassifier {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn classify(&self, text: &str) -> anyhow::Result<SentimentScore> {
        let model = self.generator.model().to_string();
        let generation = match self.generator.generate(&build_prompt(text)).await {
            Ok(g) => g,
            Err(err) => {
                self.record(UsageRecord::failure(
                    USAGE_ENDPOINT,
                    &model,
                    &format!("{err:#}"),
                ))
                .await;
                return Err(err.context("Gemini sentiment call failed"));
            }
        };
        self.record(UsageRecord::success(USAGE_ENDPOINT, &model, generation.usage))
            .await;

        parse_reply(&generation.text)
    }
}

fn build_prompt(text: &str) -> String {
    format!(
        "Analyze the sentiment of this financial/crypto news text.\n\
\n\
Text: {text}\n\
\n\
Respond in exactly this format (JSON):\n\
{{\"sentiment_score\": <float between -1 (bearish/negative) and 1 (bullish/positive)>, \"sentiment_label\": \"<positive|negative|neutral>\"}}\n\
\n\
Only respond with the JSON, no other text."
    )
}

fn parse_reply(text: &str) -> anyhow::Result<SentimentScore> {
    let reply: SentimentReply = parse_model_json(text)?;
    if !reply.sentiment_score.is_finite() {
        anyhow::bail!("sentiment_score is not a finite number");
    }
    let score = SentimentScore::from_raw(reply.sentiment_score);

    // The stored label always follows the score; a disagreeing model label is only logged.
    if let Some(label) = reply
        .sentiment_label
        .as_deref()
        .and_then(|l| l.parse::<SentimentLabel>().ok())
    {
        if label != score.label {
            tracing::debug!(model_label = %label, derived_label = %score.label, score = score.score, "model label disagrees with score");
        }
    }
    Ok(score)
}
