use crate::domain::{ArticleDraft, ExtractionMethod, UsageRecord};
use crate::extract::dates::parse_lenient;
use crate::extract::{strip_noise, truncate_chars, ExtractionError};
use crate::llm::json::parse_model_json;
use crate::llm::TextGenerator;
use crate::storage::Store;
use scraper::Html;
use serde::Deserialize;
use std::sync::Arc;

pub const USAGE_ENDPOINT: &str = "parse_article";
pub const MAX_HTML_CHARS: usize = 50_000;
pub const MIN_AI_CONTENT_CHARS: usize = 100;

const AI_NOISE: &[&str] = &["script", "style", "nav", "footer", "header", "aside", "iframe"];

/// Last-resort extraction through a generative model. Every call leaves a usage record.
#[derive(Clone)]
pub struct AiExtractor {
    generator: Arc<dyn TextGenerator>,
    store: Arc<dyn Store>,
}

#[derive(Debug, Deserialize)]
struct ExtractedArticle {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    published_at: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    related_symbols: serde_json::Value,
}

impl AiExtractor {
    pub fn new(generator: Arc<dyn TextGenerator>, store: Arc<dyn Store>) -> Self {
        Self { generator, store }
    }

    #[tracing::instrument(level = "info", skip(self, html), fields(model = %self.generator.model()))]
    pub async fn extract(
        &self,
        html: &str,
        url: &str,
        source: &str,
    ) -> Result<ArticleDraft, ExtractionError> {
        if html.trim().is_empty() {
            return Err(ExtractionError::Validation("empty html".to_string()));
        }

        let prompt = build_prompt(&condense_html(html), url, source);
        let generation = match self.generator.generate(&prompt).await {
            Ok(g) => g,
            Err(err) => {
                let detail = format!("{err:#}");
                tracing::error!(%url, error = %detail, "Gemini extraction call failed");
                self.record(UsageRecord::failure(
                    USAGE_ENDPOINT,
                    self.generator.model(),
                    &detail,
                ))
                .await;
                return Err(ExtractionError::ModelCall(detail));
            }
        };

        self.record(UsageRecord::success(
            USAGE_ENDPOINT,
            self.generator.model(),
            generation.usage,
        ))
        .await;
        tracing::info!(%url, total_tokens = generation.usage.total_tokens, "Gemini extraction call succeeded");

        let draft = parse_response(&generation.text, url, source);
        if let Err(err) = &draft {
            tracing::warn!(%url, error = %err, "Gemini returned unusable data");
        }
        draft
    }

    async fn record(&self, record: UsageRecord) {
        if let Err(err) = self.store.record_usage(&record).await {
            tracing::error!(error = %format!("{err:#}"), "failed to record Gemini usage");
        }
    }
}

/// Drops non-content markup and bounds the document to the model input budget.
pub fn condense_html(html: &str) -> String {
    let mut doc = Html::parse_document(html);
    strip_noise(&mut doc, AI_NOISE);
    truncate_chars(&doc.html(), MAX_HTML_CHARS).to_string()
}

fn build_prompt(html: &str, url: &str, source: &str) -> String {
    format!(
        "You are a professional news article extractor. Extract information from this HTML page.\n\
\n\
Source: {source}\n\
URL: {url}\n\
\n\
CRITICAL REQUIREMENTS:\n\
1. Return ONLY a valid JSON object (no markdown, no explanation).\n\
2. Extract the main article content. Content is MANDATORY and cannot be null.\n\
3. Content must be the full article text, not a summary.\n\
4. Ignore ads, navigation, sidebars and comments.\n\
5. If a field cannot be found use null, except content.\n\
6. Dates must be ISO 8601 (YYYY-MM-DDTHH:MM:SS).\n\
\n\
HTML:\n\
{html}\n\
\n\
Return JSON with exactly these keys:\n\
{{\n\
  \"title\": \"Main article title\",\n\
  \"content\": \"Full article text (paragraphs joined with \\n\\n)\",\n\
  \"author\": \"Author name or null\",\n\
  \"published_at\": \"ISO date string or null\",\n\
  \"summary\": \"Brief 2-3 sentence summary\",\n\
  \"related_symbols\": [\"BTC\", \"ETH\"]\n\
}}\n\
\n\
Rules:\n\
- content must be at least {MIN_AI_CONTENT_CHARS} characters\n\
- preserve paragraph structure with \\n\\n\n\
- related_symbols lists the crypto tickers mentioned, or []\n\
\n\
Return JSON only:"
    )
}

fn non_blank(s: Option<String>) -> Option<String> {
    s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_response(text: &str, url: &str, source: &str) -> Result<ArticleDraft, ExtractionError> {
    let parsed: ExtractedArticle =
        parse_model_json(text).map_err(|e| ExtractionError::ModelOutput(format!("{e:#}")))?;

    let title = non_blank(parsed.title)
        .ok_or(ExtractionError::MissingRequiredField { field: "title" })?;
    let content = non_blank(parsed.content)
        .ok_or(ExtractionError::MissingRequiredField { field: "content" })?;
    let content_chars = content.chars().count();
    if content_chars < MIN_AI_CONTENT_CHARS {
        return Err(ExtractionError::Validation(format!(
            "content too short: {content_chars} chars"
        )));
    }

    let mut symbols: Vec<String> = Vec::new();
    if let Some(items) = parsed.related_symbols.as_array() {
        for sym in items.iter().filter_map(|v| v.as_str()) {
            let sym = sym.trim().to_ascii_uppercase();
            if !sym.is_empty() && !symbols.contains(&sym) {
                symbols.push(sym);
            }
        }
    }

    Ok(ArticleDraft {
        url: url.to_string(),
        source: source.to_string(),
        title,
        content,
        summary: non_blank(parsed.summary),
        author: non_blank(parsed.author).filter(|a| !a.eq_ignore_ascii_case("null")),
        published_at: parsed.published_at.as_deref().and_then(parse_lenient),
        related_symbols: (!symbols.is_empty()).then(|| symbols.join(",")),
        method: ExtractionMethod::Gemini,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TokenUsage, UsageStatus};
    use crate::llm::{Generation, Provider};
    use crate::storage::MemoryStore;
    use chrono::{TimeZone, Utc};
    use parking_lot::Mutex;
    use serde_json::json;

    struct ScriptedGenerator {
        reply: Result<String, String>,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl TextGenerator for ScriptedGenerator {
        fn provider(&self) -> Provider {
            Provider::Gemini
        }

        fn model(&self) -> &str {
            "gemini-test"
        }

        async fn generate(&self, prompt: &str) -> anyhow::Result<Generation> {
            self.prompts.lock().push(prompt.to_string());
            match &self.reply {
                Ok(text) => Ok(Generation {
                    text: text.clone(),
                    usage: TokenUsage {
                        prompt_tokens: 10,
                        completion_tokens: 5,
                        total_tokens: 15,
                    },
                }),
                Err(e) => Err(anyhow::anyhow!(e.clone())),
            }
        }
    }

    fn extractor(reply: Result<String, String>) -> (AiExtractor, Arc<MemoryStore>, Arc<ScriptedGenerator>) {
        let store = Arc::new(MemoryStore::new());
        let generator = Arc::new(ScriptedGenerator {
            reply,
            prompts: Mutex::new(Vec::new()),
        });
        (
            AiExtractor::new(generator.clone(), store.clone()),
            store,
            generator,
        )
    }

    fn long_content() -> String {
        "Bitcoin rose sharply after the approval. ".repeat(5)
    }

    #[tokio::test]
    async fn parses_fenced_json_and_records_success() {
        let body = json!({
            "title": "Bitcoin jumps",
            "content": long_content(),
            "author": null,
            "published_at": "2024-01-20T14:30:00",
            "summary": "BTC up.",
            "related_symbols": ["btc", "Eth", "btc"]
        });
        let (ex, store, _) = extractor(Ok(format!("```json\n{body}\n```")));

        let draft = ex
            .extract("<html><body><p>x</p></body></html>", "https://a", "coindesk")
            .await
            .unwrap();

        assert_eq!(draft.title, "Bitcoin jumps");
        assert_eq!(draft.related_symbols.as_deref(), Some("BTC,ETH"));
        assert_eq!(
            draft.published_at,
            Some(Utc.with_ymd_and_hms(2024, 1, 20, 14, 30, 0).unwrap())
        );
        assert!(draft.author.is_none());
        assert_eq!(draft.method, ExtractionMethod::Gemini);

        let usage = store.usage_records();
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].status, UsageStatus::Success);
        assert_eq!(usage[0].endpoint, "parse_article");
        assert_eq!(usage[0].usage.unwrap().total_tokens, 15);
    }

    #[tokio::test]
    async fn short_content_is_rejected_but_usage_is_kept() {
        let body = json!({"title": "Bitcoin jumps", "content": "too short"});
        let (ex, store, _) = extractor(Ok(body.to_string()));
        let err = ex.extract("<p>x</p>", "https://a", "s").await.unwrap_err();
        assert!(matches!(err, ExtractionError::Validation(_)));
        assert_eq!(store.usage_records().len(), 1);
    }

    #[tokio::test]
    async fn unparsable_date_is_tolerated() {
        let body = json!({
            "title": "Bitcoin jumps",
            "content": long_content(),
            "published_at": "sometime last week",
            "related_symbols": "BTC"
        });
        let (ex, _, _) = extractor(Ok(body.to_string()));
        let draft = ex.extract("<p>x</p>", "https://a", "s").await.unwrap();
        assert!(draft.published_at.is_none());
        assert!(draft.related_symbols.is_none());
    }

    #[tokio::test]
    async fn model_failure_records_error_usage() {
        let (ex, store, _) = extractor(Err("quota exceeded".to_string()));
        let err = ex.extract("<p>x</p>", "https://a", "s").await.unwrap_err();
        assert!(matches!(err, ExtractionError::ModelCall(m) if m.contains("quota")));

        let usage = store.usage_records();
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].status, UsageStatus::Error);
        assert_eq!(usage[0].error_message.as_deref(), Some("quota exceeded"));
    }

    #[tokio::test]
    async fn non_json_reply_is_model_output_error() {
        let (ex, _, _) = extractor(Ok("Sorry, I can't help with that.".to_string()));
        let err = ex.extract("<p>x</p>", "https://a", "s").await.unwrap_err();
        assert!(matches!(err, ExtractionError::ModelOutput(_)));
    }

    #[tokio::test]
    async fn prompt_carries_condensed_html() {
        let (ex, _, generator) = extractor(Err("x".to_string()));
        let _ = ex
            .extract(
                "<html><body><script>tracking()</script><p>Story text</p></body></html>",
                "https://a",
                "s",
            )
            .await;
        let prompts = generator.prompts.lock();
        assert!(prompts[0].contains("Story text"));
        assert!(!prompts[0].contains("tracking()"));
    }

    #[test]
    fn condense_html_is_bounded() {
        let html = format!("<html><body><p>{}</p></body></html>", "a".repeat(80_000));
        assert_eq!(condense_html(&html).chars().count(), MAX_HTML_CHARS);
    }

    #[tokio::test]
    async fn empty_html_never_calls_the_model() {
        let (ex, store, generator) = extractor(Ok("{}".to_string()));
        assert!(ex.extract("  ", "https://a", "s").await.is_err());
        assert!(generator.prompts.lock().is_empty());
        assert!(store.usage_records().is_empty());
    }
}
