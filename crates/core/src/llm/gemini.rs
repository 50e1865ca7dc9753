use crate::config::Settings;
use crate::domain::TokenUsage;
use crate::llm::error::{CallStage, ModelCallError};
use crate::llm::{Generation, Provider, TextGenerator};
use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_TEMPERATURE: f32 = 0.1;

#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GeminiClient {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let api_key = settings.require_gemini_api_key()?.to_string();
        let base_url = settings
            .gemini_base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.gemini_timeout_secs.max(1)))
            .build()
            .context("failed to build reqwest client")?;

        tracing::info!(model = %settings.gemini_model, "Gemini client initialised");
        Ok(Self {
            http,
            api_key,
            base_url,
            model: settings.gemini_model.clone(),
        })
    }

    async fn generate_content(
        &self,
        req: GenerateContentRequest,
    ) -> anyhow::Result<GenerateContentResponse> {
        let mut headers = HeaderMap::new();
        headers.insert("x-goog-api-key", HeaderValue::from_str(&self.api_key)?);

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        );
        let res = self
            .http
            .post(url)
            .headers(headers)
            .json(&req)
            .send()
            .await
            .context("Gemini request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read Gemini response body")?;
        if !status.is_success() {
            return Err(
                ModelCallError::new(Provider::Gemini, CallStage::Http, format!("status={status}"))
                    .with_body(text)
                    .into(),
            );
        }

        serde_json::from_str::<GenerateContentResponse>(&text)
            .with_context(|| format!("failed to decode Gemini response JSON: {text}"))
    }

    fn response_text(res: &GenerateContentResponse) -> Result<String, ModelCallError> {
        if let Some(reason) = res
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref())
        {
            return Err(ModelCallError::new(
                Provider::Gemini,
                CallStage::Blocked,
                format!("prompt blocked: {reason}"),
            ));
        }

        let candidate = res.candidates.first().ok_or_else(|| {
            ModelCallError::new(
                Provider::Gemini,
                CallStage::NoCandidates,
                "response has no candidates",
            )
        })?;

        let text = candidate
            .content
            .as_ref()
            .map(|c| {
                c.parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(ModelCallError::new(
                Provider::Gemini,
                CallStage::EmptyText,
                format!(
                    "candidate has no text (finish_reason={})",
                    candidate.finish_reason.as_deref().unwrap_or("unknown")
                ),
            ));
        }
        Ok(text)
    }

    fn usage(res: &GenerateContentResponse) -> TokenUsage {
        res.usage_metadata
            .as_ref()
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_token_count,
                completion_tokens: u.candidates_token_count,
                total_tokens: u.total_token_count,
            })
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl TextGenerator for GeminiClient {
    fn provider(&self) -> Provider {
        Provider::Gemini
    }

    fn model(&self) -> &str {
        &self.model
    }

    #[tracing::instrument(level = "debug", skip_all, fields(model = %self.model, prompt_chars = prompt.len()))]
    async fn generate(&self, prompt: &str) -> anyhow::Result<Generation> {
        let req = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(prompt.to_string()),
                }],
            }],
            generation_config: Some(GenerationConfig {
                temperature: DEFAULT_TEMPERATURE,
            }),
        };

        let res = self.generate_content(req).await?;
        let text = Self::response_text(&res)?;
        let usage = Self::usage(&res);
        tracing::debug!(
            response_chars = text.len(),
            total_tokens = usage.total_tokens,
            "Gemini generation complete"
        );
        Ok(Generation { text, usage })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: i64,
    #[serde(default)]
    candidates_token_count: i64,
    #[serde(default)]
    total_token_count: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(v: serde_json::Value) -> GenerateContentResponse {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn joins_candidate_parts_and_reads_usage() {
        let res = decode(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "{\"a\":"}, {"text": "1}"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {
                "promptTokenCount": 120,
                "candidatesTokenCount": 30,
                "totalTokenCount": 150
            }
        }));

        assert_eq!(GeminiClient::response_text(&res).unwrap(), "{\"a\":1}");
        assert_eq!(
            GeminiClient::usage(&res),
            TokenUsage {
                prompt_tokens: 120,
                completion_tokens: 30,
                total_tokens: 150
            }
        );
    }

    #[test]
    fn blocked_prompt_reports_stage() {
        let res = decode(json!({
            "promptFeedback": {"blockReason": "SAFETY"},
            "candidates": []
        }));
        let err = GeminiClient::response_text(&res).unwrap_err();
        assert_eq!(err.stage, CallStage::Blocked);
        assert!(err.detail.contains("SAFETY"));
    }

    #[test]
    fn empty_candidate_reports_finish_reason() {
        let res = decode(json!({
            "candidates": [{"finishReason": "MAX_TOKENS"}]
        }));
        let err = GeminiClient::response_text(&res).unwrap_err();
        assert_eq!(err.stage, CallStage::EmptyText);
        assert!(err.detail.contains("MAX_TOKENS"));
        assert_eq!(GeminiClient::usage(&res), TokenUsage::default());
    }

    #[test]
    fn request_serializes_in_camel_case() {
        let req = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some("hi".to_string()),
                }],
            }],
            generation_config: Some(GenerationConfig { temperature: 0.5 }),
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["contents"][0]["parts"][0]["text"], "hi");
        assert_eq!(v["generationConfig"]["temperature"], 0.5);
    }
}
