use crate::sentiment::{SentimentClassifier, SentimentScore};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Three-way classifier served over HTTP (a text-classification inference endpoint).
///
/// Request: `{"inputs": "<text>"}`. Response: label probabilities, either flat
/// `[{"label": "positive", "score": 0.91}, ...]` or nested one level deeper.
#[derive(Debug, Clone)]
pub struct InferenceClassifier {
    http: reqwest::Client,
    url: String,
}

#[derive(Debug, Serialize)]
struct InferenceRequest<'a> {
    inputs: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct LabelScore {
    label: String,
    score: f64,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InferenceResponse {
    Nested(Vec<Vec<LabelScore>>),
    Flat(Vec<LabelScore>),
}

impl InferenceClassifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

#[async_trait::async_trait]
impl SentimentClassifier for InferenceClassifier {
    fn name(&self) -> &'static str {
        "inference"
    }

    async fn classify(&self, text: &str) -> anyhow::Result<SentimentScore> {
        let res = self
            .http
            .post(&self.url)
            .json(&InferenceRequest { inputs: text })
            .send()
            .await
            .context("classifier request failed")?;
        let status = res.status();
        let body = res
            .text()
            .await
            .context("failed to read classifier response body")?;
        if !status.is_success() {
            anyhow::bail!(
                "classifier returned status={status}: {}",
                body.chars().take(200).collect::<String>()
            );
        }
        score_from_body(&body)
    }
}

fn score_from_body(body: &str) -> anyhow::Result<SentimentScore> {
    let parsed: InferenceResponse =
        serde_json::from_str(body).context("classifier response is not label scores")?;
    let labels = match parsed {
        InferenceResponse::Nested(mut outer) if !outer.is_empty() => outer.swap_remove(0),
        InferenceResponse::Nested(_) => Vec::new(),
        InferenceResponse::Flat(v) => v,
    };

    let prob = |name: &str| {
        labels
            .iter()
            .find(|l| l.label.eq_ignore_ascii_case(name))
            .map(|l| l.score)
    };
    let (pos, neg) = (prob("positive"), prob("negative"));
    if pos.is_none() && neg.is_none() {
        anyhow::bail!("classifier response has no positive/negative labels");
    }
    Ok(SentimentScore::from_raw(
        pos.unwrap_or(0.0) - neg.unwrap_or(0.0),
    ))
}
