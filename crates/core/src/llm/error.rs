use crate::llm::Provider;
use serde_json::Value;
use thiserror::Error;

/// Where a model call went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStage {
    /// Non-2xx response from the provider.
    Http,
    /// The prompt was refused by the provider's safety filter.
    Blocked,
    NoCandidates,
    /// A candidate came back without any text.
    EmptyText,
}

impl CallStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStage::Http => "http",
            CallStage::Blocked => "blocked",
            CallStage::NoCandidates => "no_candidates",
            CallStage::EmptyText => "empty_text",
        }
    }
}

/// Model call failure carrying whatever the provider sent back, for usage records and logs.
#[derive(Debug, Clone, Error)]
#[error("{provider:?} call failed at {}: {detail}", stage.as_str())]
pub struct ModelCallError {
    pub provider: Provider,
    pub stage: CallStage,
    pub detail: String,
    pub raw_body: Option<String>,
    pub raw_json: Option<Value>,
}

impl ModelCallError {
    pub fn new(provider: Provider, stage: CallStage, detail: impl Into<String>) -> Self {
        Self {
            provider,
            stage,
            detail: detail.into(),
            raw_body: None,
            raw_json: None,
        }
    }

    /// Keeps the response body, parsed as JSON too when it is JSON.
    pub fn with_body(mut self, body: String) -> Self {
        self.raw_json = serde_json::from_str(&body).ok();
        self.raw_body = Some(body);
        self
    }
}
