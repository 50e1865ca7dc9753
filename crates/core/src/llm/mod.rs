pub mod error;
pub mod gemini;
pub mod json;

use crate::domain::TokenUsage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Gemini,
}

/// Text returned by one model call, with the token accounting the provider reported.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub usage: TokenUsage,
}

#[async_trait::async_trait]
pub trait TextGenerator: Send + Sync {
    fn provider(&self) -> Provider;

    fn model(&self) -> &str;

    async fn generate(&self, prompt: &str) -> anyhow::Result<Generation>;
}
