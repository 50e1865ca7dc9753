use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const MAX_ERROR_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageStatus {
    Success,
    Error,
}

impl UsageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageStatus::Success => "success",
            UsageStatus::Error => "error",
        }
    }
}

/// Append-only audit row for one generative model call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: uuid::Uuid,
    pub endpoint: String,
    pub model_name: String,
    pub usage: Option<TokenUsage>,
    pub status: UsageStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl UsageRecord {
    pub fn success(endpoint: &str, model_name: &str, usage: TokenUsage) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            endpoint: endpoint.to_string(),
            model_name: model_name.to_string(),
            usage: Some(usage),
            status: UsageStatus::Success,
            error_message: None,
            created_at: Utc::now(),
        }
    }

    pub fn failure(endpoint: &str, model_name: &str, error: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            endpoint: endpoint.to_string(),
            model_name: model_name.to_string(),
            usage: None,
            status: UsageStatus::Error,
            error_message: Some(error.chars().take(MAX_ERROR_CHARS).collect()),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_truncates_error_message() {
        let long = "x".repeat(2_000);
        let rec = UsageRecord::failure("parse_article", "gemini-2.5-flash", &long);
        assert_eq!(rec.status, UsageStatus::Error);
        assert_eq!(rec.error_message.unwrap().chars().count(), 500);
        assert!(rec.usage.is_none());
    }
}
