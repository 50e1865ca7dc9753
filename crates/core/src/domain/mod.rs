pub mod article;
pub mod market;
pub mod usage;

pub use article::{
    split_symbols, Article, ArticleDraft, ArticleId, ExtractionMethod, SentimentLabel,
    SentimentUpdate,
};
pub use market::{Correlation, CorrelationResult, CorrelationUpsert, PriceObservation, SentimentStats};
pub use usage::{TokenUsage, UsageRecord, UsageStatus};
