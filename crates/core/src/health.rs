use crate::crawl::SourceCacheEntry;
use crate::domain::ExtractionMethod;
use crate::storage::Store;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Above this share of model-parsed articles a source's selectors are probably stale.
pub const GEMINI_RATE_ALERT: f64 = 0.5;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SourceHealth {
    pub source: String,
    pub total: i64,
    pub rule: i64,
    pub semantic: i64,
    pub gemini: i64,
    pub gemini_rate: f64,
    pub degraded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParserHealth {
    pub since: DateTime<Utc>,
    pub sources: Vec<SourceHealth>,
    /// Last successful method per source as seen by this process.
    pub source_cache: Vec<(String, SourceCacheEntry)>,
}

impl ParserHealth {
    pub fn degraded(&self) -> impl Iterator<Item = &SourceHealth> {
        self.sources.iter().filter(|s| s.degraded)
    }
}

/// Per-source extraction mix for articles crawled since `since`.
pub async fn parser_health(store: &dyn Store, since: DateTime<Utc>) -> anyhow::Result<ParserHealth> {
    let counts = store.method_counts_since(since).await?;

    let mut by_source: BTreeMap<String, SourceHealth> = BTreeMap::new();
    for row in counts {
        let entry = by_source
            .entry(row.source.clone())
            .or_insert_with(|| SourceHealth {
                source: row.source.clone(),
                ..SourceHealth::default()
            });
        entry.total += row.count;
        match row.method {
            ExtractionMethod::Rule => entry.rule += row.count,
            ExtractionMethod::Semantic => entry.semantic += row.count,
            ExtractionMethod::Gemini => entry.gemini += row.count,
        }
    }

    let mut sources: Vec<SourceHealth> = by_source.into_values().collect();
    for s in &mut sources {
        if s.total > 0 {
            s.gemini_rate = crate::round4(s.gemini as f64 / s.total as f64);
        }
        s.degraded = s.gemini_rate > GEMINI_RATE_ALERT;
        if s.degraded {
            tracing::warn!(
                source = %s.source,
                gemini_rate = s.gemini_rate,
                "high Gemini usage; selectors may be broken"
            );
        }
    }
    if sources.is_empty() {
        tracing::info!("no crawl stats available for health check");
    }

    Ok(ParserHealth {
        since,
        sources,
        source_cache: Vec::new(),
    })
}
