//! Article extraction strategies and the HTML helpers they share.

pub mod ai;
pub mod dates;
pub mod rule;
pub mod semantic;
pub mod sources;

use crate::fetch::FetchError;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;

pub use ai::AiExtractor;
pub use rule::RuleExtractor;
pub use semantic::SemanticExtractor;
pub use sources::{SourceConfig, SourceRegistry};

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("no selector config for source {0:?}")]
    UnknownSource(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("required field {field} resolved empty")]
    MissingRequiredField { field: &'static str },

    #[error("extraction result rejected: {0}")]
    Validation(String),

    #[error("model call failed: {0}")]
    ModelCall(String),

    #[error("model output unusable: {0}")]
    ModelOutput(String),

    #[error("{0} is not configured")]
    NotConfigured(&'static str),
}

/// Collapses whitespace runs, turns non-breaking spaces into spaces and drops zero-width spaces.
pub fn clean_text(text: &str) -> String {
    text.replace('\u{200b}', "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Raw text of an element, trimmed.
pub(crate) fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// Removes every element matching one of `tags` from the document.
pub(crate) fn strip_noise(doc: &mut Html, tags: &[&str]) {
    let Ok(selector) = Selector::parse(&tags.join(", ")) else {
        return;
    };
    let ids: Vec<_> = doc.select(&selector).map(|el| el.id()).collect();
    for id in ids {
        if let Some(mut node) = doc.tree.get_mut(id) {
            node.detach();
        }
    }
}

/// Cuts `s` to at most `max` characters without splitting a code point.
pub(crate) fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Open Graph and standard meta tags, used as fallbacks by the extractors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageMetadata {
    pub og_title: Option<String>,
    pub og_description: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
    pub published_time: Option<String>,
}

impl PageMetadata {
    pub fn from_document(doc: &Html) -> Self {
        Self {
            og_title: meta_content(doc, r#"meta[property="og:title"]"#),
            og_description: meta_content(doc, r#"meta[property="og:description"]"#),
            description: meta_content(doc, r#"meta[name="description"]"#),
            author: meta_content(doc, r#"meta[name="author"]"#),
            published_time: meta_content(doc, r#"meta[property="article:published_time"]"#),
        }
    }

    /// Best available short description of the page.
    pub fn summary(&self) -> Option<String> {
        self.og_description
            .clone()
            .or_else(|| self.description.clone())
    }
}

fn meta_content(doc: &Html, css: &str) -> Option<String> {
    let selector = Selector::parse(css).ok()?;
    doc.select(&selector)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
