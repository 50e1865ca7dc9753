//! Source-agnostic extraction from generic document semantics and content density.
//!
//! Every field has an ordered list of named strategies; the first one that yields a
//! plausible value wins. The extractor never errors: an unusable page is `None`.

use crate::domain::{ArticleDraft, ExtractionMethod};
use crate::extract::dates::parse_lenient;
use crate::extract::{clean_text, element_text, strip_noise, PageMetadata};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};

pub const MIN_TITLE_CHARS: usize = 10;
pub const MIN_CONTENT_CHARS: usize = 200;
const MIN_AUTHOR_CHARS: usize = 2;
const MIN_PARAGRAPH_CHARS: usize = 50;
const MIN_DENSE_PARAGRAPHS: usize = 3;

const CONTENT_NOISE: &[&str] = &["script", "style", "nav", "aside", "footer"];

/// One named attempt at a field: the first element matching `selector`.
struct SelectorStrategy {
    name: &'static str,
    selector: Selector,
}

impl SelectorStrategy {
    fn new(name: &'static str, css: &str) -> Self {
        Self {
            name,
            selector: Selector::parse(css).expect("static strategy selector is valid"),
        }
    }
}

static TITLE_STRATEGIES: Lazy<Vec<SelectorStrategy>> = Lazy::new(|| {
    vec![
        SelectorStrategy::new("article_heading", "article h1"),
        SelectorStrategy::new("itemprop_headline", "h1[itemprop='headline']"),
        SelectorStrategy::new("h1_title_class", "h1[class*='title']"),
        SelectorStrategy::new("h1_headline_class", "h1[class*='headline']"),
        SelectorStrategy::new("first_h1", "h1"),
        SelectorStrategy::new("og_title", "meta[property='og:title']"),
        SelectorStrategy::new("twitter_title", "meta[name='twitter:title']"),
        SelectorStrategy::new("document_title", "title"),
    ]
});

static AUTHOR_STRATEGIES: Lazy<Vec<SelectorStrategy>> = Lazy::new(|| {
    vec![
        SelectorStrategy::new("rel_author", "a[rel='author']"),
        SelectorStrategy::new("itemprop_author", "[itemprop='author']"),
        SelectorStrategy::new("meta_author", "meta[name='author']"),
        SelectorStrategy::new("author_name_class", ".author-name"),
        SelectorStrategy::new("author_class", "[class*='author']"),
    ]
});

static DATE_STRATEGIES: Lazy<Vec<SelectorStrategy>> = Lazy::new(|| {
    vec![
        SelectorStrategy::new("time_datetime", "time[datetime]"),
        SelectorStrategy::new("og_published_time", "meta[property='article:published_time']"),
        SelectorStrategy::new("itemprop_date_published", "[itemprop='datePublished']"),
    ]
});

static CONTENT_CONTAINERS: Lazy<Vec<SelectorStrategy>> = Lazy::new(|| {
    vec![
        SelectorStrategy::new("main_article", "main article"),
        SelectorStrategy::new("article_body_class", "div[class*='article-body']"),
        SelectorStrategy::new("post_content_class", "div[class*='post-content']"),
        SelectorStrategy::new("entry_content_class", "div[class*='entry-content']"),
        SelectorStrategy::new("itemprop_article_body", "div[itemprop='articleBody']"),
    ]
});

static ARTICLE: Lazy<Selector> = Lazy::new(|| Selector::parse("article").expect("valid selector"));
static PARAGRAPH: Lazy<Selector> = Lazy::new(|| Selector::parse("p").expect("valid selector"));
static DIV: Lazy<Selector> = Lazy::new(|| Selector::parse("div").expect("valid selector"));

#[derive(Debug, Clone, Copy, Default)]
pub struct SemanticExtractor;

impl SemanticExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, html: &str, url: &str, source: &str) -> Option<ArticleDraft> {
        if html.trim().is_empty() {
            return None;
        }

        let doc = Html::parse_document(html);
        let title = extract_title(&doc);
        let author = extract_author(&doc);
        let published_at = extract_date(&doc);
        let summary = PageMetadata::from_document(&doc).summary();

        let mut body = Html::parse_document(html);
        strip_noise(&mut body, CONTENT_NOISE);
        let content = extract_content(&body);

        let (title, content) = match (title, content) {
            (Some(t), Some(c)) if is_valid(&t, &c) => (t, c),
            (title, content) => {
                tracing::debug!(
                    %url,
                    title_chars = title.as_ref().map(|t| t.chars().count()),
                    content_chars = content.as_ref().map(|c| c.chars().count()),
                    "semantic extraction rejected"
                );
                return None;
            }
        };

        Some(ArticleDraft {
            url: url.to_string(),
            source: source.to_string(),
            title,
            content,
            summary,
            author,
            published_at,
            related_symbols: None,
            method: ExtractionMethod::Semantic,
        })
    }
}

pub fn is_valid(title: &str, content: &str) -> bool {
    title.chars().count() >= MIN_TITLE_CHARS && content.chars().count() >= MIN_CONTENT_CHARS
}

/// `content` attribute for meta tags, text otherwise.
fn value_of(el: ElementRef<'_>) -> String {
    match el.value().attr("content") {
        Some(c) if !c.trim().is_empty() => clean_text(c),
        _ => clean_text(&element_text(el)),
    }
}

fn first_plausible(
    doc: &Html,
    strategies: &[SelectorStrategy],
    field: &'static str,
    min_chars: usize,
) -> Option<String> {
    for strategy in strategies {
        let Some(el) = doc.select(&strategy.selector).next() else {
            continue;
        };
        let text = value_of(el);
        if text.chars().count() > min_chars {
            tracing::trace!(field, strategy = strategy.name, "strategy matched");
            return Some(text);
        }
    }
    None
}

pub(crate) fn extract_title(doc: &Html) -> Option<String> {
    first_plausible(doc, &TITLE_STRATEGIES, "title", MIN_TITLE_CHARS)
}

pub(crate) fn extract_author(doc: &Html) -> Option<String> {
    first_plausible(doc, &AUTHOR_STRATEGIES, "author", MIN_AUTHOR_CHARS)
}

pub(crate) fn extract_date(doc: &Html) -> Option<DateTime<Utc>> {
    DATE_STRATEGIES.iter().find_map(|strategy| {
        let el = doc.select(&strategy.selector).next()?;
        let raw = el
            .value()
            .attr("datetime")
            .or_else(|| el.value().attr("content"))?;
        parse_lenient(raw)
    })
}

/// Expects a document with noise tags already removed.
pub(crate) fn extract_content(doc: &Html) -> Option<String> {
    let article = || doc.select(&ARTICLE).next().and_then(dense_paragraphs);
    let containers = || {
        CONTENT_CONTAINERS.iter().find_map(|strategy| {
            doc.select(&strategy.selector).next().and_then(dense_paragraphs)
        })
    };
    let densest = || densest_div(doc).and_then(dense_paragraphs);

    article().or_else(containers).or_else(densest)
}

/// Paragraphs over the length floor joined by blank lines, if they add up to enough text.
fn dense_paragraphs(container: ElementRef<'_>) -> Option<String> {
    let content = container
        .select(&PARAGRAPH)
        .map(element_text)
        .filter(|p| p.chars().count() > MIN_PARAGRAPH_CHARS)
        .collect::<Vec<_>>()
        .join("\n\n");
    (content.chars().count() > MIN_CONTENT_CHARS).then_some(content)
}

fn densest_div(doc: &Html) -> Option<ElementRef<'_>> {
    let mut best: Option<(ElementRef<'_>, usize)> = None;
    for div in doc.select(&DIV) {
        let count = div.select(&PARAGRAPH).count();
        if best.map_or(true, |(_, max)| count > max) {
            best = Some((div, count));
        }
    }
    best.filter(|(_, count)| *count >= MIN_DENSE_PARAGRAPHS)
        .map(|(div, _)| div)
}
