use crate::domain::{ArticleDraft, ExtractionMethod};
use crate::extract::dates::parse_lenient;
use crate::extract::sources::{FieldSelector, SourceConfig, SourceRegistry};
use crate::extract::{clean_text, element_text, ExtractionError, PageMetadata};
use crate::fetch::HtmlFetcher;
use scraper::{ElementRef, Html};
use std::sync::Arc;

/// Selector-driven extraction for publishers with a registered selector set.
#[derive(Clone)]
pub struct RuleExtractor {
    registry: Arc<SourceRegistry>,
    fetcher: Arc<dyn HtmlFetcher>,
}

impl RuleExtractor {
    pub fn new(registry: Arc<SourceRegistry>, fetcher: Arc<dyn HtmlFetcher>) -> Self {
        Self { registry, fetcher }
    }

    pub fn supports(&self, source: &str) -> bool {
        self.registry.get(source).is_some()
    }

    pub async fn extract(&self, url: &str, source: &str) -> Result<ArticleDraft, ExtractionError> {
        let config = self
            .registry
            .get(source)
            .ok_or_else(|| ExtractionError::UnknownSource(source.to_string()))?;
        let html = self.fetcher.fetch(url, false).await?;
        extract_with(config, &html, url, source)
    }

    /// Same as [`extract`](Self::extract) over HTML that was already fetched.
    pub fn extract_html(
        &self,
        html: &str,
        url: &str,
        source: &str,
    ) -> Result<ArticleDraft, ExtractionError> {
        let config = self
            .registry
            .get(source)
            .ok_or_else(|| ExtractionError::UnknownSource(source.to_string()))?;
        extract_with(config, html, url, source)
    }
}

fn extract_with(
    config: &SourceConfig,
    html: &str,
    url: &str,
    source: &str,
) -> Result<ArticleDraft, ExtractionError> {
    let doc = Html::parse_document(html);
    let selectors = &config.selectors;

    let title = select_text(&doc, &selectors.title)
        .ok_or(ExtractionError::MissingRequiredField { field: "title" })?;
    let content = select_text(&doc, &selectors.content)
        .ok_or(ExtractionError::MissingRequiredField { field: "content" })?;

    let metadata = PageMetadata::from_document(&doc);
    let author = selectors
        .author
        .as_ref()
        .and_then(|sel| select_text(&doc, sel))
        .or_else(|| metadata.author.clone());
    let published_at = selectors
        .date
        .as_ref()
        .and_then(|sel| select_date(&doc, sel))
        .or_else(|| metadata.published_time.as_deref().and_then(parse_lenient));

    tracing::debug!(%url, source, title_chars = title.len(), content_chars = content.len(), "rule extraction succeeded");
    Ok(ArticleDraft {
        url: url.to_string(),
        source: source.to_string(),
        title,
        content,
        summary: metadata.summary(),
        author,
        published_at,
        related_symbols: None,
        method: ExtractionMethod::Rule,
    })
}

fn select_text(doc: &Html, field: &FieldSelector) -> Option<String> {
    let el = doc.select(field.selector()).next()?;
    let text = if field.targets_container() {
        container_text(el)
    } else {
        clean_text(&element_text(el))
    };
    (!text.is_empty()).then_some(text)
}

/// Joins the innermost paragraph-like blocks of a container with blank lines.
fn container_text(container: ElementRef<'_>) -> String {
    let blocks: Vec<String> = container
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|el| is_block(el) && !el.children().filter_map(ElementRef::wrap).any(|c| is_block(&c)))
        .map(|el| clean_text(&element_text(el)))
        .filter(|t| !t.is_empty())
        .collect();

    if blocks.is_empty() {
        clean_text(&element_text(container))
    } else {
        blocks.join("\n\n")
    }
}

fn is_block(el: &ElementRef<'_>) -> bool {
    matches!(el.value().name(), "p" | "div")
}

fn select_date(doc: &Html, field: &FieldSelector) -> Option<chrono::DateTime<chrono::Utc>> {
    let el = doc.select(field.selector()).next()?;
    let raw = el
        .value()
        .attr("datetime")
        .map(str::to_string)
        .unwrap_or_else(|| element_text(el));
    parse_lenient(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchError;
    use chrono::{TimeZone, Utc};

    struct StaticFetcher(&'static str);

    #[async_trait::async_trait]
    impl HtmlFetcher for StaticFetcher {
        async fn fetch(&self, _url: &str, _rendered: bool) -> Result<String, FetchError> {
            Ok(self.0.to_string())
        }
    }

    struct FailingFetcher;

    #[async_trait::async_trait]
    impl HtmlFetcher for FailingFetcher {
        async fn fetch(&self, url: &str, _rendered: bool) -> Result<String, FetchError> {
            Err(FetchError::Status {
                url: url.to_string(),
                status: 503,
            })
        }
    }

    const COINTELEGRAPH_PAGE: &str = r#"<html><head>
        <meta name="author" content="Meta Author">
        <meta property="og:description" content="Short summary.">
        </head><body>
        <h1 class="post__title">  Bitcoin ETF inflows hit record  </h1>
        <time class="post-meta__publish-date" datetime="2024-01-20T12:00:00Z">Jan 20</time>
        <div class="post-content">
            <p>First paragraph of the story.</p>
            <div><p>Nested paragraph.</p></div>
            <p>   </p>
        </div>
        </body></html>"#;

    fn extractor(fetcher: Arc<dyn HtmlFetcher>) -> RuleExtractor {
        RuleExtractor::new(Arc::new(SourceRegistry::builtin().unwrap()), fetcher)
    }

    #[test]
    fn extracts_with_source_selectors_and_meta_fallback() {
        let ex = extractor(Arc::new(FailingFetcher));
        let draft = ex
            .extract_html(COINTELEGRAPH_PAGE, "https://cointelegraph.com/a", "cointelegraph")
            .unwrap();

        assert_eq!(draft.title, "Bitcoin ETF inflows hit record");
        assert_eq!(draft.content, "First paragraph of the story.\n\nNested paragraph.");
        // author selector misses, meta author fills in
        assert_eq!(draft.author.as_deref(), Some("Meta Author"));
        assert_eq!(
            draft.published_at,
            Some(Utc.with_ymd_and_hms(2024, 1, 20, 12, 0, 0).unwrap())
        );
        assert_eq!(draft.summary.as_deref(), Some("Short summary."));
        assert_eq!(draft.method, ExtractionMethod::Rule);
    }

    #[test]
    fn missing_content_is_reported() {
        let ex = extractor(Arc::new(FailingFetcher));
        let err = ex
            .extract_html(
                r#"<h1 class="post__title">A perfectly fine title</h1>"#,
                "https://cointelegraph.com/a",
                "cointelegraph",
            )
            .unwrap_err();
        assert!(matches!(
            err,
            ExtractionError::MissingRequiredField { field: "content" }
        ));
    }

    #[tokio::test]
    async fn unknown_source_fails_before_fetching() {
        let ex = extractor(Arc::new(FailingFetcher));
        let err = ex.extract("https://x.example/a", "nowhere").await.unwrap_err();
        assert!(matches!(err, ExtractionError::UnknownSource(s) if s == "nowhere"));
    }

    #[tokio::test]
    async fn fetch_failure_is_surfaced() {
        let ex = extractor(Arc::new(FailingFetcher));
        let err = ex
            .extract("https://cointelegraph.com/a", "cointelegraph")
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractionError::Fetch(FetchError::Status { status: 503, .. })));
    }

    #[tokio::test]
    async fn extract_fetches_then_parses() {
        let ex = extractor(Arc::new(StaticFetcher(COINTELEGRAPH_PAGE)));
        let draft = ex
            .extract("https://cointelegraph.com/a", "cointelegraph")
            .await
            .unwrap();
        assert_eq!(draft.source, "cointelegraph");
        assert_eq!(draft.url, "https://cointelegraph.com/a");
    }
}
