//! Per-publisher selector table. Built once at startup and validated eagerly.

use anyhow::Context;
use scraper::Selector;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// A CSS selector that is known to parse, kept together with its source text.
#[derive(Debug, Clone)]
pub struct FieldSelector {
    css: String,
    selector: Selector,
}

impl FieldSelector {
    pub fn parse(css: &str) -> anyhow::Result<Self> {
        let css = css.trim();
        anyhow::ensure!(!css.is_empty(), "selector is empty");
        let selector =
            Selector::parse(css).map_err(|e| anyhow::anyhow!("invalid selector {css:?}: {e}"))?;
        Ok(Self {
            css: css.to_string(),
            selector,
        })
    }

    pub fn css(&self) -> &str {
        &self.css
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    /// Whether the selector points at a body container rather than a single text node.
    pub fn targets_container(&self) -> bool {
        self.css.ends_with("content") || self.css.contains("article")
    }
}

#[derive(Debug, Clone)]
pub struct SourceSelectors {
    pub title: FieldSelector,
    pub content: FieldSelector,
    pub author: Option<FieldSelector>,
    pub date: Option<FieldSelector>,
}

#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub id: String,
    pub name: String,
    pub base_url: String,
    pub selectors: SourceSelectors,
    pub feed_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SourceRegistry {
    sources: BTreeMap<String, SourceConfig>,
}

#[derive(Debug, Deserialize)]
struct SourcesFile {
    #[serde(default)]
    sources: BTreeMap<String, RawSource>,
}

#[derive(Debug, Deserialize)]
struct RawSource {
    name: Option<String>,
    base_url: String,
    #[serde(default)]
    feed_url: Option<String>,
    selectors: RawSelectors,
}

#[derive(Debug, Deserialize)]
struct RawSelectors {
    title: Option<String>,
    content: Option<String>,
    author: Option<String>,
    date: Option<String>,
}

impl RawSource {
    fn validate(self, id: &str) -> anyhow::Result<SourceConfig> {
        let required = |field: &str, value: Option<String>| -> anyhow::Result<FieldSelector> {
            let css = value
                .filter(|s| !s.trim().is_empty())
                .with_context(|| format!("source {id:?} is missing the {field} selector"))?;
            FieldSelector::parse(&css).with_context(|| format!("source {id:?} {field} selector"))
        };
        let optional = |field: &str, value: Option<String>| -> anyhow::Result<Option<FieldSelector>> {
            match value.filter(|s| !s.trim().is_empty()) {
                Some(css) => FieldSelector::parse(&css)
                    .map(Some)
                    .with_context(|| format!("source {id:?} {field} selector")),
                None => Ok(None),
            }
        };

        Ok(SourceConfig {
            id: id.to_string(),
            name: self.name.unwrap_or_else(|| id.to_string()),
            base_url: self.base_url,
            selectors: SourceSelectors {
                title: required("title", self.selectors.title)?,
                content: required("content", self.selectors.content)?,
                author: optional("author", self.selectors.author)?,
                date: optional("date", self.selectors.date)?,
            },
            feed_url: self.feed_url.filter(|s| !s.trim().is_empty()),
        })
    }
}

impl SourceRegistry {
    /// The six crypto publishers the crawler ships with.
    pub fn builtin() -> anyhow::Result<Self> {
        Self::from_toml_str(BUILTIN_SOURCES).context("built-in source table is invalid")
    }

    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        let file: SourcesFile = toml::from_str(raw).context("failed to parse sources TOML")?;
        let mut sources = BTreeMap::new();
        for (id, raw) in file.sources {
            let id = id.trim().to_ascii_lowercase();
            let config = raw.validate(&id)?;
            sources.insert(id, config);
        }
        Ok(Self { sources })
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read sources file {}", path.display()))?;
        let registry = Self::from_toml_str(&raw)
            .with_context(|| format!("invalid sources file {}", path.display()))?;
        tracing::info!(path = %path.display(), sources = registry.len(), "loaded source selectors");
        Ok(registry)
    }

    /// Loads `path` when given, otherwise the built-in table.
    pub fn from_path_or_builtin(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Self::builtin(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&SourceConfig> {
        self.sources.get(&id.trim().to_ascii_lowercase())
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// `(source id, feed url)` for every source that has a feed.
    pub fn feeds(&self) -> Vec<(String, String)> {
        self.sources
            .values()
            .filter_map(|s| s.feed_url.as_ref().map(|f| (s.id.clone(), f.clone())))
            .collect()
    }

    /// Finds the registered source whose base URL host matches `url`.
    pub fn identify(&self, url: &str) -> Option<&SourceConfig> {
        let host = host_of(url)?;
        self.sources
            .values()
            .find(|s| host_of(&s.base_url).is_some_and(|h| h == host))
    }
}

fn host_of(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    Some(host.trim_start_matches("www.").to_string())
}

const BUILTIN_SOURCES: &str = r#"
[sources.coindesk]
name = "CoinDesk"
base_url = "https://www.coindesk.com"
feed_url = "https://www.coindesk.com/arc/outboundfeeds/rss/"
[sources.coindesk.selectors]
title = "h1.typography__StyledTypography-owin6q-0"
content = "div.article-body"
author = "a.typography__StyledTypography-owin6q-0.jWKDIo"
date = "time[datetime]"

[sources.cointelegraph]
name = "Cointelegraph"
base_url = "https://cointelegraph.com"
feed_url = "https://cointelegraph.com/rss"
[sources.cointelegraph.selectors]
title = "h1.post__title"
content = "div.post-content"
author = "a.post-meta__author-name"
date = "time.post-meta__publish-date"

[sources.cryptoslate]
name = "CryptoSlate"
base_url = "https://cryptoslate.com"
feed_url = "https://cryptoslate.com/feed/"
[sources.cryptoslate.selectors]
title = "h1.post-title"
content = "div.post-content"
author = "span.author-name"
date = "time.post-date"

[sources.decrypt]
name = "Decrypt"
base_url = "https://decrypt.co"
feed_url = "https://decrypt.co/feed"
[sources.decrypt.selectors]
title = "h1"
content = "article div.content"
author = "a.author-link"
date = "time[datetime]"

[sources.theblock]
name = "The Block"
base_url = "https://www.theblock.co"
feed_url = "https://www.theblock.co/rss.xml"
[sources.theblock.selectors]
title = "h1.articleHeader__title"
content = "div.article__content"
author = "a.authorCard__name"
date = "time.timestamp"

[sources.bitcoinmagazine]
name = "Bitcoin Magazine"
base_url = "https://bitcoinmagazine.com"
feed_url = "https://bitcoinmagazine.com/.rss/full/"
[sources.bitcoinmagazine.selectors]
title = "h1.m-detail-header__title"
content = "div.m-detail-content"
author = "div.m-detail-header__authors"
date = "time.m-detail-header__timestamp"
"#;
