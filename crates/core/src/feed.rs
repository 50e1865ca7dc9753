//! Syndication feed discovery: RSS first, then Atom, then a lenient tag scan for broken XML.

use crate::config::FetchSettings;
use crate::extract::dates::parse_lenient;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub link: String,
    pub title: String,
    pub published: Option<DateTime<Utc>>,
}

#[async_trait::async_trait]
pub trait FeedReader: Send + Sync {
    /// Best-effort entry list. Network and XML problems yield fewer entries, never an error.
    async fn parse_feed(&self, url: &str, limit: usize) -> Vec<FeedEntry>;
}

pub struct HttpFeedReader {
    http: reqwest::Client,
}

impl HttpFeedReader {
    pub fn from_settings(settings: &FetchSettings) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout())
            .user_agent(settings.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(settings.max_redirects))
            .build()?;
        Ok(Self { http })
    }

    async fn download(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        let resp = self
            .http
            .get(url)
            .header(
                reqwest::header::ACCEPT,
                "application/rss+xml, application/atom+xml, application/xml;q=0.9, */*;q=0.8",
            )
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.bytes().await?.to_vec())
    }
}

#[async_trait::async_trait]
impl FeedReader for HttpFeedReader {
    #[tracing::instrument(level = "info", skip(self))]
    async fn parse_feed(&self, url: &str, limit: usize) -> Vec<FeedEntry> {
        let body = match self.download(url).await {
            Ok(body) => body,
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "feed download failed");
                return Vec::new();
            }
        };
        let entries = parse_feed_bytes(&body, limit);
        tracing::info!(count = entries.len(), "parsed feed");
        entries
    }
}

pub fn parse_feed_bytes(body: &[u8], limit: usize) -> Vec<FeedEntry> {
    let entries = if let Ok(channel) = rss::Channel::read_from(body) {
        from_rss(&channel)
    } else if let Ok(feed) = atom_syndication::Feed::read_from(body) {
        from_atom(&feed)
    } else {
        tracing::debug!("feed is not well-formed; scanning tags");
        scan_lenient(&String::from_utf8_lossy(body))
    };
    entries.into_iter().take(limit).collect()
}

fn from_rss(channel: &rss::Channel) -> Vec<FeedEntry> {
    channel
        .items()
        .iter()
        .filter_map(|item| {
            let link = item.link()?.trim();
            if link.is_empty() {
                return None;
            }
            Some(FeedEntry {
                link: link.to_string(),
                title: item.title().unwrap_or_default().trim().to_string(),
                published: item.pub_date().and_then(parse_lenient),
            })
        })
        .collect()
}

fn from_atom(feed: &atom_syndication::Feed) -> Vec<FeedEntry> {
    feed.entries()
        .iter()
        .filter_map(|entry| {
            // Prefer rel="alternate" (the article page) over self/edit links.
            let link = entry
                .links()
                .iter()
                .find(|l| l.rel() == "alternate")
                .or_else(|| entry.links().first())?
                .href()
                .trim()
                .to_string();
            if link.is_empty() {
                return None;
            }
            let published = entry
                .published()
                .copied()
                .unwrap_or_else(|| *entry.updated());
            Some(FeedEntry {
                link,
                title: entry.title().value.trim().to_string(),
                published: Some(published.with_timezone(&Utc)),
            })
        })
        .collect()
}

static ITEM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(item|entry)\b[^>]*>(.*?)</(?:item|entry)>").expect("valid item regex")
});
static TITLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<title\b[^>]*>(.*?)</title>").expect("valid title regex"));
static LINK_TEXT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<link\b[^>]*>(.*?)</link>").expect("valid link regex"));
static LINK_HREF_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<link\b[^>]*\bhref\s*=\s*["']([^"']+)["']"#).expect("valid href regex")
});
static DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(pubDate|published|updated|dc:date)\b[^>]*>(.*?)</(?:pubDate|published|updated|dc:date)>")
        .expect("valid date regex")
});

fn unwrap_cdata(raw: &str) -> String {
    let s = raw.trim();
    let s = s
        .strip_prefix("<![CDATA[")
        .and_then(|inner| inner.strip_suffix("]]>"))
        .unwrap_or(s);
    s.replace("&amp;", "&").trim().to_string()
}

fn scan_lenient(text: &str) -> Vec<FeedEntry> {
    ITEM_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let body = caps.get(2)?.as_str();
            let link = LINK_TEXT_RE
                .captures(body)
                .map(|c| unwrap_cdata(&c[1]))
                .filter(|l| !l.is_empty())
                .or_else(|| LINK_HREF_RE.captures(body).map(|c| unwrap_cdata(&c[1])))?;
            if link.is_empty() {
                return None;
            }
            Some(FeedEntry {
                link,
                title: TITLE_RE
                    .captures(body)
                    .map(|c| unwrap_cdata(&c[1]))
                    .unwrap_or_default(),
                published: DATE_RE
                    .captures(body)
                    .and_then(|c| parse_lenient(&unwrap_cdata(&c[2]))),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Desk</title><link>https://desk.example</link><description>d</description>
<item><title>Bitcoin hits a record</title><link>https://desk.example/a</link><pubDate>Sat, 20 Jan 2024 12:00:00 GMT</pubDate></item>
<item><title>No link here</title></item>
<item><title>Ether upgrade</title><link>https://desk.example/b</link></item>
<item><title>Solana outage</title><link>https://desk.example/c</link></item>
</channel></rss>"#;

    #[test]
    fn rss_items_without_links_are_dropped_and_limit_applies() {
        let entries = parse_feed_bytes(RSS.as_bytes(), 2);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].link, "https://desk.example/a");
        assert_eq!(entries[0].title, "Bitcoin hits a record");
        assert_eq!(
            entries[0].published,
            Some(Utc.with_ymd_and_hms(2024, 1, 20, 12, 0, 0).unwrap())
        );
        assert_eq!(entries[1].link, "https://desk.example/b");
        assert!(entries[1].published.is_none());
    }

    #[test]
    fn atom_prefers_alternate_link() {
        let atom = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom"><title>Block</title><id>urn:x</id><updated>2024-01-20T12:00:00Z</updated>
<entry><title>Halving ahead</title><id>urn:1</id><updated>2024-01-20T13:00:00Z</updated>
<link rel="self" href="https://block.example/api/1"/><link rel="alternate" href="https://block.example/1"/></entry>
</feed>"#;
        let entries = parse_feed_bytes(atom.as_bytes(), 10);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].link, "https://block.example/1");
        assert_eq!(entries[0].title, "Halving ahead");
        assert_eq!(
            entries[0].published,
            Some(Utc.with_ymd_and_hms(2024, 1, 20, 13, 0, 0).unwrap())
        );
    }

    #[test]
    fn malformed_feed_yields_partial_entries() {
        let broken = r#"<rss><channel>
<item><title><![CDATA[Fed & crypto]]></title><link>https://x.example/1?a=1&amp;b=2</link></item>
<item><title>Half written</title><link>https://x.example/2</link></item>
<item><title>cut off"#;
        let entries = parse_feed_bytes(broken.as_bytes(), 10);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].title, "Fed & crypto");
        assert_eq!(entries[0].link, "https://x.example/1?a=1&b=2");
    }

    #[test]
    fn garbage_yields_nothing() {
        assert!(parse_feed_bytes(b"not a feed at all", 5).is_empty());
    }
}
