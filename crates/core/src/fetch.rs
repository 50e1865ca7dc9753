//! HTML fetching: plain HTTP, or a headless render service for script-heavy pages.

use crate::config::FetchSettings;
use anyhow::Context;
use encoding_rs::{Encoding, UTF_8};
use once_cell::sync::Lazy;
use regex::bytes::Regex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid url {url}: {detail}")]
    InvalidUrl { url: String, detail: String },

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("request to {url} failed: {detail}")]
    Http { url: String, detail: String },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("rendered fetch requested for {url} but no render endpoint is configured")]
    RenderUnavailable { url: String },
}

#[async_trait::async_trait]
pub trait HtmlFetcher: Send + Sync {
    async fn fetch(&self, url: &str, rendered: bool) -> Result<String, FetchError>;
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    http: reqwest::Client,
    render_endpoint: Option<String>,
    always_render: bool,
}

impl HttpFetcher {
    pub fn from_settings(settings: &FetchSettings) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
        headers.insert("DNT", HeaderValue::from_static("1"));

        let http = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .default_headers(headers)
            .timeout(settings.timeout())
            .redirect(reqwest::redirect::Policy::limited(settings.max_redirects))
            .build()
            .context("failed to build fetch http client")?;

        Ok(Self {
            http,
            render_endpoint: settings.render_endpoint.clone(),
            always_render: settings.use_rendered,
        })
    }

    async fn fetch_static(&self, url: &str) -> Result<String, FetchError> {
        let res = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| map_reqwest(url, e))?;

        let status = res.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_type = res
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = res.bytes().await.map_err(|e| map_reqwest(url, e))?;
        Ok(decode_html(&body, content_type.as_deref()))
    }

    async fn fetch_rendered(&self, url: &str) -> Result<String, FetchError> {
        let endpoint = self
            .render_endpoint
            .as_deref()
            .ok_or_else(|| FetchError::RenderUnavailable {
                url: url.to_string(),
            })?;

        let res = self
            .http
            .post(endpoint)
            .json(&serde_json::json!({ "url": url }))
            .send()
            .await
            .map_err(|e| map_reqwest(url, e))?;

        let status = res.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        res.text().await.map_err(|e| map_reqwest(url, e))
    }
}

#[async_trait::async_trait]
impl HtmlFetcher for HttpFetcher {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn fetch(&self, url: &str, rendered: bool) -> Result<String, FetchError> {
        url::Url::parse(url).map_err(|e| FetchError::InvalidUrl {
            url: url.to_string(),
            detail: e.to_string(),
        })?;

        let html = if rendered || self.always_render {
            self.fetch_rendered(url).await?
        } else {
            self.fetch_static(url).await?
        };
        tracing::debug!(%url, bytes = html.len(), rendered, "fetched html");
        Ok(html)
    }
}

fn map_reqwest(url: &str, err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Http {
            url: url.to_string(),
            detail: err.to_string(),
        }
    }
}

static META_CHARSET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<meta[^>]+charset\s*=\s*["']?([a-zA-Z0-9_\-]+)"#).expect("valid charset regex")
});

/// Decodes a response body using the header charset, then a `<meta charset>` sniff, then UTF-8.
pub fn decode_html(body: &[u8], content_type: Option<&str>) -> String {
    let from_header = content_type.and_then(|ct| {
        ct.split(';')
            .filter_map(|part| part.trim().strip_prefix("charset="))
            .next()
            .map(|label| label.trim_matches('"').to_string())
    });

    let head = &body[..body.len().min(2048)];
    let from_meta = || {
        META_CHARSET
            .captures(head)
            .and_then(|c| c.get(1))
            .map(|m| String::from_utf8_lossy(m.as_bytes()).into_owned())
    };

    let encoding = from_header
        .or_else(from_meta)
        .and_then(|label| Encoding::for_label(label.as_bytes()))
        .unwrap_or(UTF_8);

    let (text, _, _) = encoding.decode(body);
    text.into_owned()
}
