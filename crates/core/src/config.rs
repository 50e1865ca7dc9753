use anyhow::Context;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (compatible; CryptoNewsBot/1.0)";

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: Option<String>,
    pub sentry_dsn: Option<String>,

    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_base_url: Option<String>,
    pub gemini_timeout_secs: u64,

    pub fetch: FetchSettings,

    pub crawl_interval_minutes: u64,
    pub analysis_interval_minutes: u64,
    pub batch_size: usize,
    /// Classifier input budget in tokens; the scorer keeps roughly four chars per token.
    pub max_text_length: usize,
    pub feed_limit: usize,
    pub max_concurrent_crawls: usize,
    pub item_timeout_secs: u64,

    pub use_local_classifier: bool,
    pub classifier_url: Option<String>,
    pub use_ai_fallback: bool,
    pub enable_scheduler: bool,

    pub sources_config_path: Option<PathBuf>,
    pub quote_asset: String,
    pub price_interval: String,
}

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub timeout_secs: u64,
    pub user_agent: String,
    pub max_redirects: usize,
    pub render_endpoint: Option<String>,
    pub use_rendered: bool,
}

impl FetchSettings {
    /// Request timeout for page and feed downloads, never zero.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_redirects: 10,
            render_endpoint: None,
            use_rendered: false,
        }
    }
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = FetchSettings::default();
        Ok(Self {
            database_url: env_opt("DATABASE_URL"),
            sentry_dsn: env_opt("SENTRY_DSN"),
            gemini_api_key: env_opt("GEMINI_API_KEY"),
            gemini_model: env_opt("GEMINI_MODEL").unwrap_or_else(|| "gemini-2.5-flash".to_string()),
            gemini_base_url: env_opt("GEMINI_BASE_URL"),
            gemini_timeout_secs: env_parse("GEMINI_TIMEOUT_SECS")?.unwrap_or(60),
            fetch: FetchSettings {
                timeout_secs: env_parse("FETCH_TIMEOUT_SECS")?.unwrap_or(defaults.timeout_secs),
                user_agent: env_opt("FETCH_USER_AGENT").unwrap_or(defaults.user_agent),
                max_redirects: env_parse("FETCH_MAX_REDIRECTS")?.unwrap_or(defaults.max_redirects),
                render_endpoint: env_opt("RENDER_ENDPOINT"),
                use_rendered: env_bool("USE_RENDERED_FETCH")?.unwrap_or(false),
            },
            crawl_interval_minutes: env_parse("CRAWL_INTERVAL_MINUTES")?.unwrap_or(30),
            analysis_interval_minutes: env_parse("ANALYSIS_INTERVAL_MINUTES")?.unwrap_or(15),
            batch_size: env_parse("BATCH_SIZE")?.unwrap_or(50),
            max_text_length: env_parse("MAX_TEXT_LENGTH")?.unwrap_or(512),
            feed_limit: env_parse("FEED_LIMIT")?.unwrap_or(5),
            max_concurrent_crawls: env_parse("MAX_CONCURRENT_CRAWLS")?.unwrap_or(5),
            item_timeout_secs: env_parse("ITEM_TIMEOUT_SECS")?.unwrap_or(90),
            use_local_classifier: env_bool("USE_LOCAL_CLASSIFIER")?.unwrap_or(true),
            classifier_url: env_opt("CLASSIFIER_URL"),
            use_ai_fallback: env_bool("USE_AI_FALLBACK")?.unwrap_or(true),
            enable_scheduler: env_bool("ENABLE_SCHEDULER")?.unwrap_or(true),
            sources_config_path: env_opt("SOURCES_CONFIG_PATH").map(PathBuf::from),
            quote_asset: env_opt("QUOTE_ASSET")
                .map(|s| s.to_ascii_uppercase())
                .unwrap_or_else(|| "USDT".to_string()),
            price_interval: env_opt("PRICE_INTERVAL").unwrap_or_else(|| "1h".to_string()),
        })
    }

    pub fn require_database_url(&self) -> anyhow::Result<&str> {
        self.database_url
            .as_deref()
            .context("DATABASE_URL is required")
    }

    pub fn require_gemini_api_key(&self) -> anyhow::Result<&str> {
        self.gemini_api_key
            .as_deref()
            .context("GEMINI_API_KEY is required")
    }

    pub fn item_timeout(&self) -> Duration {
        Duration::from_secs(self.item_timeout_secs.max(1))
    }

    pub fn max_text_chars(&self) -> usize {
        self.max_text_length.saturating_mul(4).max(1)
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_parse<T>(key: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env_opt(key) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{key}={raw:?} is invalid: {e}")),
        None => Ok(None),
    }
}

fn env_bool(key: &str) -> anyhow::Result<Option<bool>> {
    match env_opt(key) {
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => anyhow::bail!("{key}={raw:?} is not a boolean"),
        },
        None => Ok(None),
    }
}
