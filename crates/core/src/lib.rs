pub mod config;
pub mod correlation;
pub mod crawl;
pub mod domain;
pub mod extract;
pub mod feed;
pub mod fetch;
pub mod health;
pub mod jobs;
pub mod llm;
pub mod sentiment;
pub mod storage;

/// Rounds to 4 decimal places, the precision scores and price changes are stored with.
pub fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}
