//! Fallback news source: a Google-News-style RSS query feed per symbol.

use crate::config::HttpConfig;
use crate::domain::ports::NewsSource;
use crate::domain::types::NewsArticle;
use crate::infrastructure::http_client::retry_client;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest_middleware::ClientWithMiddleware;
use ::rss::Channel;
use std::io::Cursor;
use tracing::debug;

const FEED_BASE: &str = "https://news.google.com/rss/search";

pub struct RssNewsSource {
    client: ClientWithMiddleware,
}

impl RssNewsSource {
    pub fn new(http: &HttpConfig) -> Self {
        Self {
            client: retry_client(http),
        }
    }
}

#[async_trait]
impl NewsSource for RssNewsSource {
    async fn search(&self, symbol: &str, max_results: usize) -> Result<Vec<NewsArticle>> {
        let url = format!(
            "{}?q={}+stock&hl=en-US&gl=US&ceid=US:en",
            FEED_BASE, symbol
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("rss feed request failed for {}", symbol))?;
        let bytes = response
            .bytes()
            .await
            .context("failed to read rss feed body")?;
        let channel =
            Channel::read_from(Cursor::new(bytes)).context("failed to parse rss feed")?;

        let articles: Vec<NewsArticle> = channel
            .items()
            .iter()
            .take(max_results)
            .map(|item| NewsArticle {
                title: item.title().unwrap_or("").to_string(),
                summary: item.description().unwrap_or("").to_string(),
                url: item.link().unwrap_or("").to_string(),
                source: item
                    .source()
                    .and_then(|s| s.title().map(str::to_string))
                    .unwrap_or_else(|| "rss".to_string()),
                published_at: item
                    .pub_date()
                    .and_then(|d| DateTime::parse_from_rfc2822(d).ok())
                    .map(|d| d.with_timezone(&Utc)),
            })
            .collect();

        debug!("rss: {} articles for {}", articles.len(), symbol);
        Ok(articles)
    }
}
