//! Primary news source: a Custom-Search JSON API with a persisted per-day
//! query budget. Misconfiguration, quota exhaustion or transport failure all
//! delegate to the fallback source.

use super::quota::QuotaCounter;
use crate::config::{HttpConfig, NewsConfig};
use crate::domain::ports::{Clock, NewsSource};
use crate::domain::types::NewsArticle;
use crate::infrastructure::http_client::retry_client;
use anyhow::Result;
use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use serde_json::Value;
use std::env;
use std::sync::Arc;
use tracing::{info, warn};

const API_URL: &str = "https://www.googleapis.com/customsearch/v1";

pub struct CseNewsSource {
    api_key: Option<String>,
    cse_id: Option<String>,
    quota: QuotaCounter,
    client: ClientWithMiddleware,
    fallback: Arc<dyn NewsSource>,
    clock: Clock,
}

impl CseNewsSource {
    pub fn from_env(
        config: &NewsConfig,
        http: &HttpConfig,
        fallback: Arc<dyn NewsSource>,
        clock: Clock,
    ) -> Self {
        let api_key = env::var("GOOGLE_SEARCH_API_KEY").ok();
        let cse_id = env::var("GOOGLE_CSE_ID").ok();
        let today = clock().date_naive();
        let quota = QuotaCounter::new(&config.quota_file, config.daily_quota, today);

        if api_key.is_some() && cse_id.is_some() {
            info!("primary news source configured (daily quota {})", config.daily_quota);
        } else {
            warn!("primary news source not configured, fallback only");
        }

        Self {
            api_key,
            cse_id,
            quota,
            client: retry_client(http),
            fallback,
            clock,
        }
    }

    async fn fetch_primary(
        &self,
        api_key: &str,
        cse_id: &str,
        symbol: &str,
        max_results: usize,
    ) -> Result<Vec<NewsArticle>> {
        let response = self
            .client
            .get(API_URL)
            .query(&[
                ("key", api_key),
                ("cx", cse_id),
                ("q", &format!("{} stock news", symbol)),
                ("num", &max_results.min(10).to_string()),
            ])
            .send()
            .await?;
        anyhow::ensure!(
            response.status().is_success(),
            "news search returned {}",
            response.status()
        );
        let payload: Value = response.json().await?;

        let articles = payload["items"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .map(|item| NewsArticle {
                        title: item["title"].as_str().unwrap_or("").to_string(),
                        summary: item["snippet"].as_str().unwrap_or("").to_string(),
                        url: item["link"].as_str().unwrap_or("").to_string(),
                        source: item["displayLink"].as_str().unwrap_or("web").to_string(),
                        published_at: None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(articles)
    }
}

#[async_trait]
impl NewsSource for CseNewsSource {
    async fn search(&self, symbol: &str, max_results: usize) -> Result<Vec<NewsArticle>> {
        let (Some(api_key), Some(cse_id)) = (self.api_key.clone(), self.cse_id.clone()) else {
            return self.fallback.search(symbol, max_results).await;
        };

        let today = (self.clock)().date_naive();
        if !self.quota.can_query(today).await {
            warn!(
                "news quota exhausted, using fallback source for {}",
                symbol
            );
            return self.fallback.search(symbol, max_results).await;
        }

        self.quota.increment(today).await;
        match self.fetch_primary(&api_key, &cse_id, symbol, max_results).await {
            Ok(articles) => Ok(articles),
            Err(e) => {
                warn!("primary news source failed for {}: {}, using fallback", symbol, e);
                self.fallback.search(symbol, max_results).await
            }
        }
    }
}
