//! Scriptable news source for tests and offline runs.

use crate::domain::ports::NewsSource;
use crate::domain::types::NewsArticle;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone, Default)]
pub struct MockNewsSource {
    articles: Arc<RwLock<HashMap<String, Vec<NewsArticle>>>>,
}

impl MockNewsSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push_article(&self, symbol: &str, title: &str, summary: &str) {
        self.articles
            .write()
            .await
            .entry(symbol.to_string())
            .or_default()
            .push(NewsArticle {
                title: title.to_string(),
                summary: summary.to_string(),
                url: format!("https://example.com/{}", symbol.to_lowercase()),
                source: "mock".to_string(),
                published_at: Some(Utc::now()),
            });
    }

    pub async fn clear(&self, symbol: &str) {
        self.articles.write().await.remove(symbol);
    }
}

#[async_trait]
impl NewsSource for MockNewsSource {
    async fn search(&self, symbol: &str, max_results: usize) -> Result<Vec<NewsArticle>> {
        Ok(self
            .articles
            .read()
            .await
            .get(symbol)
            .map(|articles| articles.iter().take(max_results).cloned().collect())
            .unwrap_or_default())
    }
}
