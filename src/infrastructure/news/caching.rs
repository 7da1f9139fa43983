//! Per-symbol in-memory article cache in front of any news source.

use crate::domain::ports::NewsSource;
use crate::domain::types::NewsArticle;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

pub struct CachingNews {
    inner: Arc<dyn NewsSource>,
    ttl: Duration,
    cache: RwLock<HashMap<String, (Instant, Vec<NewsArticle>)>>,
}

impl CachingNews {
    pub fn new(inner: Arc<dyn NewsSource>, ttl_hours: i64) -> Self {
        Self {
            inner,
            ttl: Duration::from_secs((ttl_hours.max(0) as u64) * 3600),
            cache: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl NewsSource for CachingNews {
    async fn search(&self, symbol: &str, max_results: usize) -> Result<Vec<NewsArticle>> {
        if let Some((at, articles)) = self.cache.read().await.get(symbol) {
            if at.elapsed() < self.ttl {
                debug!("news cache hit for {}", symbol);
                return Ok(articles.iter().take(max_results).cloned().collect());
            }
        }

        let articles = self.inner.search(symbol, max_results).await?;
        self.cache
            .write()
            .await
            .insert(symbol.to_string(), (Instant::now(), articles.clone()));
        Ok(articles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl NewsSource for CountingSource {
        async fn search(&self, symbol: &str, _max: usize) -> Result<Vec<NewsArticle>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![NewsArticle {
                title: format!("{} headline", symbol),
                summary: String::new(),
                url: String::new(),
                source: "test".to_string(),
                published_at: None,
            }])
        }
    }

    #[tokio::test]
    async fn second_lookup_is_served_from_cache() {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
        });
        let caching = CachingNews::new(source.clone(), 4);

        let first = caching.search("AAPL", 5).await.unwrap();
        let second = caching.search("AAPL", 5).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        // Different symbol misses.
        caching.search("MSFT", 5).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }
}
