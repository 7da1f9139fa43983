//! Fact-grounding over a web search. A news claim is verified when enough of
//! the search results overlap with it; results are cached for an hour.

use crate::domain::ports::{Grounding, GroundingVerdict, NewsSource};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

const CACHE_TTL: Duration = Duration::from_secs(3600);
const MIN_SHARED_WORDS: usize = 3;

pub struct SearchGrounding {
    search: Arc<dyn NewsSource>,
    cache: RwLock<HashMap<String, (Instant, GroundingVerdict)>>,
}

impl SearchGrounding {
    pub fn new(search: Arc<dyn NewsSource>) -> Self {
        Self {
            search,
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn claim_words(claim: &str) -> HashSet<String> {
        claim
            .to_lowercase()
            .split_whitespace()
            .filter(|w| w.len() > 2)
            .map(str::to_string)
            .collect()
    }
}

#[async_trait]
impl Grounding for SearchGrounding {
    async fn verify(&self, symbol: &str, news: &str) -> Result<GroundingVerdict> {
        let cache_key = format!("{}:{:.80}", symbol, news);
        if let Some((at, verdict)) = self.cache.read().await.get(&cache_key) {
            if at.elapsed() < CACHE_TTL {
                return Ok(verdict.clone());
            }
        }

        let results = self.search.search(symbol, 5).await.unwrap_or_default();
        if results.is_empty() {
            return Ok(GroundingVerdict {
                verified: false,
                confidence: 0.0,
                sources: Vec::new(),
                summary: "no search results".to_string(),
            });
        }

        let claim = Self::claim_words(news);
        let mut matches = 0usize;
        for article in &results {
            let text = format!("{} {}", article.title, article.summary).to_lowercase();
            let words: HashSet<&str> = text.split_whitespace().collect();
            let shared = claim.iter().filter(|w| words.contains(w.as_str())).count();
            if shared >= MIN_SHARED_WORDS {
                matches += 1;
            }
        }

        let confidence = (matches as f64 / results.len() as f64).min(1.0);
        let verdict = GroundingVerdict {
            verified: confidence >= 0.5,
            confidence,
            sources: results.iter().take(3).map(|a| a.url.clone()).collect(),
            summary: results
                .first()
                .map(|a| a.summary.clone())
                .unwrap_or_default(),
        };

        debug!(
            "grounding {}: {}/{} results overlap (confidence {:.2})",
            symbol,
            matches,
            results.len(),
            confidence
        );

        self.cache
            .write()
            .await
            .insert(cache_key, (Instant::now(), verdict.clone()));
        Ok(verdict)
    }
}

/// Scriptable grounding for tests.
#[derive(Clone, Default)]
pub struct MockGrounding {
    verdicts: Arc<RwLock<HashMap<String, GroundingVerdict>>>,
}

impl MockGrounding {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_verdict(&self, symbol: &str, verdict: GroundingVerdict) {
        self.verdicts.write().await.insert(symbol.to_string(), verdict);
    }
}

#[async_trait]
impl Grounding for MockGrounding {
    async fn verify(&self, symbol: &str, _news: &str) -> Result<GroundingVerdict> {
        Ok(self
            .verdicts
            .read()
            .await
            .get(symbol)
            .cloned()
            .unwrap_or(GroundingVerdict {
                verified: true,
                confidence: 1.0,
                sources: vec!["https://example.com/verified".to_string()],
                summary: String::new(),
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::news::MockNewsSource;

    #[tokio::test]
    async fn overlapping_results_verify_the_claim() {
        let news = MockNewsSource::new();
        news.push_article(
            "ACME",
            "ACME wins major defense contract worth billions",
            "The company announced a major defense contract today",
        )
        .await;
        news.push_article(
            "ACME",
            "ACME contract award confirmed by pentagon sources",
            "major defense contract confirmed",
        )
        .await;

        let grounding = SearchGrounding::new(Arc::new(news));
        let verdict = grounding
            .verify("ACME", "ACME wins major defense contract")
            .await
            .unwrap();
        assert!(verdict.verified);
        assert!(verdict.confidence >= 0.5);
        assert!(!verdict.sources.is_empty());
    }

    #[tokio::test]
    async fn no_results_means_unverified() {
        let grounding = SearchGrounding::new(Arc::new(MockNewsSource::new()));
        let verdict = grounding.verify("GHOST", "anything at all").await.unwrap();
        assert!(!verdict.verified);
        assert_eq!(verdict.confidence, 0.0);
    }
}
