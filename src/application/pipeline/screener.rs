//! Phase 1: cheap AI triage over the phase-0 survivors.

use crate::config::AiConfig;
use crate::domain::analysis::technical::TechnicalSignals;
use crate::domain::decision::ScreenerResult;
use crate::domain::types::{Candidate, Direction, StockQuote};
use crate::infrastructure::ai::{AiGateway, AiProvider};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info};

/// AI calls issued concurrently inside one batch.
const BATCH_WORKERS: usize = 3;

/// Everything the screener needs to judge one candidate.
pub struct ScreenerInput {
    pub candidate: Candidate,
    pub quote: StockQuote,
    pub technical: Option<TechnicalSignals>,
    pub news_summary: String,
}

pub struct Screener {
    threshold: f64,
    ai: Arc<AiGateway>,
}

impl Screener {
    pub fn new(config: &AiConfig, ai: Arc<AiGateway>) -> Self {
        Self {
            threshold: config.screener_threshold,
            ai,
        }
    }

    /// Drop inputs whose symbol already has an open position.
    pub fn filter_duplicates(
        &self,
        inputs: Vec<ScreenerInput>,
        open_symbols: &HashSet<String>,
    ) -> Vec<ScreenerInput> {
        let before = inputs.len();
        let kept: Vec<ScreenerInput> = inputs
            .into_iter()
            .filter(|input| !open_symbols.contains(&input.candidate.symbol))
            .collect();
        if kept.len() < before {
            info!(
                "screener: dropped {} candidates already in portfolio",
                before - kept.len()
            );
        }
        kept
    }

    /// Triage a batch with bounded concurrency, ordered by score descending.
    pub async fn screen_batch(&self, inputs: Vec<ScreenerInput>) -> Vec<ScreenerResult> {
        let mut results: Vec<ScreenerResult> = stream::iter(inputs)
            .map(|input| async move { self.screen(&input).await })
            .buffer_unordered(BATCH_WORKERS)
            .collect()
            .await;

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let passed = results.iter().filter(|r| r.passed).count();
        info!("screener: {}/{} candidates passed", passed, results.len());
        results
    }

    pub async fn screen(&self, input: &ScreenerInput) -> ScreenerResult {
        let symbol = input.candidate.symbol.clone();
        let prompt = self.build_prompt(input);

        let response = self
            .ai
            .complete(&prompt, "", AiProvider::GeminiFlash, 0.3, 500)
            .await;

        let Some(json) = response.parsed_json.filter(|_| response.success) else {
            error!("screener failed for {}", symbol);
            return ScreenerResult::failed(symbol);
        };

        let score = json["nota"].as_f64().unwrap_or(0.0);
        let bias = json["vies"]
            .as_str()
            .or_else(|| json["viés"].as_str())
            .map(Direction::parse)
            .unwrap_or(Direction::Neutro);

        ScreenerResult {
            symbol,
            score,
            summary: json["resumo"].as_str().unwrap_or("").to_string(),
            bias,
            confidence: json["confianca"].as_f64().unwrap_or(0.0),
            passed: score >= self.threshold,
            timestamp: Utc::now(),
        }
    }

    pub fn passed_candidates(&self, results: &[ScreenerResult]) -> Vec<ScreenerResult> {
        results.iter().filter(|r| r.passed).cloned().collect()
    }

    fn build_prompt(&self, input: &ScreenerInput) -> String {
        let quote = &input.quote;
        let (rsi, volume_ratio, supertrend) = match &input.technical {
            Some(t) => (
                format!("{:.1}", t.rsi),
                format!("{:.2}", t.volume_ratio),
                if t.supertrend_bullish { "bullish" } else { "bearish" }.to_string(),
            ),
            None => ("?".to_string(), "?".to_string(), "neutral".to_string()),
        };
        let news = if input.news_summary.is_empty() {
            "Sem noticias recentes"
        } else {
            input.news_summary.as_str()
        };

        format!(
            "Voce e o SCREENER de um sistema de trading. Analise {symbol} e de uma nota de 0 a 10.\n\
             \n\
             Dados de mercado:\n\
             - Preco: ${price:.2}\n\
             - Variacao: {change:.2}%\n\
             - Volume ratio: {volume_ratio}x\n\
             - RSI: {rsi}\n\
             - SuperTrend: {supertrend}\n\
             - Motivo do radar: {reason}\n\
             \n\
             Noticias:\n{news}\n\
             \n\
             Responda APENAS em JSON:\n\
             {{\"ticker\": \"{symbol}\", \"nota\": 0.0, \"resumo\": \"\", \"vies\": \"LONG|SHORT|NEUTRO\", \"confianca\": 0.0}}",
            symbol = input.candidate.symbol,
            price = quote.price,
            change = quote.change_pct,
            volume_ratio = volume_ratio,
            rsi = rsi,
            supertrend = supertrend,
            reason = input.candidate.reason,
            news = news,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::CandidateSource;
    use crate::infrastructure::ai::{AiClient, AiResponse};
    use async_trait::async_trait;

    struct CannedClient {
        content: String,
        fail: bool,
    }

    #[async_trait]
    impl AiClient for CannedClient {
        fn model(&self) -> &str {
            "canned"
        }

        async fn complete(&self, _: &str, _: &str, _: f64, _: u32) -> AiResponse {
            if self.fail {
                AiResponse::failure(AiProvider::GeminiFlash, "canned", "down")
            } else {
                AiResponse::success(AiProvider::GeminiFlash, "canned", self.content.clone(), 42)
            }
        }
    }

    fn gateway(content: &str, fail: bool) -> Arc<AiGateway> {
        Arc::new(AiGateway::with_clients(vec![(
            AiProvider::GeminiFlash,
            Arc::new(CannedClient {
                content: content.to_string(),
                fail,
            }),
        )]))
    }

    fn input(symbol: &str) -> ScreenerInput {
        ScreenerInput {
            candidate: Candidate::new(symbol, CandidateSource::Watchlist, 5.0, "watchlist"),
            quote: StockQuote {
                symbol: symbol.to_string(),
                price: 100.0,
                ..Default::default()
            },
            technical: None,
            news_summary: String::new(),
        }
    }

    #[tokio::test]
    async fn passing_score_sets_passed_flag() {
        let screener = Screener::new(
            &AiConfig::default(),
            gateway("{\"nota\": 8.5, \"resumo\": \"forte\", \"vies\": \"LONG\", \"confianca\": 0.8}", false),
        );
        let result = screener.screen(&input("AAPL")).await;
        assert!(result.passed);
        assert_eq!(result.score, 8.5);
        assert_eq!(result.bias, Direction::Long);
    }

    #[tokio::test]
    async fn threshold_boundary_is_inclusive() {
        let screener = Screener::new(
            &AiConfig::default(),
            gateway("{\"nota\": 7.0, \"vies\": \"NEUTRO\"}", false),
        );
        let result = screener.screen(&input("MSFT")).await;
        assert!(result.passed);

        let screener = Screener::new(
            &AiConfig::default(),
            gateway("{\"nota\": 6.99, \"vies\": \"NEUTRO\"}", false),
        );
        let result = screener.screen(&input("MSFT")).await;
        assert!(!result.passed);
    }

    #[tokio::test]
    async fn ai_failure_yields_failed_result() {
        let screener = Screener::new(&AiConfig::default(), gateway("", true));
        let result = screener.screen(&input("TSLA")).await;
        assert!(!result.passed);
        assert_eq!(result.score, 0.0);
    }

    #[tokio::test]
    async fn batch_is_sorted_and_duplicates_filtered() {
        let screener = Screener::new(
            &AiConfig::default(),
            gateway("{\"nota\": 7.5, \"vies\": \"LONG\", \"confianca\": 0.6}", false),
        );

        let mut open = HashSet::new();
        open.insert("MSFT".to_string());

        let inputs = vec![input("AAPL"), input("MSFT"), input("NVDA")];
        let kept = screener.filter_duplicates(inputs, &open);
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|i| i.candidate.symbol != "MSFT"));

        let results = screener.screen_batch(kept).await;
        assert_eq!(results.len(), 2);
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
    }
}
