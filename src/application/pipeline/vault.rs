//! Phase 2: the quantitative veto layer. Correlation, beta and sector
//! exposure each get a hard say before any expensive AI spend.

use crate::config::Phase2Config;
use crate::domain::analysis::correlation::CorrelationAnalyzer;
use crate::domain::analysis::risk::{RiskCalculator, RiskMetrics};
use crate::domain::decision::ScreenerResult;
use crate::domain::ports::MarketData;
use crate::domain::types::{Candidate, Interval, StockQuote};
use crate::application::state_core::SharedState;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

const BENCHMARK_SYMBOL: &str = "SPY";
const HISTORY_DAYS: u32 = 60;
/// Sizing is not known yet in phase 2; sector exposure is checked against a
/// conservative estimate of one tenth of capital.
const ESTIMATED_POSITION_FRACTION: f64 = 0.10;

/// A candidate that cleared every phase-2 veto, with the artifacts later
/// phases reuse.
pub struct VaultSurvivor {
    pub candidate: Candidate,
    pub screener: ScreenerResult,
    pub metrics: RiskMetrics,
    pub beta_multiplier: f64,
    pub closes: Vec<f64>,
    pub sector: String,
}

pub struct Vault {
    risk_calc: RiskCalculator,
    correlation: CorrelationAnalyzer,
    market: Arc<dyn MarketData>,
    state: SharedState,
}

impl Vault {
    pub fn new(phase2: Phase2Config, market: Arc<dyn MarketData>, state: SharedState) -> Self {
        let correlation = CorrelationAnalyzer::new(phase2.max_correlation);
        Self {
            risk_calc: RiskCalculator::new(phase2),
            correlation,
            market,
            state,
        }
    }

    async fn closes_for(&self, symbol: &str) -> Option<Vec<f64>> {
        let candles = self
            .market
            .ohlcv(symbol, HISTORY_DAYS, Interval::Daily)
            .await
            .ok()?;
        Some(candles.into_iter().map(|c| c.close).collect())
    }

    /// Close series for every open position, skipping symbols with no data.
    async fn portfolio_closes(&self) -> HashMap<String, Vec<f64>> {
        let symbols = self.state.read().await.open_symbols();
        let mut out = HashMap::new();
        for symbol in symbols {
            if let Some(closes) = self.closes_for(&symbol).await {
                out.insert(symbol, closes);
            }
        }
        out
    }

    pub async fn assess(
        &self,
        inputs: Vec<(Candidate, ScreenerResult, StockQuote)>,
    ) -> Vec<VaultSurvivor> {
        let total = inputs.len();
        let benchmark = self.closes_for(BENCHMARK_SYMBOL).await.unwrap_or_default();
        let portfolio = self.portfolio_closes().await;

        let mut survivors = Vec::new();

        for (candidate, screener, quote) in inputs {
            let symbol = candidate.symbol.clone();

            // Missing history fails closed: no safety math, no entry.
            let Some(closes) = self.closes_for(&symbol).await else {
                warn!("{}: no price history, dropped in phase 2", symbol);
                continue;
            };
            if closes.len() < HISTORY_DAYS as usize {
                warn!(
                    "{}: only {} sessions of history, dropped in phase 2",
                    symbol,
                    closes.len()
                );
                continue;
            }

            // 1. Correlation veto against the live portfolio.
            let (allowed, violators) =
                self.correlation
                    .enforce_correlation_limit(&symbol, &closes, &portfolio);
            if !allowed {
                warn!("{}: vetoed, correlation above limit with {:?}", symbol, violators);
                continue;
            }

            // 2. Beta-adjusted sizing multiplier; zero is a rejection.
            let Some(metrics) = self.risk_calc.calculate_metrics(&closes, &benchmark, &symbol)
            else {
                warn!("{}: risk metrics unavailable, dropped in phase 2", symbol);
                continue;
            };
            let beta_multiplier = self
                .risk_calc
                .beta_adjustment(metrics.beta, quote.volume_ratio());
            if beta_multiplier == 0.0 {
                warn!(
                    "{}: vetoed, beta {:.2} without volume confirmation",
                    symbol, metrics.beta
                );
                continue;
            }

            // 3. Sector exposure against the estimated position value.
            let sector = quote
                .sector
                .clone()
                .unwrap_or_else(|| "Unknown".to_string());
            let estimated_value = {
                let state = self.state.read().await;
                state.capital() * ESTIMATED_POSITION_FRACTION
            };
            if let Err(veto) = self
                .state
                .read()
                .await
                .check_sector_exposure(&sector, estimated_value)
            {
                warn!("{}: vetoed, {}", symbol, veto);
                continue;
            }

            info!("{}: passed phase 2 (beta mult {:.2})", symbol, beta_multiplier);
            survivors.push(VaultSurvivor {
                candidate,
                screener,
                metrics,
                beta_multiplier,
                closes,
                sector,
            });
        }

        info!("phase 2 validated {}/{} candidates", survivors.len(), total);
        survivors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::state_core::StateCore;
    use crate::config::{LiquidityConfig, RiskConfig};
    use crate::domain::types::{CandidateSource, Direction, Position};
    use crate::infrastructure::market::MockMarketData;
    use chrono::Utc;

    fn wiggly(len: usize, phase: f64) -> Vec<f64> {
        (0..len)
            .map(|i| 100.0 + ((i as f64) * 0.8 + phase).sin() * 5.0)
            .collect()
    }

    fn leveraged(base: &[f64], factor: f64) -> Vec<f64> {
        let mut out = vec![100.0];
        for w in base.windows(2) {
            let r = (w[1] - w[0]) / w[0];
            let last = *out.last().unwrap();
            out.push(last * (1.0 + factor * r));
        }
        out
    }

    fn input(symbol: &str, volume_ratio_num: i64) -> (Candidate, ScreenerResult, StockQuote) {
        (
            Candidate::new(symbol, CandidateSource::Watchlist, 5.0, "test"),
            ScreenerResult {
                symbol: symbol.to_string(),
                score: 8.0,
                summary: String::new(),
                bias: Direction::Long,
                confidence: 0.7,
                passed: true,
                timestamp: Utc::now(),
            },
            StockQuote {
                symbol: symbol.to_string(),
                price: 100.0,
                volume: volume_ratio_num * 1_000_000,
                avg_volume: 1_000_000,
                sector: Some("Technology".to_string()),
                ..Default::default()
            },
        )
    }

    async fn state() -> SharedState {
        let state = StateCore::shared(RiskConfig::default(), Phase2Config::default());
        state
            .write()
            .await
            .initialize(100_000.0, Utc::now().date_naive());
        state
    }

    #[tokio::test]
    async fn clean_candidate_survives() {
        let market = MockMarketData::new(LiquidityConfig::default());
        market.set_closes("XYZ", &wiggly(80, 0.0)).await;
        market.set_closes("SPY", &wiggly(80, 2.1)).await;

        let vault = Vault::new(Phase2Config::default(), Arc::new(market), state().await);
        let survivors = vault.assess(vec![input("XYZ", 1)]).await;
        assert_eq!(survivors.len(), 1);
        assert!(survivors[0].beta_multiplier > 0.0);
        assert_eq!(survivors[0].sector, "Technology");
    }

    #[tokio::test]
    async fn missing_history_fails_closed() {
        let market = MockMarketData::new(LiquidityConfig::default());
        market.set_closes("SPY", &wiggly(80, 2.1)).await;

        let vault = Vault::new(Phase2Config::default(), Arc::new(market), state().await);
        let survivors = vault.assess(vec![input("NODATA", 1)]).await;
        assert!(survivors.is_empty());
    }

    #[tokio::test]
    async fn correlated_candidate_is_vetoed() {
        let base = wiggly(80, 0.0);
        let market = MockMarketData::new(LiquidityConfig::default());
        market.set_closes("XYZ", &base).await;
        // Open position tracks the same series almost exactly.
        let near_copy: Vec<f64> = base.iter().map(|p| p * 1.0005).collect();
        market.set_closes("MSFT", &near_copy).await;
        market.set_closes("SPY", &wiggly(80, 2.1)).await;

        let state = state().await;
        state
            .write()
            .await
            .add_position(Position {
                symbol: "MSFT".to_string(),
                direction: Direction::Long,
                entry_price: 100.0,
                quantity: 10,
                stop_loss: 97.0,
                take_profit: 110.0,
                entry_time: Utc::now(),
                current_price: 100.0,
                unrealized_pnl: 0.0,
                sector: "Technology".to_string(),
            })
            .unwrap();

        let vault = Vault::new(Phase2Config::default(), Arc::new(market), state);
        let survivors = vault.assess(vec![input("XYZ", 1)]).await;
        assert!(survivors.is_empty());
    }

    #[tokio::test]
    async fn high_beta_without_volume_is_vetoed() {
        let spy = wiggly(80, 0.0);
        let market = MockMarketData::new(LiquidityConfig::default());
        market.set_closes("SPY", &spy).await;
        // 3.2x leveraged vs the benchmark, volume ratio 1.4x.
        market.set_closes("HOT", &leveraged(&spy, 3.2)).await;

        let vault = Vault::new(Phase2Config::default(), Arc::new(market), state().await);
        let (candidate, screener, mut quote) = input("HOT", 1);
        quote.volume = 1_400_000;
        let survivors = vault.assess(vec![(candidate, screener, quote)]).await;
        assert!(survivors.is_empty());
    }

    #[tokio::test]
    async fn sector_exposure_veto_applies() {
        let market = MockMarketData::new(LiquidityConfig::default());
        market.set_closes("XYZ", &wiggly(80, 0.0)).await;
        market.set_closes("SPY", &wiggly(80, 2.1)).await;

        let state = state().await;
        // 15% of capital already in Technology; the 10% estimate breaches 20%.
        state
            .write()
            .await
            .add_position(Position {
                symbol: "AAPL".to_string(),
                direction: Direction::Long,
                entry_price: 150.0,
                quantity: 100,
                stop_loss: 140.0,
                take_profit: 170.0,
                entry_time: Utc::now(),
                current_price: 150.0,
                unrealized_pnl: 0.0,
                sector: "Technology".to_string(),
            })
            .unwrap();

        let vault = Vault::new(Phase2Config::default(), Arc::new(market), state);
        let survivors = vault.assess(vec![input("XYZ", 1)]).await;
        assert!(survivors.is_empty());
    }
}
