//! Cross-asset correlation on daily returns, and the hard portfolio veto.

use crate::domain::analysis::risk::pct_changes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Minimum aligned observations before a correlation is trusted.
const MIN_OBSERVATIONS: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationResult {
    pub symbol_a: String,
    pub symbol_b: String,
    pub correlation: f64,
    pub is_problematic: bool,
}

pub struct CorrelationAnalyzer {
    max_correlation: f64,
}

impl CorrelationAnalyzer {
    pub fn new(max_correlation: f64) -> Self {
        Self { max_correlation }
    }

    pub fn max_correlation(&self) -> f64 {
        self.max_correlation
    }

    /// Pearson correlation between two close series. Series are aligned from
    /// the tail; fewer than 20 aligned return observations yields 0.0.
    pub fn correlation(&self, prices_a: &[f64], prices_b: &[f64]) -> f64 {
        let returns_a = pct_changes(prices_a);
        let returns_b = pct_changes(prices_b);
        let n = returns_a.len().min(returns_b.len());
        if n < MIN_OBSERVATIONS {
            debug!("insufficient aligned observations for correlation ({})", n);
            return 0.0;
        }

        let a = &returns_a[returns_a.len() - n..];
        let b = &returns_b[returns_b.len() - n..];

        let mean_a = a.iter().sum::<f64>() / n as f64;
        let mean_b = b.iter().sum::<f64>() / n as f64;

        let mut cov = 0.0;
        let mut var_a = 0.0;
        let mut var_b = 0.0;
        for i in 0..n {
            let da = a[i] - mean_a;
            let db = b[i] - mean_b;
            cov += da * db;
            var_a += da * da;
            var_b += db * db;
        }

        let denom = (var_a * var_b).sqrt();
        if denom > 0.0 {
            cov / denom
        } else {
            0.0
        }
    }

    /// Full matrix over the given series. Symmetric with unit diagonal.
    pub fn correlation_matrix(
        &self,
        price_data: &HashMap<String, Vec<f64>>,
    ) -> HashMap<(String, String), f64> {
        let mut matrix = HashMap::new();
        let symbols: Vec<&String> = price_data.keys().collect();

        for (i, a) in symbols.iter().enumerate() {
            matrix.insert(((*a).clone(), (*a).clone()), 1.0);
            for b in symbols.iter().skip(i + 1) {
                let corr = self.correlation(&price_data[*a], &price_data[*b]);
                matrix.insert(((*a).clone(), (*b).clone()), corr);
                matrix.insert(((*b).clone(), (*a).clone()), corr);
            }
        }
        matrix
    }

    /// Correlations of a prospective entry against every open position.
    pub fn check_portfolio(
        &self,
        new_symbol: &str,
        new_prices: &[f64],
        portfolio_prices: &HashMap<String, Vec<f64>>,
    ) -> Vec<CorrelationResult> {
        portfolio_prices
            .iter()
            .map(|(symbol, prices)| {
                let corr = self.correlation(new_prices, prices);
                let problematic = corr.abs() > self.max_correlation;
                if problematic {
                    warn!(
                        "High correlation detected: {} x {} = {:.3}",
                        new_symbol, symbol, corr
                    );
                }
                CorrelationResult {
                    symbol_a: new_symbol.to_string(),
                    symbol_b: symbol.clone(),
                    correlation: corr,
                    is_problematic: problematic,
                }
            })
            .collect()
    }

    /// HARD veto: a single |corr| above the limit rejects the new position.
    /// Returns (allowed, violating symbols).
    pub fn enforce_correlation_limit(
        &self,
        new_symbol: &str,
        new_prices: &[f64],
        portfolio_prices: &HashMap<String, Vec<f64>>,
    ) -> (bool, Vec<String>) {
        if portfolio_prices.is_empty() {
            debug!("correlation check for {}: passed (no open positions)", new_symbol);
            return (true, Vec::new());
        }

        let violators: Vec<String> = self
            .check_portfolio(new_symbol, new_prices, portfolio_prices)
            .into_iter()
            .filter(|r| r.is_problematic)
            .map(|r| r.symbol_b)
            .collect();

        if violators.is_empty() {
            info!(
                "correlation check for {}: passed (all < {:.2})",
                new_symbol, self.max_correlation
            );
            (true, violators)
        } else {
            warn!(
                "correlation veto: {} rejected, |corr| > {:.2} with {}",
                new_symbol,
                self.max_correlation,
                violators.join(", ")
            );
            (false, violators)
        }
    }
}
