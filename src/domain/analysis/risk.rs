//! Risk metrics for one asset against a benchmark: beta, annualized
//! volatility, Sharpe, max drawdown, VaR/CVaR, plus the beta-adjusted sizing
//! multiplier and the Kelly fraction used as a sizing hint.

use crate::config::Phase2Config;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use tracing::{info, warn};

const TRADING_DAYS: f64 = 252.0;
const RISK_FREE_RATE: f64 = 0.05;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskMetrics {
    pub symbol: String,
    pub beta: f64,
    pub volatility_20d: f64,
    pub volatility_60d: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub var_95: f64,
    pub cvar_95: f64,
}

pub struct RiskCalculator {
    config: Phase2Config,
}

impl RiskCalculator {
    pub fn new(config: Phase2Config) -> Self {
        Self { config }
    }

    /// Full metric set from close series (oldest first). Returns None below
    /// 60 observations; safety checks must not run on thin data.
    pub fn calculate_metrics(
        &self,
        closes: &[f64],
        benchmark_closes: &[f64],
        symbol: &str,
    ) -> Option<RiskMetrics> {
        if closes.len() < 60 {
            warn!("{}: insufficient history for risk metrics ({})", symbol, closes.len());
            return None;
        }

        let returns = pct_changes(closes);
        let beta = self.beta(closes, benchmark_closes);

        let vol_20d = annualized_vol(&returns[returns.len().saturating_sub(20)..]);
        let vol_60d = annualized_vol(&returns[returns.len().saturating_sub(60)..]);

        let std_dev = returns.as_slice().std_dev();
        let sharpe = if std_dev > 0.0 {
            (returns.as_slice().mean() * TRADING_DAYS - RISK_FREE_RATE)
                / (std_dev * TRADING_DAYS.sqrt())
        } else {
            0.0
        };

        Some(RiskMetrics {
            symbol: symbol.to_string(),
            beta,
            volatility_20d: vol_20d,
            volatility_60d: vol_60d,
            sharpe_ratio: sharpe,
            max_drawdown: max_drawdown(closes),
            var_95: var_95(&returns),
            cvar_95: cvar_95(&returns),
        })
    }

    /// Beta vs the benchmark over aligned daily returns; 1.0 when fewer than
    /// 20 aligned observations or degenerate benchmark variance.
    pub fn beta(&self, closes: &[f64], benchmark_closes: &[f64]) -> f64 {
        let asset = pct_changes(closes);
        let bench = pct_changes(benchmark_closes);
        let n = asset.len().min(bench.len());
        if n < 20 {
            return 1.0;
        }

        let asset = &asset[asset.len() - n..];
        let bench = &bench[bench.len() - n..];

        let asset_mean = asset.mean();
        let bench_mean = bench.mean();

        let mut covariance = 0.0;
        let mut variance = 0.0;
        for i in 0..n {
            covariance += (asset[i] - asset_mean) * (bench[i] - bench_mean);
            variance += (bench[i] - bench_mean) * (bench[i] - bench_mean);
        }

        if variance > 0.0 {
            covariance / variance
        } else {
            1.0
        }
    }

    /// Sizing multiplier from beta and the volume confirmation:
    /// < beta_normal -> 1.0; [beta_normal, beta_aggressive) -> 0.75;
    /// >= beta_aggressive with volume_ratio >= 2.0 -> 0.5, else 0.0 (reject).
    pub fn beta_adjustment(&self, beta: f64, volume_ratio: f64) -> f64 {
        let normal = self.config.beta_normal;
        let aggressive = self.config.beta_aggressive;

        if beta < normal {
            1.0
        } else if beta < aggressive {
            info!(
                "Beta {:.2} in aggressive range [{:.1}-{:.1}), reducing position to 75%",
                beta, normal, aggressive
            );
            0.75
        } else if volume_ratio >= 2.0 {
            warn!(
                "Beta {:.2} >= {:.1} but volume {:.1}x confirms, reducing to 50%",
                beta, aggressive, volume_ratio
            );
            0.5
        } else {
            warn!(
                "Beta {:.2} >= {:.1} without volume confirmation ({:.1}x < 2.0x), rejecting",
                beta, aggressive, volume_ratio
            );
            0.0
        }
    }

    /// Half-Kelly sizing fraction, capped at 0.25 and floored at 0.
    pub fn kelly_fraction(&self, win_rate: f64, avg_win: f64, avg_loss: f64) -> f64 {
        if avg_loss == 0.0 {
            return 0.0;
        }
        let win_loss_ratio = avg_win / avg_loss.abs();
        if win_loss_ratio <= 0.0 {
            return 0.0;
        }
        let kelly = win_rate - (1.0 - win_rate) / win_loss_ratio;
        (kelly * 0.5).clamp(0.0, 0.25)
    }
}

/// Simple percentage changes between consecutive values.
pub fn pct_changes(values: &[f64]) -> Vec<f64> {
    values
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect()
}

fn annualized_vol(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    returns.std_dev() * TRADING_DAYS.sqrt() * 100.0
}

/// Largest peak-to-trough loss, in percent.
pub fn max_drawdown(closes: &[f64]) -> f64 {
    let mut peak = f64::MIN;
    let mut worst = 0.0f64;
    for &price in closes {
        peak = peak.max(price);
        if peak > 0.0 {
            worst = worst.max((peak - price) / peak);
        }
    }
    worst * 100.0
}

fn percentile_5(returns: &[f64]) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let mut sorted = returns.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let rank = 0.05 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let weight = rank - lower as f64;
        sorted[lower] * (1.0 - weight) + sorted[upper] * weight
    }
}

fn var_95(returns: &[f64]) -> f64 {
    percentile_5(returns).abs() * 100.0
}

fn cvar_95(returns: &[f64]) -> f64 {
    let threshold = percentile_5(returns);
    let tail: Vec<f64> = returns.iter().copied().filter(|r| *r <= threshold).collect();
    if tail.is_empty() {
        return 0.0;
    }
    tail.as_slice().mean().abs() * 100.0
}
