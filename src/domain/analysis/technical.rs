//! Technical signals derived from daily OHLCV bars.
//!
//! RSI, EMA and ATR come from the `ta` crate; SuperTrend is composed on top
//! of ATR since `ta` does not ship it. Pivot-based support/resistance and the
//! SMA-stacking trend classification follow the rest of the analytics layer.

use crate::config::TechnicalConfig;
use crate::domain::types::{Candle, Direction};
use serde::{Deserialize, Serialize};
use ta::indicators::{AverageTrueRange, ExponentialMovingAverage, RelativeStrengthIndex};
use ta::{DataItem, Next};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendClass {
    Uptrend,
    Downtrend,
    Sideways,
}

impl std::fmt::Display for TrendClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrendClass::Uptrend => write!(f, "uptrend"),
            TrendClass::Downtrend => write!(f, "downtrend"),
            TrendClass::Sideways => write!(f, "sideways"),
        }
    }
}

/// Consolidated technical snapshot for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechnicalSignals {
    pub symbol: String,
    pub rsi: f64,
    pub rsi_signal: String,
    pub atr: f64,
    pub atr_percent: f64,
    pub supertrend: f64,
    pub supertrend_bullish: bool,
    pub volume_ratio: f64,
    pub support: f64,
    pub resistance: f64,
    pub trend: TrendClass,
    pub ema_20: f64,
    pub ema_50: f64,
    pub avg_volume_20d: f64,
    pub dollar_volume: f64,
}

/// Stop and target levels derived from ATR.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StopLevels {
    pub stop_loss: f64,
    pub take_profit_1: f64,
    pub take_profit_2: f64,
    pub risk_reward_ratio: f64,
}

pub struct TechnicalAnalyzer {
    config: TechnicalConfig,
}

impl TechnicalAnalyzer {
    pub fn new(config: TechnicalConfig) -> Self {
        Self { config }
    }

    /// Full analysis over daily bars (oldest first). Returns None when the
    /// series is too short to be meaningful (< 20 bars).
    pub fn analyze(&self, candles: &[Candle], symbol: &str) -> Option<TechnicalSignals> {
        if candles.len() < 20 {
            warn!("{}: insufficient bars for technical analysis ({})", symbol, candles.len());
            return None;
        }

        let last = candles.last()?;

        let rsi = self.rsi(candles)?;
        let atr = self.atr(candles)?;
        let atr_percent = if last.close > 0.0 { atr / last.close * 100.0 } else { 0.0 };
        let (supertrend, supertrend_bullish) = self.supertrend(candles)?;

        let avg_volume_20d = mean(candles.iter().rev().take(20).map(|c| c.volume));
        let volume_ratio = if avg_volume_20d > 0.0 { last.volume / avg_volume_20d } else { 1.0 };
        let dollar_volume = last.volume * last.close;

        let ema_20 = ema(candles, 20).unwrap_or(0.0);
        let ema_50 = if candles.len() >= 50 { ema(candles, 50).unwrap_or(0.0) } else { 0.0 };

        let (support, resistance) = pivot_levels(candles);

        Some(TechnicalSignals {
            symbol: symbol.to_string(),
            rsi,
            rsi_signal: rsi_signal(rsi).to_string(),
            atr,
            atr_percent,
            supertrend,
            supertrend_bullish,
            volume_ratio,
            support,
            resistance,
            trend: classify_trend(candles),
            ema_20,
            ema_50,
            avg_volume_20d,
            dollar_volume,
        })
    }

    fn rsi(&self, candles: &[Candle]) -> Option<f64> {
        let mut indicator = RelativeStrengthIndex::new(self.config.rsi_period).ok()?;
        let mut value = 50.0;
        for candle in candles {
            value = indicator.next(candle.close);
        }
        Some(value)
    }

    fn atr(&self, candles: &[Candle]) -> Option<f64> {
        let mut indicator = AverageTrueRange::new(self.config.atr_period).ok()?;
        let mut value = 0.0;
        for candle in candles {
            let item = DataItem::builder()
                .open(candle.open)
                .high(candle.high)
                .low(candle.low)
                .close(candle.close)
                .volume(candle.volume)
                .build()
                .ok()?;
            value = indicator.next(&item);
        }
        Some(value)
    }

    /// SuperTrend(length, multiplier) over the ATR band midpoints. Returns
    /// the current band value and whether the regime is bullish.
    fn supertrend(&self, candles: &[Candle]) -> Option<(f64, bool)> {
        let period = self.config.supertrend_period;
        let mult = self.config.supertrend_multiplier;
        if candles.len() <= period {
            return None;
        }

        let mut atr = AverageTrueRange::new(period).ok()?;
        let mut upper_band = 0.0;
        let mut lower_band = 0.0;
        let mut supertrend = 0.0;
        let mut bullish = true;

        for (i, candle) in candles.iter().enumerate() {
            let item = DataItem::builder()
                .open(candle.open)
                .high(candle.high)
                .low(candle.low)
                .close(candle.close)
                .volume(candle.volume)
                .build()
                .ok()?;
            let atr_value = atr.next(&item);
            if i < period {
                continue;
            }

            let mid = (candle.high + candle.low) / 2.0;
            let basic_upper = mid + mult * atr_value;
            let basic_lower = mid - mult * atr_value;
            let prev_close = candles[i - 1].close;

            // Bands only ratchet in the direction of the trend.
            upper_band = if basic_upper < upper_band || prev_close > upper_band || upper_band == 0.0 {
                basic_upper
            } else {
                upper_band
            };
            lower_band = if basic_lower > lower_band || prev_close < lower_band || lower_band == 0.0 {
                basic_lower
            } else {
                lower_band
            };

            bullish = if candle.close > upper_band {
                true
            } else if candle.close < lower_band {
                false
            } else {
                bullish
            };
            supertrend = if bullish { lower_band } else { upper_band };
        }

        Some((supertrend, bullish))
    }

    /// Stop/TP levels from ATR: stop at 1.5 ATR, targets at k and 1.5k ATR.
    pub fn stop_levels(
        &self,
        entry_price: f64,
        atr: f64,
        direction: Direction,
        risk_multiplier: f64,
    ) -> StopLevels {
        let (stop, tp1, tp2) = match direction {
            Direction::Short => (
                entry_price + 1.5 * atr,
                entry_price - risk_multiplier * atr,
                entry_price - risk_multiplier * 1.5 * atr,
            ),
            _ => (
                entry_price - 1.5 * atr,
                entry_price + risk_multiplier * atr,
                entry_price + risk_multiplier * 1.5 * atr,
            ),
        };
        StopLevels {
            stop_loss: round2(stop),
            take_profit_1: round2(tp1),
            take_profit_2: round2(tp2),
            risk_reward_ratio: risk_multiplier,
        }
    }
}

fn rsi_signal(rsi: f64) -> &'static str {
    if rsi < 30.0 {
        "oversold"
    } else if rsi > 70.0 {
        "overbought"
    } else {
        "neutral"
    }
}

/// support = 2*pivot - high20, resistance = 2*pivot - low20.
fn pivot_levels(candles: &[Candle]) -> (f64, f64) {
    let window = &candles[candles.len().saturating_sub(20)..];
    let high = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let low = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    let close = candles.last().map(|c| c.close).unwrap_or(0.0);
    let pivot = (high + low + close) / 3.0;
    (2.0 * pivot - high, 2.0 * pivot - low)
}

fn classify_trend(candles: &[Candle]) -> TrendClass {
    if candles.len() < 50 {
        return TrendClass::Sideways;
    }
    let sma_20 = mean(candles.iter().rev().take(20).map(|c| c.close));
    let sma_50 = mean(candles.iter().rev().take(50).map(|c| c.close));
    let price = candles.last().map(|c| c.close).unwrap_or(0.0);

    if price > sma_20 && sma_20 > sma_50 {
        TrendClass::Uptrend
    } else if price < sma_20 && sma_20 < sma_50 {
        TrendClass::Downtrend
    } else {
        TrendClass::Sideways
    }
}

fn ema(candles: &[Candle], period: usize) -> Option<f64> {
    let mut indicator = ExponentialMovingAverage::new(period).ok()?;
    let mut value = 0.0;
    for candle in candles {
        value = indicator.next(candle.close);
    }
    Some(value)
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let collected: Vec<f64> = values.collect();
    if collected.is_empty() {
        return 0.0;
    }
    collected.iter().sum::<f64>() / collected.len() as f64
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
