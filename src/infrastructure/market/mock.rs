//! Deterministic in-memory market data for tests and offline paper runs.

use crate::config::LiquidityConfig;
use crate::domain::ports::MarketData;
use crate::domain::types::{Candle, Interval, MacroSnapshot, StockQuote};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct MockInner {
    quotes: HashMap<String, StockQuote>,
    daily_series: HashMap<String, Vec<Candle>>,
    intraday_series: HashMap<String, Vec<Candle>>,
    macro_snapshot: Option<MacroSnapshot>,
    unavailable: HashSet<String>,
}

#[derive(Clone)]
pub struct MockMarketData {
    inner: Arc<RwLock<MockInner>>,
    liquidity: LiquidityConfig,
}

impl MockMarketData {
    pub fn new(liquidity: LiquidityConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(MockInner::default())),
            liquidity,
        }
    }

    pub async fn set_quote(&self, quote: StockQuote) {
        self.inner.write().await.quotes.insert(quote.symbol.clone(), quote);
    }

    /// Shorthand for a liquid large-cap quote at the given price.
    pub async fn set_price(&self, symbol: &str, price: f64) {
        let quote = StockQuote {
            symbol: symbol.to_string(),
            price,
            open: price,
            high: price * 1.01,
            low: price * 0.99,
            close: price,
            volume: 5_000_000,
            avg_volume: 4_000_000,
            market_cap: 50_000_000_000.0,
            change_pct: 0.0,
            previous_close: Some(price),
            beta: Some(1.0),
            sector: Some("Technology".to_string()),
            industry: None,
        };
        self.set_quote(quote).await;
    }

    /// Install a daily close series; bars are synthesized around the closes.
    pub async fn set_closes(&self, symbol: &str, closes: &[f64]) {
        let start = Utc::now() - Duration::days(closes.len() as i64);
        let candles: Vec<Candle> = closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Candle {
                timestamp: start + Duration::days(i as i64),
                open: close * 0.998,
                high: close * 1.012,
                low: close * 0.988,
                close,
                volume: 2_000_000.0,
            })
            .collect();
        self.inner
            .write()
            .await
            .daily_series
            .insert(symbol.to_string(), candles);
    }

    pub async fn set_intraday(&self, symbol: &str, candles: Vec<Candle>) {
        self.inner
            .write()
            .await
            .intraday_series
            .insert(symbol.to_string(), candles);
    }

    pub async fn set_macro(&self, snapshot: MacroSnapshot) {
        self.inner.write().await.macro_snapshot = Some(snapshot);
    }

    /// Mark a symbol as having no data at all.
    pub async fn set_unavailable(&self, symbol: &str) {
        self.inner.write().await.unavailable.insert(symbol.to_string());
    }
}

#[async_trait]
impl MarketData for MockMarketData {
    async fn quote(&self, symbol: &str) -> Result<StockQuote> {
        let inner = self.inner.read().await;
        if inner.unavailable.contains(symbol) {
            anyhow::bail!("no market data for {}", symbol);
        }
        inner
            .quotes
            .get(symbol)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no market data for {}", symbol))
    }

    async fn ohlcv(&self, symbol: &str, days: u32, interval: Interval) -> Result<Vec<Candle>> {
        let inner = self.inner.read().await;
        if inner.unavailable.contains(symbol) {
            anyhow::bail!("no history for {}", symbol);
        }
        let series = match interval {
            Interval::Daily => &inner.daily_series,
            Interval::FiveMinute => &inner.intraday_series,
        };
        let candles = series
            .get(symbol)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no history for {}", symbol))?;
        let keep = candles.len().min(days as usize);
        Ok(candles[candles.len() - keep..].to_vec())
    }

    async fn check_liquidity(&self, symbol: &str) -> Result<bool> {
        let quote = self.quote(symbol).await?;
        let dollar_volume = quote.avg_volume as f64 * quote.price;
        Ok(quote.avg_volume >= self.liquidity.min_avg_volume
            && dollar_volume >= self.liquidity.min_dollar_volume)
    }

    async fn macro_snapshot(&self) -> Result<MacroSnapshot> {
        Ok(self
            .inner
            .read()
            .await
            .macro_snapshot
            .clone()
            .unwrap_or_default())
    }
}
