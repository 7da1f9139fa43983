//! HTTP market-data adapter over Yahoo-style chart and quote endpoints.
//!
//! All calls go through the retry-wrapped client. Quotes are cached for 60
//! seconds per symbol so the guardian loops do not hammer the vendor.

use crate::config::{HttpConfig, LiquidityConfig};
use crate::domain::ports::MarketData;
use crate::domain::types::{
    Candle, Interval, MacroSnapshot, MarketTrend, StockQuote, VixRegime,
};
use crate::infrastructure::http_client::retry_client;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest_middleware::ClientWithMiddleware;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

const CHART_BASE: &str = "https://query1.finance.yahoo.com/v8/finance/chart";
const QUOTE_CACHE_TTL: Duration = Duration::from_secs(60);

pub struct HttpMarketData {
    client: ClientWithMiddleware,
    liquidity: LiquidityConfig,
    quote_cache: RwLock<HashMap<String, (Instant, StockQuote)>>,
    last_macro: Mutex<Option<MacroSnapshot>>,
    sector_overrides: Arc<RwLock<HashMap<String, String>>>,
}

impl HttpMarketData {
    pub fn new(liquidity: LiquidityConfig, http: &HttpConfig) -> Self {
        Self {
            client: retry_client(http),
            liquidity,
            quote_cache: RwLock::new(HashMap::new()),
            last_macro: Mutex::new(None),
            sector_overrides: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Optional static sector map for vendors that do not expose profiles.
    pub async fn set_sector(&self, symbol: &str, sector: &str) {
        self.sector_overrides
            .write()
            .await
            .insert(symbol.to_string(), sector.to_string());
    }

    async fn fetch_chart(&self, symbol: &str, range: &str, interval: &str) -> Result<Value> {
        let url = format!(
            "{}/{}?range={}&interval={}",
            CHART_BASE, symbol, range, interval
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("chart request failed for {}", symbol))?;
        anyhow::ensure!(
            response.status().is_success(),
            "chart request for {} returned {}",
            symbol,
            response.status()
        );
        let payload: Value = response
            .json()
            .await
            .with_context(|| format!("chart payload for {} is not json", symbol))?;
        let result = payload["chart"]["result"][0].clone();
        anyhow::ensure!(!result.is_null(), "no chart result for {}", symbol);
        Ok(result)
    }

    fn candles_from_chart(result: &Value) -> Vec<Candle> {
        let Some(timestamps) = result["timestamp"].as_array() else {
            return Vec::new();
        };
        let quote = &result["indicators"]["quote"][0];
        let field = |name: &str, i: usize| quote[name][i].as_f64();

        timestamps
            .iter()
            .enumerate()
            .filter_map(|(i, ts)| {
                let secs = ts.as_i64()?;
                Some(Candle {
                    timestamp: DateTime::<Utc>::from_timestamp(secs, 0)?,
                    open: field("open", i)?,
                    high: field("high", i)?,
                    low: field("low", i)?,
                    close: field("close", i)?,
                    volume: field("volume", i).unwrap_or(0.0),
                })
            })
            .collect()
    }

    async fn fetch_quote(&self, symbol: &str) -> Result<StockQuote> {
        let result = self.fetch_chart(symbol, "3mo", "1d").await?;
        let meta = &result["meta"];
        let candles = Self::candles_from_chart(&result);
        let last = candles
            .last()
            .ok_or_else(|| anyhow::anyhow!("empty chart for {}", symbol))?;

        let price = meta["regularMarketPrice"].as_f64().unwrap_or(last.close);
        let previous_close = meta["chartPreviousClose"]
            .as_f64()
            .or_else(|| candles.len().checked_sub(2).map(|i| candles[i].close));

        // Trailing 20-session average volume from the same chart payload.
        let recent: Vec<f64> = candles.iter().rev().take(20).map(|c| c.volume).collect();
        let avg_volume = if recent.is_empty() {
            0
        } else {
            (recent.iter().sum::<f64>() / recent.len() as f64) as i64
        };

        let change_pct = previous_close
            .filter(|prev| *prev > 0.0)
            .map(|prev| (price - prev) / prev * 100.0)
            .unwrap_or(0.0);

        let sector = self.sector_overrides.read().await.get(symbol).cloned();

        Ok(StockQuote {
            symbol: symbol.to_string(),
            price,
            open: last.open,
            high: last.high,
            low: last.low,
            close: last.close,
            volume: last.volume as i64,
            avg_volume,
            market_cap: meta["marketCap"].as_f64().unwrap_or(0.0),
            change_pct,
            previous_close,
            beta: None,
            sector,
            industry: None,
        })
    }

    async fn quote_simple(&self, symbol: &str) -> (f64, f64) {
        match self.quote(symbol).await {
            Ok(q) => (q.price, q.change_pct),
            Err(e) => {
                debug!("macro leg {} unavailable: {}", symbol, e);
                (0.0, 0.0)
            }
        }
    }
}

#[async_trait]
impl MarketData for HttpMarketData {
    async fn quote(&self, symbol: &str) -> Result<StockQuote> {
        if let Some((at, quote)) = self.quote_cache.read().await.get(symbol) {
            if at.elapsed() < QUOTE_CACHE_TTL {
                return Ok(quote.clone());
            }
        }

        let quote = self.fetch_quote(symbol).await?;
        self.quote_cache
            .write()
            .await
            .insert(symbol.to_string(), (Instant::now(), quote.clone()));
        Ok(quote)
    }

    async fn ohlcv(&self, symbol: &str, days: u32, interval: Interval) -> Result<Vec<Candle>> {
        let (range, bar) = match interval {
            Interval::Daily => (format!("{}d", days.max(1)), "1d"),
            Interval::FiveMinute => ("1d".to_string(), "5m"),
        };
        let result = self.fetch_chart(symbol, &range, bar).await?;
        let candles = Self::candles_from_chart(&result);
        anyhow::ensure!(!candles.is_empty(), "no bars for {}", symbol);
        Ok(candles)
    }

    async fn check_liquidity(&self, symbol: &str) -> Result<bool> {
        let quote = self.quote(symbol).await?;
        let dollar_volume = quote.avg_volume as f64 * quote.price;
        Ok(quote.avg_volume >= self.liquidity.min_avg_volume
            && dollar_volume >= self.liquidity.min_dollar_volume)
    }

    /// VIX, SPY, QQQ, DXY and the 10-year yield in one snapshot. Individual
    /// leg failures degrade to zeros; a fully failed snapshot falls back to
    /// the previous one.
    async fn macro_snapshot(&self) -> Result<MacroSnapshot> {
        let (vix, _) = self.quote_simple("^VIX").await;
        let (spy_price, spy_change) = self.quote_simple("SPY").await;
        let (qqq_price, qqq_change) = self.quote_simple("QQQ").await;
        let (dxy_price, _) = self.quote_simple("DX-Y.NYB").await;
        let (us10y, _) = self.quote_simple("^TNX").await;

        let mut last = self.last_macro.lock().await;
        if vix == 0.0 && spy_price == 0.0 {
            if let Some(previous) = last.clone() {
                warn!("macro snapshot unavailable, reusing previous");
                return Ok(previous);
            }
            anyhow::bail!("macro snapshot unavailable and no previous snapshot");
        }

        let snapshot = MacroSnapshot {
            timestamp: Utc::now(),
            vix,
            vix_regime: VixRegime::from_vix(vix),
            spy_price,
            spy_change_pct: spy_change,
            spy_trend: MarketTrend::from_change_pct(spy_change),
            qqq_price,
            qqq_change_pct: qqq_change,
            dxy_price,
            us10y_yield: us10y,
        };
        *last = Some(snapshot.clone());
        Ok(snapshot)
    }
}
