//! Service traits at the system boundary. Concrete adapters live under
//! `infrastructure`; tests supply small hand-rolled impls.

use crate::domain::orders::{BrokerBalance, BrokerPosition, Order, OrderStatus};
use crate::domain::types::{Candle, Interval, MacroSnapshot, NewsArticle, StockQuote};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Quotes, bars, the macro backdrop and the liquidity gate.
#[async_trait]
pub trait MarketData: Send + Sync {
    async fn quote(&self, symbol: &str) -> Result<StockQuote>;

    /// Daily (or intraday) bars for the trailing `days` window, oldest first.
    async fn ohlcv(&self, symbol: &str, days: u32, interval: Interval) -> Result<Vec<Candle>>;

    /// Average-volume and dollar-volume thresholds from configuration.
    async fn check_liquidity(&self, symbol: &str) -> Result<bool>;

    async fn macro_snapshot(&self) -> Result<MacroSnapshot>;
}

/// News lookup for one symbol. Implementations own quota and caching.
#[async_trait]
pub trait NewsSource: Send + Sync {
    async fn search(&self, symbol: &str, max_results: usize) -> Result<Vec<NewsArticle>>;
}

/// Corporate-calendar proximity check. Infallible by contract: any lookup
/// failure reads as "no earnings nearby" (fail-open).
#[async_trait]
pub trait EarningsCalendar: Send + Sync {
    async fn earnings_within(&self, symbol: &str, days: i64) -> bool;
}

/// Abstract broker. `place_order` returns the broker-side order id.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn connect(&self) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;
    async fn balance(&self) -> Result<BrokerBalance>;
    async fn positions(&self) -> Result<Vec<BrokerPosition>>;
    async fn place_order(&self, order: &Order) -> Result<String>;
    async fn cancel_order(&self, broker_order_id: &str) -> Result<()>;
    async fn order_status(&self, broker_order_id: &str) -> Result<OrderStatus>;

    /// Native OCO support is optional; the order manager falls back to
    /// separate legs when this errors.
    async fn place_oco_order(
        &self,
        _symbol: &str,
        _quantity: i64,
        _take_profit: f64,
        _stop_loss: f64,
    ) -> Result<String> {
        anyhow::bail!("broker does not support native OCO orders")
    }
}

/// Outcome of a fact-grounding check on a news blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundingVerdict {
    pub verified: bool,
    pub confidence: f64,
    pub sources: Vec<String>,
    pub summary: String,
}

/// Pre-adjudication fact check backed by a web search.
#[async_trait]
pub trait Grounding: Send + Sync {
    async fn verify(&self, symbol: &str, news: &str) -> Result<GroundingVerdict>;
}

/// One structured record of a judge adjudication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub origin: String,
    pub prompt: String,
    pub result: String,
    pub score: f64,
    pub direction: String,
    pub justification: String,
}

/// Receives audit entries from the judge. `emit` must never block and must
/// never fail the pipeline.
pub trait AuditSink: Send + Sync {
    fn emit(&self, entry: AuditEntry);
}

/// Wall-clock source in local time, injectable so tests can pin schedules.
pub type Clock = Arc<dyn Fn() -> DateTime<Local> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Local::now)
}

/// Clock pinned to a single instant; used by scheduler and guardian tests.
pub fn fixed_clock(at: DateTime<Local>) -> Clock {
    Arc::new(move || at)
}
