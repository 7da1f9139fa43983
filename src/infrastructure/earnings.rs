//! Earnings-proximity checks. Calendar lookups are cached for 24 hours and
//! every failure path is fail-open: no data means no block.

use crate::config::HttpConfig;
use crate::domain::ports::EarningsCalendar;
use crate::infrastructure::http_client::retry_client;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest_middleware::ClientWithMiddleware;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};

const CALENDAR_URL: &str = "https://query1.finance.yahoo.com/v10/finance/quoteSummary";
const CACHE_TTL: Duration = Duration::from_secs(24 * 3600);

pub struct HttpEarningsCalendar {
    client: ClientWithMiddleware,
    cache: RwLock<HashMap<String, (Instant, Option<NaiveDate>)>>,
}

impl HttpEarningsCalendar {
    pub fn new(http: &HttpConfig) -> Self {
        Self {
            client: retry_client(http),
            cache: RwLock::new(HashMap::new()),
        }
    }

    async fn next_earnings_date(&self, symbol: &str) -> Option<NaiveDate> {
        if let Some((at, date)) = self.cache.read().await.get(symbol) {
            if at.elapsed() < CACHE_TTL {
                return *date;
            }
        }

        let fetched = self.fetch_date(symbol).await;
        self.cache
            .write()
            .await
            .insert(symbol.to_string(), (Instant::now(), fetched));
        fetched
    }

    async fn fetch_date(&self, symbol: &str) -> Option<NaiveDate> {
        let url = format!("{}/{}?modules=calendarEvents", CALENDAR_URL, symbol);
        let response = self.client.get(&url).send().await.ok()?;
        if !response.status().is_success() {
            debug!("{}: calendar request returned {}", symbol, response.status());
            return None;
        }
        let payload: Value = response.json().await.ok()?;
        let dates = payload["quoteSummary"]["result"][0]["calendarEvents"]["earnings"]
            ["earningsDate"]
            .as_array()?;
        let first = dates.first()?;
        let ts = first["raw"].as_i64().or_else(|| first.as_i64())?;
        Some(DateTime::<Utc>::from_timestamp(ts, 0)?.date_naive())
    }
}

#[async_trait]
impl EarningsCalendar for HttpEarningsCalendar {
    async fn earnings_within(&self, symbol: &str, days: i64) -> bool {
        let Some(next) = self.next_earnings_date(symbol).await else {
            debug!("{}: no earnings date available, allowing entry", symbol);
            return false;
        };
        let until = (next - Utc::now().date_naive()).num_days();
        if (0..=days).contains(&until) {
            info!("{}: earnings in {} days, blocking entry", symbol, until);
            true
        } else {
            false
        }
    }
}

/// Scriptable calendar for tests and offline runs.
#[derive(Clone, Default)]
pub struct MockEarningsCalendar {
    dates: Arc<RwLock<HashMap<String, NaiveDate>>>,
}

impl MockEarningsCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_earnings_date(&self, symbol: &str, date: NaiveDate) {
        self.dates.write().await.insert(symbol.to_string(), date);
    }
}

#[async_trait]
impl EarningsCalendar for MockEarningsCalendar {
    async fn earnings_within(&self, symbol: &str, days: i64) -> bool {
        let Some(date) = self.dates.read().await.get(symbol).copied() else {
            return false;
        };
        let until = (date - Utc::now().date_naive()).num_days();
        (0..=days).contains(&until)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[tokio::test]
    async fn mock_calendar_blocks_inside_window() {
        let calendar = MockEarningsCalendar::new();
        let today = Utc::now().date_naive();

        calendar.set_earnings_date("AAPL", today + ChronoDuration::days(3)).await;
        assert!(calendar.earnings_within("AAPL", 5).await);
        assert!(!calendar.earnings_within("AAPL", 2).await);

        calendar.set_earnings_date("MSFT", today + ChronoDuration::days(30)).await;
        assert!(!calendar.earnings_within("MSFT", 5).await);

        // Unknown symbols fail open.
        assert!(!calendar.earnings_within("ZZZZ", 5).await);
    }

    #[tokio::test]
    async fn past_earnings_do_not_block() {
        let calendar = MockEarningsCalendar::new();
        let today = Utc::now().date_naive();
        calendar.set_earnings_date("IBM", today - ChronoDuration::days(2)).await;
        assert!(!calendar.earnings_within("IBM", 5).await);
    }
}
