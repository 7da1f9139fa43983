use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Trade direction as used across the pipeline and the AI wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
    Neutro,
}

impl Direction {
    /// Lenient parse of the AI vocabulary. Unknown strings map to Neutro.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "LONG" => Direction::Long,
            "SHORT" => Direction::Short,
            _ => Direction::Neutro,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
            Direction::Neutro => write!(f, "NEUTRO"),
        }
    }
}

/// Market-cap tier of a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tier {
    Tier1Large,
    Tier2Mid,
    Unknown,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Tier1Large => write!(f, "tier1_large_cap"),
            Tier::Tier2Mid => write!(f, "tier2_mid_cap"),
            Tier::Unknown => write!(f, "unknown"),
        }
    }
}

/// Which scanner produced a buzz candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandidateSource {
    Watchlist,
    VolumeSpike,
    Gap,
    NewsCatalyst,
}

impl fmt::Display for CandidateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandidateSource::Watchlist => write!(f, "watchlist"),
            CandidateSource::VolumeSpike => write!(f, "volume_spike"),
            CandidateSource::Gap => write!(f, "gap"),
            CandidateSource::NewsCatalyst => write!(f, "news_catalyst"),
        }
    }
}

/// A ticker surfaced by the buzz factory (phase 0). In-memory only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub symbol: String,
    pub source: CandidateSource,
    pub buzz_score: f64,
    pub reason: String,
    pub detected_at: DateTime<Utc>,
    pub tier: Tier,
    pub market_cap: f64,
    /// News text collected at detection time, forwarded to the screener and judge.
    pub news_content: Option<String>,
}

impl Candidate {
    pub fn new(
        symbol: impl Into<String>,
        source: CandidateSource,
        buzz_score: f64,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            source,
            buzz_score,
            reason: reason.into(),
            detected_at: Utc::now(),
            tier: Tier::Unknown,
            market_cap: 0.0,
            news_content: None,
        }
    }
}

/// Snapshot quote for one symbol.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StockQuote {
    pub symbol: String,
    pub price: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub avg_volume: i64,
    pub market_cap: f64,
    pub change_pct: f64,
    pub previous_close: Option<f64>,
    pub beta: Option<f64>,
    pub sector: Option<String>,
    pub industry: Option<String>,
}

impl StockQuote {
    pub fn volume_ratio(&self) -> f64 {
        if self.avg_volume > 0 {
            self.volume as f64 / self.avg_volume as f64
        } else {
            0.0
        }
    }

    pub fn dollar_volume(&self) -> f64 {
        self.volume as f64 * self.price
    }

    pub fn gap_pct(&self) -> Option<f64> {
        match self.previous_close {
            Some(prev) if prev > 0.0 => Some((self.price - prev) / prev),
            _ => None,
        }
    }
}

/// Single OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Bar interval supported by the market adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interval {
    Daily,
    FiveMinute,
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interval::Daily => write!(f, "1d"),
            Interval::FiveMinute => write!(f, "5m"),
        }
    }
}

/// One news article as returned by a news source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsArticle {
    pub title: String,
    pub summary: String,
    pub url: String,
    pub source: String,
    pub published_at: Option<DateTime<Utc>>,
}

/// Broad market direction from a daily change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketTrend {
    Bullish,
    Bearish,
    Neutral,
}

impl MarketTrend {
    pub fn from_change_pct(change_pct: f64) -> Self {
        if change_pct > 0.5 {
            MarketTrend::Bullish
        } else if change_pct < -0.5 {
            MarketTrend::Bearish
        } else {
            MarketTrend::Neutral
        }
    }
}

impl fmt::Display for MarketTrend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketTrend::Bullish => write!(f, "bullish"),
            MarketTrend::Bearish => write!(f, "bearish"),
            MarketTrend::Neutral => write!(f, "neutral"),
        }
    }
}

/// Volatility regime bucketed from the VIX level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VixRegime {
    LowVolatility,
    Normal,
    Elevated,
    HighVolatility,
    Extreme,
}

impl VixRegime {
    pub fn from_vix(vix: f64) -> Self {
        if vix < 15.0 {
            VixRegime::LowVolatility
        } else if vix < 20.0 {
            VixRegime::Normal
        } else if vix < 25.0 {
            VixRegime::Elevated
        } else if vix < 30.0 {
            VixRegime::HighVolatility
        } else {
            VixRegime::Extreme
        }
    }
}

impl fmt::Display for VixRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VixRegime::LowVolatility => write!(f, "low_volatility"),
            VixRegime::Normal => write!(f, "normal"),
            VixRegime::Elevated => write!(f, "elevated"),
            VixRegime::HighVolatility => write!(f, "high_volatility"),
            VixRegime::Extreme => write!(f, "extreme"),
        }
    }
}

/// Macro backdrop fed into the judge prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MacroSnapshot {
    pub timestamp: DateTime<Utc>,
    pub vix: f64,
    pub vix_regime: VixRegime,
    pub spy_price: f64,
    pub spy_change_pct: f64,
    pub spy_trend: MarketTrend,
    pub qqq_price: f64,
    pub qqq_change_pct: f64,
    pub dxy_price: f64,
    pub us10y_yield: f64,
}

impl MacroSnapshot {
    pub fn is_high_risk(&self) -> bool {
        matches!(
            self.vix_regime,
            VixRegime::HighVolatility | VixRegime::Extreme
        )
    }
}

impl Default for MacroSnapshot {
    fn default() -> Self {
        Self {
            timestamp: Utc::now(),
            vix: 20.0,
            vix_regime: VixRegime::Elevated,
            spy_price: 0.0,
            spy_change_pct: 0.0,
            spy_trend: MarketTrend::Neutral,
            qqq_price: 0.0,
            qqq_change_pct: 0.0,
            dxy_price: 0.0,
            us10y_yield: 0.0,
        }
    }
}

/// An open position tracked by the state core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub quantity: i64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub entry_time: DateTime<Utc>,
    pub current_price: f64,
    pub unrealized_pnl: f64,
    /// Sector captured from the entry-time quote; "Unknown" when the adapter
    /// had no sector field. Exposure math groups on this value.
    pub sector: String,
}

impl Position {
    /// Market value at the last seen price (entry price until a tick arrives).
    pub fn market_value(&self) -> f64 {
        let price = if self.current_price > 0.0 {
            self.current_price
        } else {
            self.entry_price
        };
        price * self.quantity as f64
    }

    pub fn is_profitable(&self) -> bool {
        let price = if self.current_price > 0.0 {
            self.current_price
        } else {
            self.entry_price
        };
        match self.direction {
            Direction::Long => price > self.entry_price,
            Direction::Short => price < self.entry_price,
            Direction::Neutro => false,
        }
    }
}

/// Per-session statistics, rolled over at the day boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyStats {
    pub date: NaiveDate,
    pub starting_capital: f64,
    pub current_capital: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub trades_count: u32,
    pub wins: u32,
    pub losses: u32,
}

impl DailyStats {
    pub fn new(date: NaiveDate, starting_capital: f64) -> Self {
        Self {
            date,
            starting_capital,
            current_capital: starting_capital,
            realized_pnl: 0.0,
            unrealized_pnl: 0.0,
            trades_count: 0,
            wins: 0,
            losses: 0,
        }
    }
}

/// Engine-wide lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SystemState {
    Running,
    Paused,
    Killed,
    Maintenance,
}

impl fmt::Display for SystemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SystemState::Running => write!(f, "running"),
            SystemState::Paused => write!(f, "paused"),
            SystemState::Killed => write!(f, "killed"),
            SystemState::Maintenance => write!(f, "maintenance"),
        }
    }
}

/// One end-of-day capital record in the bounded history ring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapitalSnapshot {
    pub date: NaiveDate,
    pub capital: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
}
