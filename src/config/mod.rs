//! Typed settings for the engine.
//!
//! Loaded from a TOML document where every field has a default, so an empty
//! or missing file yields a fully working paper configuration. Secrets (AI
//! provider keys, news API credentials) are never part of the document; they
//! are discovered from the process environment by the adapters that need
//! them.

use anyhow::{Context, Result};
use chrono::NaiveTime;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub engine: EngineConfig,
    pub http: HttpConfig,
    pub risk: RiskConfig,
    pub phase0: Phase0Config,
    pub phase2: Phase2Config,
    pub phase5: Phase5Config,
    pub alerts: AlertsConfig,
    pub technical: TechnicalConfig,
    pub tiers: TiersConfig,
    pub liquidity: LiquidityConfig,
    pub ai: AiConfig,
    pub schedule: ScheduleConfig,
    pub broker: BrokerConfig,
    pub news: NewsConfig,
}

impl Settings {
    /// Load from a TOML file. A missing file is not an error: defaults apply.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("settings file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file {}", path.display()))?;
        let settings: Settings = toml::from_str(&raw)
            .with_context(|| format!("failed to parse settings file {}", path.display()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.risk.max_positions > 0,
            "risk.max_positions must be positive"
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.risk.risk_per_trade),
            "risk.risk_per_trade must be a fraction"
        );
        anyhow::ensure!(
            self.risk.max_drawdown_daily < self.risk.max_drawdown_total,
            "risk.max_drawdown_daily must be below max_drawdown_total"
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.risk.max_correlation)
                && (0.0..=1.0).contains(&self.phase2.max_correlation),
            "correlation limits must be fractions"
        );
        anyhow::ensure!(
            self.engine.starting_capital > 0.0,
            "engine.starting_capital must be positive"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub starting_capital: f64,
    pub database_url: String,
    /// Soft deadline for graceful shutdown, in seconds.
    pub shutdown_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            starting_capital: 100_000.0,
            database_url: "sqlite://data/tradewarden.db".to_string(),
            shutdown_timeout_secs: 15,
        }
    }
}

/// Transport knobs for the market, news and calendar adapters. AI provider
/// calls do not use these; each provider carries its own hard timeout.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub max_retries: u32,
    pub pool_max_idle_per_host: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            connect_timeout_secs: 10,
            max_retries: 3,
            pool_max_idle_per_host: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub max_positions: usize,
    pub risk_per_trade: f64,
    pub max_drawdown_daily: f64,
    pub max_drawdown_total: f64,
    pub max_correlation: f64,
    /// Length of the end-of-day capital ring used for weekly drawdown.
    pub capital_history_days: usize,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_positions: 5,
            risk_per_trade: 0.01,
            max_drawdown_daily: 0.02,
            max_drawdown_total: 0.06,
            max_correlation: 0.7,
            capital_history_days: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Phase0Config {
    pub volume_spike_multiplier: f64,
    pub gap_threshold: f64,
    pub friday_block: bool,
    pub earnings_proximity_days: i64,
    pub max_candidates: usize,
    /// Tier-1 symbols scanned by the watchlist source.
    pub watchlist: Vec<String>,
}

impl Default for Phase0Config {
    fn default() -> Self {
        Self {
            volume_spike_multiplier: 2.0,
            gap_threshold: 0.03,
            friday_block: true,
            earnings_proximity_days: 5,
            max_candidates: 25,
            watchlist: [
                "AAPL", "MSFT", "GOOGL", "AMZN", "META", "NVDA", "TSLA", "JPM", "UNH", "LLY",
                "WMT", "XOM", "AVGO", "V", "MA",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Phase2Config {
    pub weekly_dd_defensive: f64,
    pub daily_dd_defensive: f64,
    pub sector_exposure_max: f64,
    pub beta_normal: f64,
    pub beta_aggressive: f64,
    /// Phase 2 runs a tighter correlation gate than the base risk limit.
    pub max_correlation: f64,
}

impl Default for Phase2Config {
    fn default() -> Self {
        Self {
            weekly_dd_defensive: 0.05,
            daily_dd_defensive: 0.03,
            sector_exposure_max: 0.20,
            beta_normal: 2.0,
            beta_aggressive: 3.0,
            max_correlation: 0.75,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Phase5Config {
    pub watchdog_interval: u64,
    pub sentinel_interval: u64,
    pub flash_crash_window: u64,
    pub poison_pill_interval: u64,
    /// Local hour after which Friday breakeven tightening kicks in.
    pub breakeven_hour: u32,
}

impl Default for Phase5Config {
    fn default() -> Self {
        Self {
            watchdog_interval: 60,
            sentinel_interval: 300,
            flash_crash_window: 300,
            poison_pill_interval: 1800,
            breakeven_hour: 14,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    pub flash_crash_threshold: f64,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            flash_crash_threshold: 0.03,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TechnicalConfig {
    pub rsi_period: usize,
    pub atr_period: usize,
    pub supertrend_period: usize,
    pub supertrend_multiplier: f64,
    pub atr_stop_multiplier: f64,
}

impl Default for TechnicalConfig {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            atr_period: 14,
            supertrend_period: 10,
            supertrend_multiplier: 3.0,
            atr_stop_multiplier: 2.5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TierConfig {
    pub min_market_cap: f64,
    pub position_multiplier: f64,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            min_market_cap: 4_000_000_000.0,
            position_multiplier: 1.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TiersConfig {
    pub tier1_large_cap: TierConfig,
    pub tier2_mid_cap: TierConfig,
}

impl Default for TiersConfig {
    fn default() -> Self {
        Self {
            tier1_large_cap: TierConfig {
                min_market_cap: 4_000_000_000.0,
                position_multiplier: 1.0,
            },
            tier2_mid_cap: TierConfig {
                min_market_cap: 800_000_000.0,
                position_multiplier: 0.75,
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LiquidityConfig {
    pub min_avg_volume: i64,
    pub min_dollar_volume: f64,
    /// Stricter dollar-volume floor applied by the volume-spike scanner.
    pub spike_min_dollar_volume: f64,
}

impl Default for LiquidityConfig {
    fn default() -> Self {
        Self {
            min_avg_volume: 500_000,
            min_dollar_volume: 5_000_000.0,
            spike_min_dollar_volume: 15_000_000.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub screener_threshold: f64,
    pub judge_threshold: f64,
    /// Default decision validity window, in hours.
    pub cache_expiry_hours: i64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            screener_threshold: 7.0,
            judge_threshold: 8.0,
            cache_expiry_hours: 4,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub market_open: String,
    pub market_close: String,
    /// Pre-market buzz generation point.
    pub phase0_time: String,
    /// Opening-plus-margin pipeline point (phases 1 through 4).
    pub pipeline_time: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            market_open: "09:30".to_string(),
            market_close: "16:00".to_string(),
            phase0_time: "08:00".to_string(),
            pipeline_time: "10:30".to_string(),
        }
    }
}

impl ScheduleConfig {
    pub fn market_open_time(&self) -> NaiveTime {
        parse_hhmm(&self.market_open, NaiveTime::from_hms_opt(9, 30, 0).unwrap())
    }

    pub fn market_close_time(&self) -> NaiveTime {
        parse_hhmm(&self.market_close, NaiveTime::from_hms_opt(16, 0, 0).unwrap())
    }

    pub fn phase0_point(&self) -> NaiveTime {
        parse_hhmm(&self.phase0_time, NaiveTime::from_hms_opt(8, 0, 0).unwrap())
    }

    pub fn pipeline_point(&self) -> NaiveTime {
        parse_hhmm(&self.pipeline_time, NaiveTime::from_hms_opt(10, 30, 0).unwrap())
    }
}

fn parse_hhmm(s: &str, fallback: NaiveTime) -> NaiveTime {
    NaiveTime::parse_from_str(s, "%H:%M").unwrap_or(fallback)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrokerProvider {
    PaperLocal,
}

impl FromStr for BrokerProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "paper_local" | "paper" => Ok(BrokerProvider::PaperLocal),
            other => anyhow::bail!("unknown broker provider: {}", other),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub provider: BrokerProvider,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            provider: BrokerProvider::PaperLocal,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NewsConfig {
    /// Primary-source query budget per calendar day.
    pub daily_quota: u32,
    /// In-memory article cache lifetime per symbol, in hours.
    pub cache_expiry_hours: i64,
    /// Where the quota counter survives restarts.
    pub quota_file: String,
}

impl Default for NewsConfig {
    fn default() -> Self {
        Self {
            daily_quota: 95,
            cache_expiry_hours: 4,
            quota_file: "data/cache/news_quota.json".to_string(),
        }
    }
}
