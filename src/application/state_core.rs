//! The state core: capital, open positions, daily stats, drawdown history,
//! sector exposure and the kill switch. All mutation is serialized through a
//! single `Arc<RwLock<StateCore>>`; readers take snapshots.

use crate::config::{Phase2Config, RiskConfig};
use crate::domain::errors::RiskViolation;
use crate::domain::types::{CapitalSnapshot, DailyStats, Direction, Position, SystemState};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

pub type SharedState = Arc<RwLock<StateCore>>;

pub struct StateCore {
    risk: RiskConfig,
    phase2: Phase2Config,
    state: SystemState,
    positions: HashMap<String, Position>,
    daily_stats: Option<DailyStats>,
    capital: f64,
    kill_switch_active: bool,
    kill_switch_reason: Option<String>,
    capital_history: VecDeque<CapitalSnapshot>,
}

/// Serializable image of the core for persistence and external readers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub state: SystemState,
    pub capital: f64,
    pub positions: Vec<Position>,
    pub daily_stats: Option<DailyStats>,
    pub kill_switch_active: bool,
    pub kill_switch_reason: Option<String>,
    pub capital_history: Vec<CapitalSnapshot>,
}

impl StateCore {
    pub fn new(risk: RiskConfig, phase2: Phase2Config) -> Self {
        Self {
            risk,
            phase2,
            state: SystemState::Running,
            positions: HashMap::new(),
            daily_stats: None,
            capital: 0.0,
            kill_switch_active: false,
            kill_switch_reason: None,
            capital_history: VecDeque::new(),
        }
    }

    pub fn shared(risk: RiskConfig, phase2: Phase2Config) -> SharedState {
        Arc::new(RwLock::new(Self::new(risk, phase2)))
    }

    pub fn initialize(&mut self, starting_capital: f64, today: NaiveDate) {
        self.capital = starting_capital;
        self.daily_stats = Some(DailyStats::new(today, starting_capital));
        info!("state core initialized with capital ${:.2}", starting_capital);
    }

    pub fn capital(&self) -> f64 {
        self.capital
    }

    pub fn system_state(&self) -> SystemState {
        self.state
    }

    pub fn daily_stats(&self) -> Option<&DailyStats> {
        self.daily_stats.as_ref()
    }

    // === drawdown ===

    /// Intraday drawdown: |min(0, realized + unrealized)| / starting capital.
    pub fn current_drawdown(&self) -> f64 {
        let Some(stats) = &self.daily_stats else {
            return 0.0;
        };
        if stats.starting_capital <= 0.0 {
            return 0.0;
        }
        let pnl = stats.realized_pnl + stats.unrealized_pnl;
        pnl.min(0.0).abs() / stats.starting_capital
    }

    /// Drawdown vs the capital of min(5, len) sessions ago, floored at zero.
    pub fn weekly_drawdown(&self) -> f64 {
        if self.capital_history.len() < 2 {
            return 0.0;
        }
        let lookback = self.capital_history.len().min(5);
        let reference = self.capital_history[self.capital_history.len() - lookback].capital;
        if reference <= 0.0 {
            return 0.0;
        }
        ((reference - self.capital) / reference).max(0.0)
    }

    pub fn is_defensive_mode(&self) -> bool {
        let weekly = self.weekly_drawdown();
        if weekly >= self.phase2.weekly_dd_defensive {
            warn!(
                "defensive mode: weekly drawdown {:.2}% >= {:.2}%",
                weekly * 100.0,
                self.phase2.weekly_dd_defensive * 100.0
            );
            return true;
        }
        let daily = self.current_drawdown();
        if daily >= self.phase2.daily_dd_defensive {
            warn!(
                "defensive mode: daily drawdown {:.2}% >= {:.2}%",
                daily * 100.0,
                self.phase2.daily_dd_defensive * 100.0
            );
            return true;
        }
        false
    }

    pub fn defensive_multiplier(&self) -> f64 {
        if self.is_defensive_mode() {
            info!("defensive mode active, halving position sizing");
            0.5
        } else {
            1.0
        }
    }

    /// True while within limits. Breaching the total limit latches the kill
    /// switch; breaching the daily limit only pauses new entries.
    pub fn check_drawdown_limits(&mut self) -> bool {
        let dd = self.current_drawdown();

        if dd >= self.risk.max_drawdown_total {
            error!("total drawdown limit breached: {:.2}%", dd * 100.0);
            self.activate_kill_switch(format!(
                "total drawdown {:.2}% >= {:.2}%",
                dd * 100.0,
                self.risk.max_drawdown_total * 100.0
            ));
            return false;
        }

        if dd >= self.risk.max_drawdown_daily {
            warn!("daily drawdown limit reached: {:.2}%", dd * 100.0);
            return false;
        }

        true
    }

    // === positions ===

    pub fn add_position(&mut self, position: Position) -> Result<(), RiskViolation> {
        if self.positions.contains_key(&position.symbol) {
            return Err(RiskViolation::DuplicatePosition {
                symbol: position.symbol,
            });
        }
        if self.positions.len() >= self.risk.max_positions {
            return Err(RiskViolation::PositionLimitReached {
                current: self.positions.len(),
                max: self.risk.max_positions,
            });
        }
        info!("position added: {} {}", position.symbol, position.direction);
        self.positions.insert(position.symbol.clone(), position);
        Ok(())
    }

    pub fn remove_position(&mut self, symbol: &str) -> Option<Position> {
        let removed = self.positions.remove(symbol);
        if removed.is_some() {
            info!("position removed: {}", symbol);
        }
        removed
    }

    pub fn open_positions(&self) -> Vec<Position> {
        self.positions.values().cloned().collect()
    }

    pub fn open_symbols(&self) -> Vec<String> {
        self.positions.keys().cloned().collect()
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn has_position(&self, symbol: &str) -> bool {
        self.positions.contains_key(symbol)
    }

    pub fn set_stop_loss(&mut self, symbol: &str, stop: f64) {
        if let Some(position) = self.positions.get_mut(symbol) {
            position.stop_loss = stop;
        }
    }

    /// Refresh marks; recomputes per-position and aggregate unrealized P&L.
    pub fn update_prices(&mut self, prices: &HashMap<String, f64>) {
        for (symbol, position) in self.positions.iter_mut() {
            if let Some(&price) = prices.get(symbol) {
                position.current_price = price;
                position.unrealized_pnl = match position.direction {
                    Direction::Long => (price - position.entry_price) * position.quantity as f64,
                    Direction::Short => (position.entry_price - price) * position.quantity as f64,
                    Direction::Neutro => 0.0,
                };
            }
        }
        let total_unrealized: f64 = self.positions.values().map(|p| p.unrealized_pnl).sum();
        if let Some(stats) = self.daily_stats.as_mut() {
            stats.unrealized_pnl = total_unrealized;
            stats.current_capital = stats.starting_capital + stats.realized_pnl + total_unrealized;
        }
    }

    /// Book a realized result against capital and the daily counters.
    pub fn record_realized(&mut self, pnl: f64) {
        self.capital += pnl;
        if let Some(stats) = self.daily_stats.as_mut() {
            stats.realized_pnl += pnl;
            stats.trades_count += 1;
            if pnl >= 0.0 {
                stats.wins += 1;
            } else {
                stats.losses += 1;
            }
            stats.current_capital = stats.starting_capital + stats.realized_pnl + stats.unrealized_pnl;
        }
    }

    pub fn total_exposure(&self) -> f64 {
        self.positions.values().map(|p| p.market_value()).sum()
    }

    // === sector exposure ===

    pub fn exposure_by_sector(&self) -> HashMap<String, f64> {
        let mut exposure: HashMap<String, f64> = HashMap::new();
        for position in self.positions.values() {
            *exposure.entry(position.sector.clone()).or_insert(0.0) += position.market_value();
        }
        exposure
    }

    /// Veto if adding `position_value` to `sector` would push that sector past
    /// the configured share of capital. Sectorless entries bucket as
    /// "Unknown" and the cap still applies there.
    pub fn check_sector_exposure(
        &self,
        sector: &str,
        position_value: f64,
    ) -> Result<(), RiskViolation> {
        if self.capital <= 0.0 {
            return Ok(());
        }
        let current = self.exposure_by_sector().get(sector).copied().unwrap_or(0.0);
        let would_be = (current + position_value) / self.capital;
        if would_be > self.phase2.sector_exposure_max {
            warn!(
                "sector exposure limit: {} would be {:.2}% (max {:.2}%)",
                sector,
                would_be * 100.0,
                self.phase2.sector_exposure_max * 100.0
            );
            return Err(RiskViolation::SectorExposureLimit {
                sector: sector.to_string(),
                would_be_pct: would_be * 100.0,
                max_pct: self.phase2.sector_exposure_max * 100.0,
            });
        }
        Ok(())
    }

    // === kill switch ===

    pub fn activate_kill_switch(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        error!("KILL SWITCH ACTIVATED: {}", reason);
        self.kill_switch_active = true;
        self.kill_switch_reason = Some(reason);
        self.state = SystemState::Killed;
    }

    /// Manual clearance only; nothing in the engine calls this on its own.
    pub fn deactivate_kill_switch(&mut self) {
        info!("kill switch deactivated manually");
        self.kill_switch_active = false;
        self.kill_switch_reason = None;
        self.state = SystemState::Running;
    }

    pub fn kill_switch_active(&self) -> bool {
        self.kill_switch_active
    }

    pub fn kill_switch_reason(&self) -> Option<&str> {
        self.kill_switch_reason.as_deref()
    }

    // === session boundary ===

    /// Append today's capital to the bounded ring. Idempotent per date.
    pub fn update_capital_history(&mut self, date: NaiveDate) {
        if self.capital_history.back().map(|s| s.date) == Some(date) {
            return;
        }
        let (realized, unrealized) = self
            .daily_stats
            .as_ref()
            .map(|s| (s.realized_pnl, s.unrealized_pnl))
            .unwrap_or((0.0, 0.0));
        self.capital_history.push_back(CapitalSnapshot {
            date,
            capital: self.capital,
            realized_pnl: realized,
            unrealized_pnl: unrealized,
        });
        while self.capital_history.len() > self.risk.capital_history_days {
            self.capital_history.pop_front();
        }
    }

    /// Roll daily stats over to a new session date, banking the old day into
    /// the capital history first.
    pub fn roll_session(&mut self, today: NaiveDate) {
        let stale = self
            .daily_stats
            .as_ref()
            .map(|s| s.date != today)
            .unwrap_or(true);
        if !stale {
            return;
        }
        if let Some(previous) = &self.daily_stats {
            self.update_capital_history(previous.date);
        }
        self.daily_stats = Some(DailyStats::new(today, self.capital));
        info!("daily stats rolled over to {}", today);
    }

    // === snapshots ===

    pub fn to_snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            state: self.state,
            capital: self.capital,
            positions: self.positions.values().cloned().collect(),
            daily_stats: self.daily_stats.clone(),
            kill_switch_active: self.kill_switch_active,
            kill_switch_reason: self.kill_switch_reason.clone(),
            capital_history: self.capital_history.iter().cloned().collect(),
        }
    }

    pub fn restore(&mut self, snapshot: StateSnapshot) {
        self.state = snapshot.state;
        self.capital = snapshot.capital;
        self.positions = snapshot
            .positions
            .into_iter()
            .map(|p| (p.symbol.clone(), p))
            .collect();
        self.daily_stats = snapshot.daily_stats;
        self.kill_switch_active = snapshot.kill_switch_active;
        self.kill_switch_reason = snapshot.kill_switch_reason;
        self.capital_history = snapshot.capital_history.into();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn core() -> StateCore {
        let mut core = StateCore::new(RiskConfig::default(), Phase2Config::default());
        core.initialize(100_000.0, NaiveDate::from_ymd_opt(2025, 6, 2).unwrap());
        core
    }

    fn position(symbol: &str, sector: &str, entry: f64, qty: i64) -> Position {
        Position {
            symbol: symbol.to_string(),
            direction: Direction::Long,
            entry_price: entry,
            quantity: qty,
            stop_loss: entry * 0.97,
            take_profit: entry * 1.05,
            entry_time: Utc::now(),
            current_price: 0.0,
            unrealized_pnl: 0.0,
            sector: sector.to_string(),
        }
    }

    #[test]
    fn one_position_per_symbol() {
        let mut core = core();
        core.add_position(position("AAPL", "Technology", 100.0, 10)).unwrap();
        let err = core.add_position(position("AAPL", "Technology", 101.0, 5));
        assert!(matches!(err, Err(RiskViolation::DuplicatePosition { .. })));
    }

    #[test]
    fn max_positions_enforced() {
        let mut core = core();
        for (i, symbol) in ["A", "B", "C", "D", "E"].iter().enumerate() {
            core.add_position(position(symbol, "Misc", 100.0 + i as f64, 1)).unwrap();
        }
        let err = core.add_position(position("F", "Misc", 100.0, 1));
        assert!(matches!(err, Err(RiskViolation::PositionLimitReached { .. })));
    }

    #[test]
    fn drawdown_tracks_unrealized_losses() {
        let mut core = core();
        core.add_position(position("AAPL", "Technology", 100.0, 100)).unwrap();
        assert_eq!(core.current_drawdown(), 0.0);

        let mut prices = HashMap::new();
        prices.insert("AAPL".to_string(), 80.0);
        core.update_prices(&prices);
        // -$2000 on $100k starting capital.
        assert!((core.current_drawdown() - 0.02).abs() < 1e-9);
    }

    #[test]
    fn profits_do_not_count_as_drawdown() {
        let mut core = core();
        core.record_realized(5_000.0);
        assert_eq!(core.current_drawdown(), 0.0);
        assert!((core.capital() - 105_000.0).abs() < 1e-9);
    }

    #[test]
    fn daily_limit_pauses_total_limit_kills() {
        let mut core = core();
        core.record_realized(-2_500.0); // 2.5% daily dd
        assert!(!core.check_drawdown_limits());
        assert!(!core.kill_switch_active());

        core.record_realized(-4_000.0); // 6.5% total
        assert!(!core.check_drawdown_limits());
        assert!(core.kill_switch_active());
        assert_eq!(core.system_state(), SystemState::Killed);
        assert!(core.kill_switch_reason().unwrap().contains("drawdown"));
    }

    #[test]
    fn weekly_drawdown_uses_capital_ring() {
        let mut core = core();
        for (i, capital) in [(1, 100_000.0), (2, 98_000.0), (3, 96_000.0)] {
            core.capital = capital;
            core.update_capital_history(NaiveDate::from_ymd_opt(2025, 6, i).unwrap());
        }
        core.capital = 94_000.0;
        // Reference is 3 sessions back: (100k - 94k) / 100k.
        assert!((core.weekly_drawdown() - 0.06).abs() < 1e-9);
    }

    #[test]
    fn capital_history_is_bounded() {
        let mut core = core();
        for day in 1..=40u32 {
            let date = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap() + chrono::Duration::days(day as i64);
            core.update_capital_history(date);
        }
        assert_eq!(core.to_snapshot().capital_history.len(), 30);
    }

    #[test]
    fn defensive_mode_from_daily_drawdown() {
        let mut core = core();
        assert_eq!(core.defensive_multiplier(), 1.0);
        core.record_realized(-3_500.0); // 3.5% >= 3% daily defensive threshold
        assert!(core.is_defensive_mode());
        assert_eq!(core.defensive_multiplier(), 0.5);
    }

    #[test]
    fn sector_exposure_veto_at_twenty_percent() {
        let mut core = core();
        let mut pos = position("AAPL", "Technology", 100.0, 150);
        pos.current_price = 100.0;
        core.add_position(pos).unwrap();

        // 15k existing + 6k new = 21% of 100k.
        let err = core.check_sector_exposure("Technology", 6_000.0);
        assert!(matches!(err, Err(RiskViolation::SectorExposureLimit { .. })));

        // Different sector is fine.
        assert!(core.check_sector_exposure("Energy", 6_000.0).is_ok());
        // Unknown bucket is capped too.
        assert!(core.check_sector_exposure("Unknown", 25_000.0).is_err());
    }

    #[test]
    fn snapshot_round_trip() {
        let mut core = core();
        core.add_position(position("NVDA", "Technology", 500.0, 4)).unwrap();
        core.record_realized(-1_000.0);
        core.activate_kill_switch("test");
        core.update_capital_history(NaiveDate::from_ymd_opt(2025, 6, 2).unwrap());

        let snapshot = core.to_snapshot();
        let encoded = serde_json::to_string(&snapshot).unwrap();
        let decoded: StateSnapshot = serde_json::from_str(&encoded).unwrap();

        let mut restored = StateCore::new(RiskConfig::default(), Phase2Config::default());
        restored.restore(decoded);

        assert_eq!(restored.capital(), core.capital());
        assert_eq!(restored.open_symbols(), core.open_symbols());
        assert_eq!(restored.kill_switch_active(), core.kill_switch_active());
        assert_eq!(
            restored.daily_stats().unwrap().realized_pnl,
            core.daily_stats().unwrap().realized_pnl
        );
    }

    #[test]
    fn roll_session_banks_previous_day() {
        let mut core = core();
        core.record_realized(2_000.0);
        core.roll_session(NaiveDate::from_ymd_opt(2025, 6, 3).unwrap());
        let snapshot = core.to_snapshot();
        assert_eq!(snapshot.capital_history.len(), 1);
        assert_eq!(snapshot.daily_stats.unwrap().starting_capital, 102_000.0);
    }
}
