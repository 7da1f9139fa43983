//! Watchdog: the one-minute price loop.
//!
//! Each tick runs the intraday panic check first, then per-position flash
//! crash detection over a five-minute price ring, stop/take-profit violation
//! alerts, and finally refreshes the state core's marks.

use crate::application::pipeline::order_manager::OrderManager;
use crate::application::state_core::SharedState;
use crate::config::{AlertsConfig, Phase5Config};
use crate::domain::alerts::{Alert, AlertHandler, AlertLevel, PriceAlert, PriceAlertKind};
use crate::domain::ports::{Clock, MarketData};
use crate::domain::types::{Direction, Interval, Position};
use crate::infrastructure::persistence::DecisionStore;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{error, info, warn};

/// Intraday drawdown that trips the panic protocol.
const PANIC_DD_THRESHOLD: f64 = 0.04;
/// Isolated flash moves beyond this escalate straight to the kill switch.
const EMERGENCY_KILL_PCT: f64 = 10.0;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WatchdogSnapshot {
    pub rings: HashMap<String, Vec<(DateTime<Utc>, f64)>>,
    pub last_tick: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WatchdogStatus {
    pub running: bool,
    pub monitored_positions: usize,
    pub check_interval_secs: u64,
    pub flash_crash_threshold: f64,
}

pub struct Watchdog {
    interval: Duration,
    flash_window: ChronoDuration,
    flash_threshold: f64,
    market: Arc<dyn MarketData>,
    state: SharedState,
    orders: Arc<OrderManager>,
    store: DecisionStore,
    handlers: RwLock<Vec<AlertHandler>>,
    rings: Mutex<HashMap<String, VecDeque<(DateTime<Utc>, f64)>>>,
    last_tick: Mutex<Option<DateTime<Utc>>>,
    running: RwLock<bool>,
    _clock: Clock,
}

impl Watchdog {
    pub fn new(
        phase5: &Phase5Config,
        alerts: &AlertsConfig,
        market: Arc<dyn MarketData>,
        state: SharedState,
        orders: Arc<OrderManager>,
        store: DecisionStore,
        clock: Clock,
    ) -> Self {
        Self {
            interval: Duration::from_secs(phase5.watchdog_interval),
            flash_window: ChronoDuration::seconds(phase5.flash_crash_window as i64),
            flash_threshold: alerts.flash_crash_threshold,
            market,
            state,
            orders,
            store,
            handlers: RwLock::new(Vec::new()),
            rings: Mutex::new(HashMap::new()),
            last_tick: Mutex::new(None),
            running: RwLock::new(false),
            _clock: clock,
        }
    }

    pub async fn add_alert_handler(&self, handler: AlertHandler) {
        self.handlers.write().await.push(handler);
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("watchdog started ({}s interval)", self.interval.as_secs());
        *self.running.write().await = true;
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        *self.running.write().await = false;
        info!("watchdog stopped");
    }

    /// One monitoring pass. Public so the engine can drive it directly in
    /// tests and replays.
    pub async fn tick(&self) {
        *self.last_tick.lock().await = Some(Utc::now());

        // Panic protocol runs before any per-position work.
        if self.check_intraday_panic().await {
            return;
        }

        let positions = self.state.read().await.open_positions();
        let mut marks: HashMap<String, f64> = HashMap::new();

        for position in &positions {
            match self.market.quote(&position.symbol).await {
                Ok(quote) => {
                    marks.insert(position.symbol.clone(), quote.price);
                    let alerts = self.check_position(position, quote.price).await;
                    for alert in alerts {
                        self.handle_alert(alert).await;
                    }
                }
                Err(e) => warn!("watchdog: no data for {}: {}", position.symbol, e),
            }
        }

        if !marks.is_empty() {
            self.state.write().await.update_prices(&marks);
        }

        // Drop rings for positions that no longer exist.
        let live: Vec<String> = positions.iter().map(|p| p.symbol.clone()).collect();
        self.rings.lock().await.retain(|symbol, _| live.contains(symbol));
    }

    /// Intraday drawdown >= 4%: close everything, latch the kill switch.
    /// Returns true when the protocol fired.
    async fn check_intraday_panic(&self) -> bool {
        let drawdown = self.state.read().await.current_drawdown();
        if drawdown < PANIC_DD_THRESHOLD {
            return false;
        }
        if self.state.read().await.kill_switch_active() {
            return true;
        }

        error!(
            "PANIC PROTOCOL: intraday drawdown {:.2}% >= {:.2}%",
            drawdown * 100.0,
            PANIC_DD_THRESHOLD * 100.0
        );

        let positions = self.state.read().await.open_positions();
        for position in &positions {
            error!("panic: closing {} at market", position.symbol);
            if let Err(e) = self
                .orders
                .close_position_at_market(&position.symbol, position.direction, position.quantity)
                .await
            {
                error!("panic close failed for {}: {}", position.symbol, e);
            }
            self.settle_exit(position, "panic protocol").await;
        }

        let reason = format!(
            "intraday drawdown {:.2}% >= {:.0}%",
            drawdown * 100.0,
            PANIC_DD_THRESHOLD * 100.0
        );
        self.state.write().await.activate_kill_switch(reason.clone());

        self.handle_alert(PriceAlert {
            symbol: "*".to_string(),
            kind: PriceAlertKind::FlashCrash,
            level: AlertLevel::Critical,
            message: format!("PANIC PROTOCOL: {}", reason),
            current_price: 0.0,
            reference_price: 0.0,
            change_pct: -drawdown * 100.0,
            timestamp: Utc::now(),
        })
        .await;

        true
    }

    async fn settle_exit(&self, position: &Position, reason: &str) {
        let exit_price = if position.current_price > 0.0 {
            position.current_price
        } else {
            position.entry_price
        };

        let removed = self.state.write().await.remove_position(&position.symbol);
        if removed.is_some() {
            let pnl = match position.direction {
                Direction::Short => (position.entry_price - exit_price) * position.quantity as f64,
                _ => (exit_price - position.entry_price) * position.quantity as f64,
            };
            self.state.write().await.record_realized(pnl);
        }

        match self.store.open_trade_id(&position.symbol).await {
            Ok(Some(trade_id)) => {
                if let Err(e) = self
                    .store
                    .log_trade_exit(trade_id, exit_price, Utc::now(), reason)
                    .await
                {
                    error!("failed to log exit for {}: {}", position.symbol, e);
                }
            }
            Ok(None) => {}
            Err(e) => error!("failed to find open trade for {}: {}", position.symbol, e),
        }
    }

    async fn check_position(&self, position: &Position, current_price: f64) -> Vec<PriceAlert> {
        let mut alerts = Vec::new();
        let now = Utc::now();
        let symbol = &position.symbol;

        // Maintain the five-minute ring.
        let oldest = {
            let mut rings = self.rings.lock().await;
            let ring = rings.entry(symbol.clone()).or_default();
            ring.push_back((now, current_price));
            let cutoff = now - self.flash_window;
            while ring.front().map(|(t, _)| *t < cutoff).unwrap_or(false) {
                ring.pop_front();
            }
            if ring.len() >= 2 {
                ring.front().map(|(_, p)| *p)
            } else {
                None
            }
        };

        // Flash crash / spike over the window.
        if let Some(oldest_price) = oldest {
            if oldest_price > 0.0 {
                let change = (current_price - oldest_price) / oldest_price;
                if change.abs() >= self.flash_threshold {
                    let market_wide = self.is_market_wide_move().await;
                    let level = if market_wide {
                        AlertLevel::Critical
                    } else {
                        AlertLevel::Emergency
                    };
                    let label = if change < 0.0 { "CRASH" } else { "SPIKE" };
                    let scope = if market_wide { "MARKET-WIDE" } else { "ISOLATED" };
                    alerts.push(PriceAlert {
                        symbol: symbol.clone(),
                        kind: PriceAlertKind::FlashCrash,
                        level,
                        message: format!(
                            "FLASH {}: {:.1}% in window [{}]",
                            label,
                            change * 100.0,
                            scope
                        ),
                        current_price,
                        reference_price: oldest_price,
                        change_pct: change * 100.0,
                        timestamp: now,
                    });
                }
            }
        }

        // Stop violation.
        let stop_hit = match position.direction {
            Direction::Short => current_price >= position.stop_loss,
            _ => current_price <= position.stop_loss,
        };
        if stop_hit && position.stop_loss > 0.0 {
            let entry_change = match position.direction {
                Direction::Short => (position.entry_price - current_price) / position.entry_price,
                _ => (current_price - position.entry_price) / position.entry_price,
            };
            alerts.push(PriceAlert {
                symbol: symbol.clone(),
                kind: PriceAlertKind::StopViolated,
                level: AlertLevel::Critical,
                message: format!(
                    "STOP VIOLATED: {:.2} through {:.2}",
                    current_price, position.stop_loss
                ),
                current_price,
                reference_price: position.stop_loss,
                change_pct: entry_change * 100.0,
                timestamp: now,
            });
        }

        // Take profit reached.
        let tp_hit = match position.direction {
            Direction::Short => {
                position.take_profit > 0.0 && current_price <= position.take_profit
            }
            _ => position.take_profit > 0.0 && current_price >= position.take_profit,
        };
        if tp_hit {
            alerts.push(PriceAlert {
                symbol: symbol.clone(),
                kind: PriceAlertKind::TakeProfitHit,
                level: AlertLevel::Info,
                message: format!("TAKE PROFIT REACHED: {:.2}", current_price),
                current_price,
                reference_price: position.take_profit,
                change_pct: 0.0,
                timestamp: now,
            });
        }

        alerts
    }

    /// Market-wide if the VIX jumped more than 10% or SPY dropped more than
    /// 2% over the last five-minute bars. Failures read as isolated.
    async fn is_market_wide_move(&self) -> bool {
        let change_of = |candles: &[crate::domain::types::Candle]| -> Option<f64> {
            let n = candles.len();
            if n < 2 {
                return None;
            }
            let prev = candles[n - 2].close;
            let last = candles[n - 1].close;
            if prev > 0.0 {
                Some((last - prev) / prev)
            } else {
                None
            }
        };

        if let Ok(vix) = self.market.ohlcv("^VIX", 1, Interval::FiveMinute).await {
            if let Some(change) = change_of(&vix) {
                if change > 0.10 {
                    warn!("market-wide move detected: VIX +{:.1}%", change * 100.0);
                    return true;
                }
            }
        }
        if let Ok(spy) = self.market.ohlcv("SPY", 1, Interval::FiveMinute).await {
            if let Some(change) = change_of(&spy) {
                if change < -0.02 {
                    warn!("market-wide move detected: SPY {:.1}%", change * 100.0);
                    return true;
                }
            }
        }
        false
    }

    async fn handle_alert(&self, alert: PriceAlert) {
        match alert.level {
            AlertLevel::Emergency => error!("[{}] {}", alert.symbol, alert.message),
            AlertLevel::Critical => error!("[{}] {}", alert.symbol, alert.message),
            AlertLevel::Warning => warn!("[{}] {}", alert.symbol, alert.message),
            AlertLevel::Info => info!("[{}] {}", alert.symbol, alert.message),
        }

        for handler in self.handlers.read().await.iter() {
            handler(Alert::Price(alert.clone()));
        }

        // Severe isolated flash moves latch the kill switch.
        if alert.level == AlertLevel::Emergency
            && alert.kind == PriceAlertKind::FlashCrash
            && alert.change_pct.abs() > EMERGENCY_KILL_PCT
        {
            self.state
                .write()
                .await
                .activate_kill_switch(format!("flash move of {:.1}%", alert.change_pct));
        }
    }

    pub async fn snapshot(&self) -> WatchdogSnapshot {
        let rings = self.rings.lock().await;
        WatchdogSnapshot {
            rings: rings
                .iter()
                .map(|(symbol, ring)| (symbol.clone(), ring.iter().cloned().collect()))
                .collect(),
            last_tick: *self.last_tick.lock().await,
        }
    }

    pub async fn restore(&self, snapshot: WatchdogSnapshot) {
        let mut rings = self.rings.lock().await;
        rings.clear();
        for (symbol, samples) in snapshot.rings {
            rings.insert(symbol, samples.into_iter().collect());
        }
        *self.last_tick.lock().await = snapshot.last_tick;
    }

    pub async fn status(&self) -> WatchdogStatus {
        WatchdogStatus {
            running: *self.running.read().await,
            monitored_positions: self.rings.lock().await.len(),
            check_interval_secs: self.interval.as_secs(),
            flash_crash_threshold: self.flash_threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::state_core::StateCore;
    use crate::config::{LiquidityConfig, Phase2Config, RiskConfig, TechnicalConfig};
    use crate::domain::ports::system_clock;
    use crate::domain::ports::Broker;
    use crate::infrastructure::broker::PaperBroker;
    use crate::infrastructure::market::MockMarketData;
    use crate::infrastructure::persistence::Database;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn setup(market: MockMarketData) -> (Watchdog, SharedState, DecisionStore) {
        let state = StateCore::shared(RiskConfig::default(), Phase2Config::default());
        state
            .write()
            .await
            .initialize(100_000.0, Utc::now().date_naive());

        let broker = Arc::new(PaperBroker::new(100_000.0));
        broker.connect().await.unwrap();
        let orders = Arc::new(OrderManager::new(&TechnicalConfig::default(), broker));
        let store = DecisionStore::new(Database::in_memory().await.unwrap());

        let watchdog = Watchdog::new(
            &Phase5Config::default(),
            &AlertsConfig::default(),
            Arc::new(market),
            state.clone(),
            orders,
            store.clone(),
            system_clock(),
        );
        (watchdog, state, store)
    }

    fn position(symbol: &str, entry: f64, qty: i64, stop: f64, tp: f64) -> Position {
        Position {
            symbol: symbol.to_string(),
            direction: Direction::Long,
            entry_price: entry,
            quantity: qty,
            stop_loss: stop,
            take_profit: tp,
            entry_time: Utc::now(),
            current_price: entry,
            unrealized_pnl: 0.0,
            sector: "Technology".to_string(),
        }
    }

    #[tokio::test]
    async fn stop_violation_emits_critical_alert() {
        let market = MockMarketData::new(LiquidityConfig::default());
        market.set_price("AAPL", 94.0).await;

        let (watchdog, state, _) = setup(market).await;
        state
            .write()
            .await
            .add_position(position("AAPL", 100.0, 10, 95.0, 110.0))
            .unwrap();

        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        watchdog
            .add_alert_handler(Arc::new(move |alert| {
                if let Alert::Price(a) = alert {
                    if a.kind == PriceAlertKind::StopViolated && a.level == AlertLevel::Critical {
                        hits_clone.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }))
            .await;

        watchdog.tick().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // Marks were refreshed.
        let positions = state.read().await.open_positions();
        assert!((positions[0].current_price - 94.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn flash_crash_detected_from_ring() {
        let market = MockMarketData::new(LiquidityConfig::default());
        market.set_price("NVDA", 100.0).await;

        let (watchdog, state, _) = setup(market.clone()).await;
        state
            .write()
            .await
            .add_position(position("NVDA", 100.0, 10, 80.0, 150.0))
            .unwrap();

        let crashes = Arc::new(AtomicUsize::new(0));
        let crashes_clone = crashes.clone();
        watchdog
            .add_alert_handler(Arc::new(move |alert| {
                if let Alert::Price(a) = alert {
                    if a.kind == PriceAlertKind::FlashCrash {
                        crashes_clone.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }))
            .await;

        watchdog.tick().await;
        // 4% drop within the window.
        market.set_price("NVDA", 96.0).await;
        watchdog.tick().await;

        assert_eq!(crashes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panic_protocol_closes_everything_and_kills() {
        let market = MockMarketData::new(LiquidityConfig::default());
        market.set_price("AAPL", 59.0).await;

        let (watchdog, state, store) = setup(market).await;
        {
            let mut core = state.write().await;
            let mut pos = position("AAPL", 100.0, 100, 50.0, 150.0);
            pos.current_price = 59.0;
            core.add_position(pos).unwrap();
            // -$4100 unrealized on $100k: 4.1% intraday drawdown.
            let mut marks = HashMap::new();
            marks.insert("AAPL".to_string(), 59.0);
            core.update_prices(&marks);
        }
        store
            .log_trade_entry("AAPL", Direction::Long, 100.0, 100, Utc::now())
            .await
            .unwrap();

        watchdog.tick().await;

        let core = state.read().await;
        assert!(core.kill_switch_active());
        assert!(core.open_positions().is_empty());
        assert!(core.kill_switch_reason().unwrap().contains("drawdown"));
        drop(core);

        let history = store.trade_history(Some("AAPL"), 5).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].reason.as_deref().unwrap().contains("panic"));
    }

    #[tokio::test]
    async fn snapshot_round_trip_restores_rings() {
        let market = MockMarketData::new(LiquidityConfig::default());
        market.set_price("AAPL", 100.0).await;

        let (watchdog, state, _) = setup(market).await;
        state
            .write()
            .await
            .add_position(position("AAPL", 100.0, 10, 90.0, 120.0))
            .unwrap();
        watchdog.tick().await;

        let snapshot = watchdog.snapshot().await;
        assert_eq!(snapshot.rings.get("AAPL").map(|r| r.len()), Some(1));

        let encoded = serde_json::to_string(&snapshot).unwrap();
        let decoded: WatchdogSnapshot = serde_json::from_str(&encoded).unwrap();
        watchdog.restore(decoded).await;
        assert_eq!(watchdog.snapshot().await.rings.get("AAPL").map(|r| r.len()), Some(1));
    }
}
