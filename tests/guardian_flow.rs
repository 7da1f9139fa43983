//! Guardian scenarios across components: the panic protocol wired through
//! state, store and orchestrated phases, and flash-move classification
//! against market-wide context.

use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tradewarden::application::guardian::Watchdog;
use tradewarden::application::pipeline::order_manager::OrderManager;
use tradewarden::domain::ports::Broker;
use tradewarden::application::state_core::{SharedState, StateCore};
use tradewarden::config::{
    AlertsConfig, LiquidityConfig, Phase2Config, Phase5Config, RiskConfig, TechnicalConfig,
};
use tradewarden::domain::alerts::{Alert, AlertLevel, PriceAlertKind};
use tradewarden::domain::ports::system_clock;
use tradewarden::domain::types::{Candle, Direction, Position};
use tradewarden::infrastructure::broker::PaperBroker;
use tradewarden::infrastructure::market::MockMarketData;
use tradewarden::infrastructure::persistence::{Database, DecisionStore};

async fn setup() -> (Watchdog, SharedState, DecisionStore, MockMarketData) {
    let state = StateCore::shared(RiskConfig::default(), Phase2Config::default());
    state
        .write()
        .await
        .initialize(100_000.0, Utc::now().date_naive());

    let market = MockMarketData::new(LiquidityConfig::default());
    let broker = Arc::new(PaperBroker::new(100_000.0));
    broker.connect().await.unwrap();
    let orders = Arc::new(OrderManager::new(&TechnicalConfig::default(), broker));
    let store = DecisionStore::new(Database::in_memory().await.unwrap());

    let watchdog = Watchdog::new(
        &Phase5Config::default(),
        &AlertsConfig::default(),
        Arc::new(market.clone()),
        state.clone(),
        orders,
        store.clone(),
        system_clock(),
    );
    (watchdog, state, store, market)
}

fn position(symbol: &str, entry: f64, qty: i64) -> Position {
    Position {
        symbol: symbol.to_string(),
        direction: Direction::Long,
        entry_price: entry,
        quantity: qty,
        stop_loss: entry * 0.5,
        take_profit: entry * 2.0,
        entry_time: Utc::now(),
        current_price: entry,
        unrealized_pnl: 0.0,
        sector: "Technology".to_string(),
    }
}

fn intraday(closes: &[f64]) -> Vec<Candle> {
    let start = Utc::now() - ChronoDuration::minutes(5 * closes.len() as i64);
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| Candle {
            timestamp: start + ChronoDuration::minutes(5 * i as i64),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1_000.0,
        })
        .collect()
}

#[tokio::test]
async fn panic_protocol_latches_and_blocks_reentry() {
    let (watchdog, state, store, market) = setup().await;
    market.set_price("AAPL", 79.0).await;

    {
        let mut core = state.write().await;
        core.add_position(position("AAPL", 100.0, 200)).unwrap();
        let mut marks = HashMap::new();
        marks.insert("AAPL".to_string(), 79.0);
        core.update_prices(&marks); // -$4200 on $100k: 4.2% drawdown
    }
    store
        .log_trade_entry("AAPL", Direction::Long, 100.0, 200, Utc::now())
        .await
        .unwrap();

    watchdog.tick().await;

    // Everything closed, the switch latched with a drawdown reason, and the
    // realized loss is booked.
    {
        let core = state.read().await;
        assert!(core.kill_switch_active());
        assert!(core.open_positions().is_empty());
        let stats = core.daily_stats().unwrap();
        assert!(stats.realized_pnl < -4_000.0);
        assert_eq!(stats.losses, 1);
    }

    // A second tick is a no-op: the latch holds until manual clearance.
    watchdog.tick().await;
    assert!(state.read().await.kill_switch_active());

    // Manual clearance restores normal running.
    state.write().await.deactivate_kill_switch();
    assert!(!state.read().await.kill_switch_active());
}

#[tokio::test]
async fn market_wide_flash_is_critical_not_emergency() {
    let (watchdog, state, _, market) = setup().await;
    market.set_price("NVDA", 100.0).await;
    state
        .write()
        .await
        .add_position(position("NVDA", 100.0, 10))
        .unwrap();

    // SPY down 3% over the last five-minute bars: market-wide context.
    market
        .set_intraday("SPY", intraday(&[500.0, 485.0]))
        .await;

    let levels = Arc::new(std::sync::Mutex::new(Vec::new()));
    let levels_clone = levels.clone();
    watchdog
        .add_alert_handler(Arc::new(move |alert| {
            if let Alert::Price(a) = alert {
                if a.kind == PriceAlertKind::FlashCrash {
                    levels_clone.lock().unwrap().push(a.level);
                }
            }
        }))
        .await;

    watchdog.tick().await;
    market.set_price("NVDA", 95.0).await;
    watchdog.tick().await;

    let seen = levels.lock().unwrap().clone();
    assert_eq!(seen, vec![AlertLevel::Critical]);
    // Market-wide moves do not trip the kill switch at this magnitude.
    assert!(!state.read().await.kill_switch_active());
}

#[tokio::test]
async fn isolated_double_digit_crash_trips_the_kill_switch() {
    let (watchdog, state, _, market) = setup().await;
    market.set_price("MEME", 100.0).await;
    state
        .write()
        .await
        .add_position(position("MEME", 100.0, 10))
        .unwrap();

    let alerts = Arc::new(AtomicUsize::new(0));
    let alerts_clone = alerts.clone();
    watchdog
        .add_alert_handler(Arc::new(move |alert| {
            if let Alert::Price(a) = alert {
                if a.level == AlertLevel::Emergency {
                    alerts_clone.fetch_add(1, Ordering::SeqCst);
                }
            }
        }))
        .await;

    watchdog.tick().await;
    // 12% isolated collapse inside the window.
    market.set_price("MEME", 88.0).await;
    watchdog.tick().await;

    assert_eq!(alerts.load(Ordering::SeqCst), 1);
    let core = state.read().await;
    assert!(core.kill_switch_active());
    assert!(core.kill_switch_reason().unwrap().contains("flash"));
}
