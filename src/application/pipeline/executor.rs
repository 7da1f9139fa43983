//! Phase 4 driver: turns approved decisions into sized, protected positions.
//!
//! For each approval: earnings-aware stop selection, multiplier-stacked
//! sizing, validation against global limits, then the full order set (entry,
//! dual stops, multi-target exits). The paper flow treats the entry as
//! filled at the decision's entry price once the orders are accepted.

use crate::application::pipeline::order_manager::OrderManager;
use crate::application::pipeline::position_sizer::PositionSizer;
use crate::application::state_core::SharedState;
use crate::domain::decision::TradeDecision;
use crate::domain::ports::EarningsCalendar;
use crate::domain::types::{Direction, Position, Tier};
use crate::infrastructure::persistence::DecisionStore;
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Fail-safe stop distance tracked locally, away from the physical stop.
const BACKUP_STOP_PCT: f64 = 0.10;

/// One approved decision plus the phase-2/3 artifacts execution needs.
pub struct ApprovedTrade {
    pub decision: TradeDecision,
    pub tier: Tier,
    pub beta_multiplier: f64,
    pub sector: String,
    pub atr: f64,
    pub swing_level: Option<f64>,
    pub volatility_20d: f64,
}

pub struct Executor {
    earnings_proximity_days: i64,
    sizer: PositionSizer,
    orders: Arc<OrderManager>,
    earnings: Arc<dyn EarningsCalendar>,
    state: SharedState,
    store: DecisionStore,
}

impl Executor {
    pub fn new(
        earnings_proximity_days: i64,
        sizer: PositionSizer,
        orders: Arc<OrderManager>,
        earnings: Arc<dyn EarningsCalendar>,
        state: SharedState,
        store: DecisionStore,
    ) -> Self {
        Self {
            earnings_proximity_days,
            sizer,
            orders,
            earnings,
            state,
            store,
        }
    }

    /// Execute every approval in sequence. A single failure never aborts the
    /// batch. `vix` feeds the volatility sizing adjustment.
    pub async fn execute_batch(&self, approved: Vec<ApprovedTrade>, vix: f64) {
        if approved.is_empty() {
            info!("phase 4: no approved decisions to execute");
            return;
        }

        // Daily drawdown pauses new entries; the total limit latches the
        // kill switch inside the check.
        if !self.state.write().await.check_drawdown_limits() {
            warn!("phase 4: drawdown limits breached, no new entries");
            return;
        }

        for trade in approved {
            if self.state.read().await.kill_switch_active() {
                warn!("phase 4: kill switch active, skipping remaining entries");
                return;
            }
            if let Err(e) = self.execute_one(trade, vix).await {
                error!("phase 4 execution error: {:#}", e);
            }
        }
    }

    async fn execute_one(&self, trade: ApprovedTrade, vix: f64) -> anyhow::Result<()> {
        let decision = &trade.decision;
        let symbol = decision.symbol.clone();

        // 1. Stop selection, earnings-aware and safety-capped.
        let has_earnings = self
            .earnings
            .earnings_within(&symbol, self.earnings_proximity_days)
            .await;
        let stop_loss = self.orders.calculate_stop_loss(
            &symbol,
            decision.entry_price,
            trade.atr,
            decision.direction,
            has_earnings,
            trade.swing_level,
        );

        // 2. Sizing under the full multiplier stack.
        let (capital, defensive_multiplier, open_count, total_exposure) = {
            let state = self.state.read().await;
            (
                state.capital(),
                state.defensive_multiplier(),
                state.open_positions().len(),
                state.total_exposure(),
            )
        };

        let size = self.sizer.calculate(
            capital,
            decision.entry_price,
            stop_loss,
            &symbol,
            trade.tier,
            decision.size_hint,
            trade.beta_multiplier,
            defensive_multiplier,
        );
        let size = self
            .sizer
            .adjust_for_volatility(size, trade.volatility_20d, vix);

        if let Err(veto) = self
            .sizer
            .validate_size(&size, open_count, total_exposure, capital)
        {
            warn!("{}: execution cancelled: {}", symbol, veto);
            return Ok(());
        }

        info!(
            "executing {}: {} shares @ ${:.2} (stop ${:.2})",
            symbol, size.shares, decision.entry_price, stop_loss
        );

        // 3. Entry order (STOP-LIMIT with slippage band).
        self.orders
            .place_entry_order(&symbol, decision.direction, decision.entry_price, size.shares)
            .await?;

        // 4. Dual stops: physical at the computed level, backup at +-10%.
        let backup_stop = match decision.direction {
            Direction::Short => decision.entry_price * (1.0 + BACKUP_STOP_PCT),
            _ => decision.entry_price * (1.0 - BACKUP_STOP_PCT),
        };
        self.orders
            .place_stop_orders(&symbol, decision.direction, stop_loss, backup_stop, size.shares)
            .await;

        // 5. Multi-target exits.
        self.orders
            .place_take_profit_orders(
                &symbol,
                decision.direction,
                decision.take_profit_1,
                decision.take_profit_2,
                size.shares,
            )
            .await;

        // 6. Register the position and the trade-history row.
        let position = Position {
            symbol: symbol.clone(),
            direction: decision.direction,
            entry_price: decision.entry_price,
            quantity: size.shares,
            stop_loss,
            take_profit: decision.take_profit_1,
            entry_time: Utc::now(),
            current_price: decision.entry_price,
            unrealized_pnl: 0.0,
            sector: trade.sector.clone(),
        };
        if let Err(veto) = self.state.write().await.add_position(position) {
            warn!("{}: position not registered: {}", symbol, veto);
            return Ok(());
        }
        if let Err(e) = self
            .store
            .log_trade_entry(
                &symbol,
                decision.direction,
                decision.entry_price,
                size.shares,
                Utc::now(),
            )
            .await
        {
            error!("{}: failed to log trade entry: {}", symbol, e);
        }

        info!("{}: executed", symbol);
        Ok(())
    }
}
