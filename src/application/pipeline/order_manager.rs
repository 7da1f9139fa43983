//! Phase 4: order choreography.
//!
//! Entries are STOP-LIMIT with a bounded slippage band. Exits are a dual
//! stop (physical at the broker, backup tracked locally for the guardian)
//! plus two take-profit targets. Exit legs share an OCO group: a TP1 fill
//! never cancels TP2, but once the full exit quantity is realized by any
//! path the remaining siblings are cancelled.

use crate::config::TechnicalConfig;
use crate::domain::orders::{Order, OrderSide, OrderStatus, OrderType};
use crate::domain::ports::Broker;
use crate::domain::types::Direction;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Hard cap: a stop may never imply more than this loss vs entry.
const MAX_STOP_LOSS_PCT: f64 = 0.10;
/// Slippage band applied to the entry limit leg.
const ENTRY_LIMIT_BAND: f64 = 0.005;
/// Tight stop distance when earnings are close.
const EARNINGS_STOP_PCT: f64 = 0.005;

struct OcoGroup {
    symbol: String,
    total_quantity: i64,
    filled_quantity: i64,
    order_ids: Vec<String>,
}

pub struct StopOrders {
    pub physical: Option<Order>,
    pub backup: Order,
}

pub struct TakeProfitOrders {
    pub tp1: Option<Order>,
    pub tp2: Option<Order>,
}

pub struct OrderManager {
    atr_stop_multiplier: f64,
    broker: Arc<dyn Broker>,
    pending: RwLock<HashMap<String, Order>>,
    groups: RwLock<HashMap<String, OcoGroup>>,
}

impl OrderManager {
    pub fn new(technical: &TechnicalConfig, broker: Arc<dyn Broker>) -> Self {
        Self {
            atr_stop_multiplier: technical.atr_stop_multiplier,
            broker,
            pending: RwLock::new(HashMap::new()),
            groups: RwLock::new(HashMap::new()),
        }
    }

    /// Stop selection. Near earnings the stop tightens to half a percent;
    /// otherwise it is the ATR stop, loosened to a recent swing extreme when
    /// that sits closer to price. Either way the 10% safety cap applies.
    pub fn calculate_stop_loss(
        &self,
        symbol: &str,
        entry_price: f64,
        atr: f64,
        direction: Direction,
        has_earnings: bool,
        swing_level: Option<f64>,
    ) -> f64 {
        if has_earnings {
            let stop = match direction {
                Direction::Short => entry_price * (1.0 + EARNINGS_STOP_PCT),
                _ => entry_price * (1.0 - EARNINGS_STOP_PCT),
            };
            info!("{}: earnings proximity, tight stop at {:.2}", symbol, stop);
            return round2(stop);
        }

        let mut stop = match direction {
            Direction::Short => {
                let atr_stop = entry_price + self.atr_stop_multiplier * atr;
                match swing_level {
                    Some(swing) if swing < atr_stop => swing,
                    _ => atr_stop,
                }
            }
            _ => {
                let atr_stop = entry_price - self.atr_stop_multiplier * atr;
                match swing_level {
                    Some(swing) if swing > atr_stop => swing,
                    _ => atr_stop,
                }
            }
        };

        match direction {
            Direction::Short => {
                let max_stop = entry_price * (1.0 + MAX_STOP_LOSS_PCT);
                if stop > max_stop {
                    warn!("{}: stop {:.2} beyond 10% loss, capping at {:.2}", symbol, stop, max_stop);
                    stop = max_stop;
                }
            }
            _ => {
                let min_stop = entry_price * (1.0 - MAX_STOP_LOSS_PCT);
                if stop < min_stop {
                    warn!("{}: stop {:.2} beyond 10% loss, capping at {:.2}", symbol, stop, min_stop);
                    stop = min_stop;
                }
            }
        }

        round2(stop)
    }

    async fn submit(&self, mut order: Order) -> Result<Order> {
        match self.broker.place_order(&order).await {
            Ok(broker_id) => {
                order.status = OrderStatus::Submitted;
                order.broker_order_id = Some(broker_id);
            }
            Err(e) => {
                order.status = OrderStatus::Rejected;
                order.notes = format!("{} | rejected: {}", order.notes, e);
                self.pending.write().await.insert(order.id.clone(), order.clone());
                return Err(e).context("order submission failed");
            }
        }
        self.pending.write().await.insert(order.id.clone(), order.clone());
        Ok(order)
    }

    /// STOP-LIMIT entry: trigger at the entry price, limit half a percent
    /// beyond it to bound slippage.
    pub async fn place_entry_order(
        &self,
        symbol: &str,
        direction: Direction,
        entry_price: f64,
        quantity: i64,
    ) -> Result<Order> {
        let (side, limit_price) = match direction {
            Direction::Short => (OrderSide::Sell, entry_price * (1.0 - ENTRY_LIMIT_BAND)),
            _ => (OrderSide::Buy, entry_price * (1.0 + ENTRY_LIMIT_BAND)),
        };

        let order = Order::new(symbol, side, OrderType::StopLimit, quantity)
            .with_stop(entry_price)
            .with_limit(round2(limit_price))
            .with_notes(format!(
                "entry {} stop {:.2} limit {:.2}",
                direction, entry_price, limit_price
            ));

        let order = self.submit(order).await?;
        info!(
            "entry order placed: {} {} {} @ stop {:.2} / limit {:.2}",
            symbol, direction, quantity, entry_price, limit_price
        );
        Ok(order)
    }

    /// Dual stop system: the physical stop goes to the broker; the backup is
    /// only tracked locally and acted on by the guardian if the broker leg
    /// fails.
    pub async fn place_stop_orders(
        &self,
        symbol: &str,
        direction: Direction,
        physical_stop: f64,
        backup_stop: f64,
        quantity: i64,
    ) -> StopOrders {
        let side = exit_side(direction);
        let group_id = self.open_group(symbol, quantity).await;

        let physical = Order::new(symbol, side, OrderType::Stop, quantity)
            .with_stop(physical_stop)
            .with_parent(group_id.clone())
            .with_notes("physical stop");
        let physical = match self.submit(physical).await {
            Ok(order) => {
                self.add_to_group(&group_id, &order.id).await;
                Some(order)
            }
            Err(e) => {
                error!("{}: physical stop rejected: {}", symbol, e);
                None
            }
        };

        let backup = Order::new(symbol, side, OrderType::Stop, quantity)
            .with_stop(backup_stop)
            .with_notes("backup stop (local tracking)");
        self.pending.write().await.insert(backup.id.clone(), backup.clone());

        info!(
            "dual stop armed for {}: physical {:.2} (broker) + backup {:.2} (local)",
            symbol, physical_stop, backup_stop
        );
        StopOrders { physical, backup }
    }

    /// Multi-target exits: half the quantity at TP1, the remainder at TP2.
    pub async fn place_take_profit_orders(
        &self,
        symbol: &str,
        direction: Direction,
        tp1: f64,
        tp2: f64,
        quantity: i64,
    ) -> TakeProfitOrders {
        let side = exit_side(direction);
        let qty_tp1 = quantity / 2;
        let qty_tp2 = quantity - qty_tp1;
        let group_id = self.group_for(symbol).await;

        let place = |price: f64, qty: i64, label: &str| {
            let mut order = Order::new(symbol, side, OrderType::Limit, qty)
                .with_limit(price)
                .with_notes(format!("{} @ {:.2}", label, price));
            if let Some(group) = &group_id {
                order = order.with_parent(group.clone());
            }
            order
        };

        let tp1_order = match self.submit(place(tp1, qty_tp1, "take profit 1")).await {
            Ok(order) => {
                if let Some(group) = &group_id {
                    self.add_to_group(group, &order.id).await;
                }
                Some(order)
            }
            Err(e) => {
                error!("{}: tp1 rejected: {}", symbol, e);
                None
            }
        };
        let tp2_order = match self.submit(place(tp2, qty_tp2, "take profit 2")).await {
            Ok(order) => {
                if let Some(group) = &group_id {
                    self.add_to_group(group, &order.id).await;
                }
                Some(order)
            }
            Err(e) => {
                error!("{}: tp2 rejected: {}", symbol, e);
                None
            }
        };

        info!(
            "multi-target exits for {}: {} @ {:.2} + {} @ {:.2}",
            symbol, qty_tp1, tp1, qty_tp2, tp2
        );
        TakeProfitOrders {
            tp1: tp1_order,
            tp2: tp2_order,
        }
    }

    async fn open_group(&self, symbol: &str, total_quantity: i64) -> String {
        let id = Uuid::new_v4().to_string();
        self.groups.write().await.insert(
            id.clone(),
            OcoGroup {
                symbol: symbol.to_string(),
                total_quantity,
                filled_quantity: 0,
                order_ids: Vec::new(),
            },
        );
        id
    }

    async fn group_for(&self, symbol: &str) -> Option<String> {
        self.groups
            .read()
            .await
            .iter()
            .find(|(_, group)| group.symbol == symbol && group.filled_quantity < group.total_quantity)
            .map(|(id, _)| id.clone())
    }

    async fn add_to_group(&self, group_id: &str, order_id: &str) {
        if let Some(group) = self.groups.write().await.get_mut(group_id) {
            group.order_ids.push(order_id.to_string());
        }
    }

    /// Record an exit fill. Once the group's full quantity is realized by
    /// any combination of legs, every remaining sibling is cancelled.
    pub async fn on_exit_fill(&self, order_id: &str, filled_quantity: i64) {
        let group_id = {
            let mut pending = self.pending.write().await;
            let Some(order) = pending.get_mut(order_id) else {
                return;
            };
            order.status = OrderStatus::Filled;
            order.filled_quantity = filled_quantity;
            order.parent_order_id.clone()
        };
        let Some(group_id) = group_id else { return };

        let exhausted = {
            let mut groups = self.groups.write().await;
            let Some(group) = groups.get_mut(&group_id) else {
                return;
            };
            group.filled_quantity += filled_quantity;
            group.filled_quantity >= group.total_quantity
        };

        if exhausted {
            self.cancel_group_siblings(&group_id, order_id).await;
        }
    }

    async fn cancel_group_siblings(&self, group_id: &str, filled_order_id: &str) {
        let sibling_ids: Vec<String> = {
            let groups = self.groups.read().await;
            groups
                .get(group_id)
                .map(|g| {
                    g.order_ids
                        .iter()
                        .filter(|id| id.as_str() != filled_order_id)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };

        for id in sibling_ids {
            let broker_id = {
                let pending = self.pending.read().await;
                pending
                    .get(&id)
                    .filter(|o| o.is_open())
                    .and_then(|o| o.broker_order_id.clone())
            };
            if let Some(broker_id) = broker_id {
                if let Err(e) = self.broker.cancel_order(&broker_id).await {
                    error!("failed to cancel oco sibling {}: {}", id, e);
                    continue;
                }
            }
            if let Some(order) = self.pending.write().await.get_mut(&id) {
                if order.is_open() {
                    order.status = OrderStatus::Cancelled;
                    info!("oco sibling cancelled: {} ({})", id, order.notes);
                }
            }
        }
    }

    /// Immediate market close for the full position. Also retires the
    /// position's exit group so resting legs do not fire afterwards.
    pub async fn close_position_at_market(
        &self,
        symbol: &str,
        direction: Direction,
        quantity: i64,
    ) -> Result<Order> {
        let order = Order::new(symbol, exit_side(direction), OrderType::Market, quantity)
            .with_notes("market close");
        let order = self.submit(order).await?;

        if let Some(group_id) = self.group_for(symbol).await {
            if let Some(group) = self.groups.write().await.get_mut(&group_id) {
                group.filled_quantity = group.total_quantity;
            }
            self.cancel_group_siblings(&group_id, &order.id).await;
        }

        info!("market close submitted for {} ({} shares)", symbol, quantity);
        Ok(order)
    }

    /// Replace the broker-side physical stop. Best-effort: failures are
    /// reported but never escalate past the caller's log line.
    pub async fn update_stop_order(&self, symbol: &str, new_stop: f64) -> Result<()> {
        let existing = {
            let pending = self.pending.read().await;
            pending
                .values()
                .find(|o| {
                    o.symbol == symbol
                        && o.order_type == OrderType::Stop
                        && o.is_open()
                        && o.broker_order_id.is_some()
                })
                .cloned()
        };

        let Some(existing) = existing else {
            anyhow::bail!("no open physical stop for {}", symbol);
        };

        let broker_id = existing.broker_order_id.clone().unwrap_or_default();
        self.broker
            .cancel_order(&broker_id)
            .await
            .context("failed to cancel previous stop")?;
        if let Some(order) = self.pending.write().await.get_mut(&existing.id) {
            order.status = OrderStatus::Cancelled;
        }

        let mut replacement = Order::new(symbol, existing.side, OrderType::Stop, existing.quantity)
            .with_stop(new_stop)
            .with_notes(format!("physical stop (moved to {:.2})", new_stop));
        if let Some(parent) = existing.parent_order_id {
            replacement = replacement.with_parent(parent.clone());
            self.add_to_group(&parent, &replacement.id).await;
        }
        self.submit(replacement).await?;

        info!("{}: physical stop moved to {:.2}", symbol, new_stop);
        Ok(())
    }

    pub async fn pending_orders(&self) -> Vec<Order> {
        self.pending
            .read()
            .await
            .values()
            .filter(|o| o.is_open())
            .cloned()
            .collect()
    }
}

fn exit_side(direction: Direction) -> OrderSide {
    match direction {
        Direction::Short => OrderSide::Buy,
        _ => OrderSide::Sell,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
