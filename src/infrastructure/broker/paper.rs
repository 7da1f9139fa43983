//! Paper broker for offline operation and tests.
//!
//! MARKET orders fill instantly at the order's limit price when present,
//! else at the live quote when a market adapter was injected, else at a
//! constant fallback. STOP/LIMIT/STOP_LIMIT orders rest in the book until
//! cancelled; the engine's guardian does its own trigger monitoring.

use crate::domain::orders::{BrokerBalance, BrokerPosition, Order, OrderSide, OrderStatus, OrderType};
use crate::domain::ports::{Broker, MarketData};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

const FALLBACK_FILL_PRICE: f64 = 100.0;

struct PaperInner {
    connected: bool,
    cash: f64,
    positions: HashMap<String, BrokerPosition>,
    orders: HashMap<String, Order>,
}

pub struct PaperBroker {
    inner: RwLock<PaperInner>,
    market: Option<Arc<dyn MarketData>>,
}

impl PaperBroker {
    pub fn new(initial_balance: f64) -> Self {
        Self {
            inner: RwLock::new(PaperInner {
                connected: false,
                cash: initial_balance,
                positions: HashMap::new(),
                orders: HashMap::new(),
            }),
            market: None,
        }
    }

    pub fn with_market(initial_balance: f64, market: Arc<dyn MarketData>) -> Self {
        Self {
            inner: RwLock::new(PaperInner {
                connected: false,
                cash: initial_balance,
                positions: HashMap::new(),
                orders: HashMap::new(),
            }),
            market: Some(market),
        }
    }

    async fn fill_price(&self, order: &Order) -> f64 {
        if let Some(limit) = order.limit_price {
            return limit;
        }
        if let Some(market) = &self.market {
            if let Ok(quote) = market.quote(&order.symbol).await {
                if quote.price > 0.0 {
                    return quote.price;
                }
            }
        }
        FALLBACK_FILL_PRICE
    }

    fn apply_fill(inner: &mut PaperInner, order: &Order, price: f64) {
        let qty = order.quantity as f64;
        match order.side {
            OrderSide::Buy => {
                inner.cash -= price * qty;
                let position = inner
                    .positions
                    .entry(order.symbol.clone())
                    .or_insert_with(|| BrokerPosition {
                        symbol: order.symbol.clone(),
                        quantity: 0,
                        avg_entry_price: 0.0,
                        current_price: price,
                        unrealized_pnl: 0.0,
                        side: OrderSide::Buy,
                    });
                let total_qty = position.quantity + order.quantity;
                if total_qty > 0 {
                    let total_cost =
                        position.avg_entry_price * position.quantity as f64 + price * qty;
                    position.avg_entry_price = total_cost / total_qty as f64;
                }
                position.quantity = total_qty;
                position.current_price = price;
            }
            OrderSide::Sell => {
                inner.cash += price * qty;
                if let Some(position) = inner.positions.get_mut(&order.symbol) {
                    position.quantity -= order.quantity;
                    position.current_price = price;
                    if position.quantity <= 0 {
                        inner.positions.remove(&order.symbol);
                    }
                } else {
                    // Opening short exposure.
                    inner.positions.insert(
                        order.symbol.clone(),
                        BrokerPosition {
                            symbol: order.symbol.clone(),
                            quantity: order.quantity,
                            avg_entry_price: price,
                            current_price: price,
                            unrealized_pnl: 0.0,
                            side: OrderSide::Sell,
                        },
                    );
                }
            }
        }
    }
}

#[async_trait]
impl Broker for PaperBroker {
    async fn connect(&self) -> Result<()> {
        self.inner.write().await.connected = true;
        info!("paper broker connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.inner.write().await.connected = false;
        info!("paper broker disconnected");
        Ok(())
    }

    async fn balance(&self) -> Result<BrokerBalance> {
        let inner = self.inner.read().await;
        Ok(BrokerBalance {
            total: inner.cash,
            available: inner.cash,
            margin_used: 0.0,
            currency: "USD".to_string(),
        })
    }

    async fn positions(&self) -> Result<Vec<BrokerPosition>> {
        Ok(self.inner.read().await.positions.values().cloned().collect())
    }

    async fn place_order(&self, order: &Order) -> Result<String> {
        let broker_id = format!("PAPER-{}", Uuid::new_v4());
        let price = self.fill_price(order).await;

        let mut inner = self.inner.write().await;
        anyhow::ensure!(inner.connected, "paper broker is not connected");

        let mut record = order.clone();
        record.broker_order_id = Some(broker_id.clone());

        if order.order_type == OrderType::Market {
            Self::apply_fill(&mut inner, order, price);
            record.status = OrderStatus::Filled;
            record.filled_quantity = order.quantity;
            record.avg_fill_price = price;
            info!(
                "paper fill: {} {} {} @ {:.2}",
                order.side, order.quantity, order.symbol, price
            );
        } else {
            record.status = OrderStatus::Submitted;
        }

        inner.orders.insert(broker_id.clone(), record);
        Ok(broker_id)
    }

    async fn cancel_order(&self, broker_order_id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let order = inner
            .orders
            .get_mut(broker_order_id)
            .ok_or_else(|| anyhow::anyhow!("unknown order {}", broker_order_id))?;
        if order.is_open() {
            order.status = OrderStatus::Cancelled;
        }
        Ok(())
    }

    async fn order_status(&self, broker_order_id: &str) -> Result<OrderStatus> {
        self.inner
            .read()
            .await
            .orders
            .get(broker_order_id)
            .map(|o| o.status)
            .ok_or_else(|| anyhow::anyhow!("unknown order {}", broker_order_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn market_order(symbol: &str, side: OrderSide, qty: i64, limit: Option<f64>) -> Order {
        let order = Order::new(symbol, side, OrderType::Market, qty);
        match limit {
            Some(price) => order.with_limit(price),
            None => order,
        }
    }

    #[tokio::test]
    async fn market_buy_fills_at_limit_price() {
        let broker = PaperBroker::new(100_000.0);
        broker.connect().await.unwrap();

        let id = broker
            .place_order(&market_order("AAPL", OrderSide::Buy, 10, Some(150.0)))
            .await
            .unwrap();
        assert_eq!(broker.order_status(&id).await.unwrap(), OrderStatus::Filled);

        let balance = broker.balance().await.unwrap();
        assert!((balance.total - 98_500.0).abs() < 1e-9);

        let positions = broker.positions().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].quantity, 10);
        assert!((positions[0].avg_entry_price - 150.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn sell_closes_position_and_credits_cash() {
        let broker = PaperBroker::new(10_000.0);
        broker.connect().await.unwrap();
        broker
            .place_order(&market_order("XYZ", OrderSide::Buy, 5, Some(100.0)))
            .await
            .unwrap();
        broker
            .place_order(&market_order("XYZ", OrderSide::Sell, 5, Some(110.0)))
            .await
            .unwrap();

        assert!(broker.positions().await.unwrap().is_empty());
        let balance = broker.balance().await.unwrap();
        assert!((balance.total - 10_050.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn resting_orders_can_be_cancelled() {
        let broker = PaperBroker::new(10_000.0);
        broker.connect().await.unwrap();

        let stop = Order::new("XYZ", OrderSide::Sell, OrderType::Stop, 5).with_stop(95.0);
        let id = broker.place_order(&stop).await.unwrap();
        assert_eq!(broker.order_status(&id).await.unwrap(), OrderStatus::Submitted);

        broker.cancel_order(&id).await.unwrap();
        assert_eq!(broker.order_status(&id).await.unwrap(), OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn orders_require_connection() {
        let broker = PaperBroker::new(10_000.0);
        let result = broker
            .place_order(&market_order("XYZ", OrderSide::Buy, 1, Some(10.0)))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn market_order_without_limit_uses_fallback_price() {
        let broker = PaperBroker::new(10_000.0);
        broker.connect().await.unwrap();
        broker
            .place_order(&market_order("XYZ", OrderSide::Buy, 10, None))
            .await
            .unwrap();
        let balance = broker.balance().await.unwrap();
        assert!((balance.total - 9_000.0).abs() < 1e-9);
    }
}
