use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
    Oco,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit => write!(f, "LIMIT"),
            OrderType::Stop => write!(f, "STOP"),
            OrderType::StopLimit => write!(f, "STOP_LIMIT"),
            OrderType::Oco => write!(f, "OCO"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Submitted,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
    Expired,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A single order as handed to the broker port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: i64,
    pub limit_price: Option<f64>,
    pub stop_price: Option<f64>,
    pub status: OrderStatus,
    pub filled_quantity: i64,
    pub avg_fill_price: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub broker_order_id: Option<String>,
    /// Links sibling exit orders (stops and take-profits) into one OCO group.
    pub parent_order_id: Option<String>,
    pub notes: String,
}

impl Order {
    pub fn new(symbol: impl Into<String>, side: OrderSide, order_type: OrderType, quantity: i64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            symbol: symbol.into(),
            side,
            order_type,
            quantity,
            limit_price: None,
            stop_price: None,
            status: OrderStatus::Pending,
            filled_quantity: 0,
            avg_fill_price: 0.0,
            created_at: now,
            updated_at: now,
            broker_order_id: None,
            parent_order_id: None,
            notes: String::new(),
        }
    }

    pub fn with_limit(mut self, price: f64) -> Self {
        self.limit_price = Some(price);
        self
    }

    pub fn with_stop(mut self, price: f64) -> Self {
        self.stop_price = Some(price);
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_order_id = Some(parent_id.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    pub fn is_open(&self) -> bool {
        matches!(
            self.status,
            OrderStatus::Pending | OrderStatus::Submitted | OrderStatus::PartiallyFilled
        )
    }
}

/// Account balance as reported by the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerBalance {
    pub total: f64,
    pub available: f64,
    pub margin_used: f64,
    pub currency: String,
}

/// A position as reported by the broker (may lag the state core).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub symbol: String,
    pub quantity: i64,
    pub avg_entry_price: f64,
    pub current_price: f64,
    pub unrealized_pnl: f64,
    pub side: OrderSide,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_prices_and_parent() {
        let order = Order::new("AAPL", OrderSide::Buy, OrderType::StopLimit, 10)
            .with_stop(100.0)
            .with_limit(100.5)
            .with_parent("oco-1")
            .with_notes("entry");
        assert_eq!(order.stop_price, Some(100.0));
        assert_eq!(order.limit_price, Some(100.5));
        assert_eq!(order.parent_order_id.as_deref(), Some("oco-1"));
        assert_eq!(order.status, OrderStatus::Pending);
        assert!(order.is_open());
    }

    #[test]
    fn filled_orders_are_not_open() {
        let mut order = Order::new("AAPL", OrderSide::Sell, OrderType::Market, 5);
        order.status = OrderStatus::Filled;
        assert!(!order.is_open());
        order.status = OrderStatus::Cancelled;
        assert!(!order.is_open());
    }
}
